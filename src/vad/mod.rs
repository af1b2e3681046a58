//! Utterance endpointing using energy-based analysis.
//!
//! Each window is classified by RMS energy against a fixed threshold. The
//! threshold is not adapted to the room; quiet environments and loud ones use
//! the same configured value.

use crate::config::EndpointerConfig;
use crate::pipeline::messages::{AudioWindow, sample_to_f32};
use std::time::Duration;
use tracing::{debug, info};

/// Silence timer and speech flag for the current recording segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointerState {
    /// Silence accumulated since the last speech window.
    pub silence_accumulated: Duration,
    /// Whether a speech segment is in progress.
    pub is_speech_active: bool,
}

impl EndpointerState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// What one window meant for the current segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointEvent {
    /// Window too short to judge; nothing changed.
    Undecided,
    /// Speech started (silence → speech while idle).
    SpeechOnset,
    /// Speech continues.
    Speech,
    /// Silent window; silence timer advanced.
    Silence,
    /// Silence after speech reached the recording limit.
    SegmentEnd,
}

/// RMS energy endpointer.
pub struct EnergyEndpointer {
    threshold: f32,
    window_size: usize,
    silence_limit: Duration,
}

impl EnergyEndpointer {
    pub fn new(config: &EndpointerConfig) -> Self {
        info!(
            "endpointer initialized: threshold={}, window={} samples, silence_limit={}ms",
            config.silence_threshold, config.window_size, config.recording_silence_limit_ms
        );
        Self {
            threshold: config.silence_threshold,
            window_size: config.window_size.max(1),
            silence_limit: config.recording_silence_limit(),
        }
    }

    /// Classify one window. `None` when fewer than `window_size` samples are
    /// available; the caller must skip the window rather than count silence.
    pub fn observe(&self, samples: &[i16]) -> Option<bool> {
        if samples.len() < self.window_size {
            return None;
        }
        let window = &samples[samples.len() - self.window_size..];
        Some(compute_rms_energy(window) > self.threshold)
    }

    /// Feed one polled window into the segment state.
    pub fn step(&self, state: &mut EndpointerState, window: &AudioWindow) -> EndpointEvent {
        let Some(speech) = self.observe(&window.samples) else {
            return EndpointEvent::Undecided;
        };

        if speech {
            state.silence_accumulated = Duration::ZERO;
            if state.is_speech_active {
                return EndpointEvent::Speech;
            }
            state.is_speech_active = true;
            debug!("speech onset");
            return EndpointEvent::SpeechOnset;
        }

        state.silence_accumulated = state.silence_accumulated.saturating_add(window.covered);
        if state.is_speech_active && state.silence_accumulated >= self.silence_limit {
            debug!(
                "segment end after {}ms of silence",
                state.silence_accumulated.as_millis()
            );
            state.is_speech_active = false;
            return EndpointEvent::SegmentEnd;
        }
        EndpointEvent::Silence
    }
}

/// Compute RMS energy of i16 samples normalized to \[-1, 1\].
pub fn compute_rms_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = f64::from(sample_to_f32(s));
            v * v
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn endpointer() -> EnergyEndpointer {
        EnergyEndpointer::new(&EndpointerConfig::default())
    }

    fn window(value: i16, len: usize, covered_ms: u64) -> AudioWindow {
        AudioWindow {
            samples: vec![value; len],
            covered: Duration::from_millis(covered_ms),
        }
    }

    #[test]
    fn rms_of_constant_signal() {
        let rms = compute_rms_energy(&[16_384; 64]);
        assert!((rms - 0.5).abs() < 1e-4);
        assert_eq!(compute_rms_energy(&[]), 0.0);
    }

    #[test]
    fn short_window_is_undecided() {
        let ep = endpointer();
        assert_eq!(ep.observe(&[20_000; 127]), None);

        let mut state = EndpointerState {
            is_speech_active: true,
            ..Default::default()
        };
        let event = ep.step(&mut state, &window(0, 10, 500));
        assert_eq!(event, EndpointEvent::Undecided);
        assert_eq!(state.silence_accumulated, Duration::ZERO);
    }

    #[test]
    fn silence_never_reports_speech() {
        let ep = endpointer();
        // 0.01 * 32768 ≈ 327; every amplitude at or below that is silence.
        for amplitude in [0_i16, 1, 50, 200, 300, 327, -327] {
            assert_eq!(ep.observe(&[amplitude; 128]), Some(false), "{amplitude}");
        }
        let alternating: Vec<i16> = (0..128).map(|i| if i % 2 == 0 { 300 } else { -300 }).collect();
        assert_eq!(ep.observe(&alternating), Some(false));
    }

    #[test]
    fn loud_window_reports_speech() {
        let ep = endpointer();
        assert_eq!(ep.observe(&[3_000; 128]), Some(true));
    }

    #[test]
    fn only_newest_window_counts() {
        let ep = endpointer();
        let mut samples = vec![10_000_i16; 256];
        samples.extend(vec![0_i16; 128]);
        assert_eq!(ep.observe(&samples), Some(false));
    }

    #[test]
    fn segment_ends_after_silence_limit() {
        let ep = endpointer();
        let mut state = EndpointerState::default();

        assert_eq!(ep.step(&mut state, &window(5_000, 128, 8)), EndpointEvent::SpeechOnset);
        assert_eq!(ep.step(&mut state, &window(5_000, 128, 8)), EndpointEvent::Speech);

        for _ in 0..3 {
            assert_eq!(ep.step(&mut state, &window(0, 128, 500)), EndpointEvent::Silence);
        }
        assert_eq!(ep.step(&mut state, &window(0, 128, 500)), EndpointEvent::SegmentEnd);
        assert!(!state.is_speech_active);
    }

    #[test]
    fn speech_resets_silence_timer() {
        let ep = endpointer();
        let mut state = EndpointerState::default();
        ep.step(&mut state, &window(5_000, 128, 8));
        ep.step(&mut state, &window(0, 128, 1_500));
        assert_eq!(state.silence_accumulated, Duration::from_millis(1_500));

        ep.step(&mut state, &window(5_000, 128, 8));
        assert_eq!(state.silence_accumulated, Duration::ZERO);
        assert_eq!(ep.step(&mut state, &window(0, 128, 1_500)), EndpointEvent::Silence);
    }

    #[test]
    fn silence_without_speech_never_ends_segment() {
        let ep = endpointer();
        let mut state = EndpointerState::default();
        for _ in 0..10 {
            assert_eq!(ep.step(&mut state, &window(0, 128, 1_000)), EndpointEvent::Silence);
        }
    }
}
