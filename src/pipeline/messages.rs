//! Message types passed between capture, the state machine, and the pipeline.

use std::time::Duration;

/// Finalized mono i16 audio at a fixed sample rate.
///
/// Produced by [`CaptureSession::stop`](crate::audio::capture::CaptureSession::stop)
/// or by synthesis. There is no mutable access to the samples once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn empty(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration of the buffer.
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// Samples as f32 in \[-1, 1\], for output devices.
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| sample_to_f32(s)).collect()
    }
}

/// The newest window of live microphone audio.
#[derive(Debug, Clone)]
pub struct AudioWindow {
    /// The most recent samples, oldest first. May be shorter than the
    /// configured window while the buffer is warming up.
    pub samples: Vec<i16>,
    /// Amount of new audio captured since the previous poll.
    pub covered: Duration,
}

/// Input to one pipeline run.
#[derive(Debug, Clone)]
pub enum TurnInput {
    /// A recorded user utterance; goes through transcription first.
    Utterance(AudioBuffer),
    /// Text that skips transcription (proactive prompts).
    Prompt(String),
}

/// How a pipeline run settled.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// A reply ready for delivery. `audio` is `None` for text-only delivery.
    Reply {
        /// Transcribed user text, when the input was an utterance.
        heard: Option<String>,
        text: String,
        audio: Option<AudioBuffer>,
    },
    /// Transcription came back empty; nothing was sent to chat.
    EmptyTranscription,
    /// One of the pipeline calls failed.
    Failed {
        /// User-facing description of the failure.
        message: String,
    },
}

pub(crate) fn sample_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32_768.0
}

pub(crate) fn f32_to_sample(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

pub(crate) fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(samples as u64 * 1_000_000 / u64::from(sample_rate))
}
