//! Microphone capture sessions.
//!
//! A [`CaptureSession`] owns at most one open input stream. Each start gets a
//! fresh [`SampleSink`]; stopping seals the sink so a late audio callback from
//! the old stream cannot append to the finalized buffer or to the next one.
//!
//! The `cpal` backend captures at the device's native rate and downsamples to
//! the configured rate (default 16kHz mono i16).

use crate::config::AudioConfig;
use crate::error::{Result, VoiceError};
use crate::pipeline::messages::{AudioBuffer, AudioWindow, f32_to_sample, samples_to_duration};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, TryLockError};
use tracing::{debug, error, info, warn};

/// Identifies one started capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureHandle(u64);

impl CaptureHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Sample storage for one capture, shared with the stream callback.
#[derive(Debug)]
struct CaptureBuffer {
    samples: VecDeque<i16>,
    capacity: usize,
    continuous: bool,
    sealed: bool,
    /// Samples accepted since start; never decreases.
    total_written: u64,
    /// First error reported by the stream.
    failure: Option<String>,
}

impl CaptureBuffer {
    fn new(capacity: usize, continuous: bool) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1 << 20)),
            capacity: capacity.max(1),
            continuous,
            sealed: false,
            total_written: 0,
            failure: None,
        }
    }

    fn push(&mut self, data: &[i16]) {
        if self.sealed {
            return;
        }
        for &sample in data {
            if self.samples.len() >= self.capacity {
                if !self.continuous {
                    return;
                }
                self.samples.pop_front();
            }
            self.samples.push_back(sample);
            self.total_written += 1;
        }
    }

    fn is_full(&self) -> bool {
        !self.continuous && self.samples.len() >= self.capacity
    }
}

/// Write side of a capture buffer, handed to the input stream.
#[derive(Debug, Clone)]
pub struct SampleSink {
    inner: Arc<Mutex<CaptureBuffer>>,
}

impl SampleSink {
    fn new(capacity: usize, continuous: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CaptureBuffer::new(capacity, continuous))),
        }
    }

    /// Append samples. Dropped silently once the capture has stopped.
    pub fn push(&self, data: &[i16]) {
        match self.inner.lock() {
            Ok(mut buf) => buf.push(data),
            Err(poisoned) => poisoned.into_inner().push(data),
        }
    }

    /// Whether the owning capture has stopped.
    pub fn is_sealed(&self) -> bool {
        match self.inner.lock() {
            Ok(buf) => buf.sealed,
            Err(poisoned) => poisoned.into_inner().sealed,
        }
    }

    /// Record a stream error. Only the first one is kept, and nothing is
    /// recorded once the capture has stopped.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut buf = match self.inner.lock() {
            Ok(b) => b,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !buf.sealed && buf.failure.is_none() {
            buf.failure = Some(reason.into());
        }
    }

    fn seal_and_take(&self) -> Vec<i16> {
        let mut buf = match self.inner.lock() {
            Ok(b) => b,
            Err(poisoned) => poisoned.into_inner(),
        };
        buf.sealed = true;
        std::mem::take(&mut buf.samples).into()
    }
}

/// An open input stream. Stopping must not return until the device has
/// stopped delivering samples.
pub trait InputStream: Send {
    fn stop(self: Box<Self>);
}

/// Source of microphone streams.
pub trait MicrophoneBackend: Send {
    /// List input device names.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    fn list_devices(&self) -> Result<Vec<String>>;

    /// Open `device` and start feeding mono i16 samples at `sample_rate` into `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::DeviceUnavailable`] when the device cannot be opened.
    fn open(
        &mut self,
        device: &str,
        sample_rate: u32,
        sink: SampleSink,
    ) -> Result<Box<dyn InputStream>>;
}

struct ActiveCapture {
    handle: CaptureHandle,
    stream: Box<dyn InputStream>,
    sink: SampleSink,
    /// `total_written` value at the last poll.
    read_mark: u64,
}

/// Exclusive owner of the microphone for one dialogue engine.
pub struct CaptureSession {
    backend: Box<dyn MicrophoneBackend>,
    device: Option<String>,
    sample_rate: u32,
    capacity: usize,
    window_size: usize,
    active: Option<ActiveCapture>,
    next_handle: u64,
}

impl CaptureSession {
    pub fn new(backend: Box<dyn MicrophoneBackend>, config: &AudioConfig, window_size: usize) -> Self {
        Self {
            backend,
            device: config.input_device.clone(),
            sample_rate: config.sample_rate,
            capacity: config.capture_capacity(),
            window_size: window_size.max(1),
            active: None,
            next_handle: 1,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// List input devices through the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_devices(&self) -> Result<Vec<String>> {
        self.backend.list_devices()
    }

    /// Open the microphone. An already-open stream is stopped first.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::DeviceUnavailable`] when there is no usable device.
    pub fn start(&mut self, continuous: bool) -> Result<CaptureHandle> {
        if let Some(prev) = self.active.as_ref() {
            debug!("stopping capture {} before restart", prev.handle.id());
            drop(self.stop());
        }

        let devices = self
            .backend
            .list_devices()
            .map_err(|e| VoiceError::DeviceUnavailable(format!("cannot enumerate devices: {e}")))?;
        let device = match &self.device {
            Some(name) if devices.iter().any(|d| d == name) => name.clone(),
            Some(name) => {
                return Err(VoiceError::DeviceUnavailable(format!(
                    "input device '{name}' not found"
                )));
            }
            None => devices
                .first()
                .cloned()
                .ok_or_else(|| VoiceError::DeviceUnavailable("no input devices".into()))?,
        };

        let sink = SampleSink::new(self.capacity, continuous);
        let stream = self
            .backend
            .open(&device, self.sample_rate, sink.clone())
            .map_err(|e| match e {
                VoiceError::DeviceUnavailable(_) => e,
                other => VoiceError::DeviceUnavailable(other.to_string()),
            })?;

        let handle = CaptureHandle(self.next_handle);
        self.next_handle += 1;
        info!(
            "capture {} started on '{device}' (continuous={continuous})",
            handle.id()
        );
        self.active = Some(ActiveCapture {
            handle,
            stream,
            sink,
            read_mark: 0,
        });
        Ok(handle)
    }

    /// Close the stream and return everything captured since `start`.
    /// Returns an empty buffer when nothing is open.
    pub fn stop(&mut self) -> AudioBuffer {
        let Some(active) = self.active.take() else {
            return AudioBuffer::empty(self.sample_rate);
        };
        active.stream.stop();
        let samples = active.sink.seal_and_take();
        let buffer = AudioBuffer::new(samples, self.sample_rate);
        debug!(
            "capture {} stopped with {}ms of audio",
            active.handle.id(),
            buffer.duration().as_millis()
        );
        buffer
    }

    /// Newest unread window, without blocking. `None` when nothing new has
    /// arrived, nothing is open, or the audio thread holds the buffer.
    pub fn poll(&mut self) -> Option<AudioWindow> {
        let window_size = self.window_size;
        let sample_rate = self.sample_rate;
        let active = self.active.as_mut()?;
        let buf = match active.sink.inner.try_lock() {
            Ok(b) => b,
            Err(TryLockError::WouldBlock) => return None,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        if buf.total_written == active.read_mark {
            return None;
        }
        let fresh = buf.total_written - active.read_mark;
        active.read_mark = buf.total_written;

        let take = window_size.min(buf.samples.len());
        let samples: Vec<i16> = buf.samples.range(buf.samples.len() - take..).copied().collect();
        Some(AudioWindow {
            samples,
            covered: samples_to_duration(fresh as usize, sample_rate),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Error reported by the open stream, if it has failed since `start`.
    pub fn failure(&self) -> Option<String> {
        let active = self.active.as_ref()?;
        match active.sink.inner.lock() {
            Ok(buf) => buf.failure.clone(),
            Err(poisoned) => poisoned.into_inner().failure.clone(),
        }
    }

    /// A non-continuous capture that has reached its capacity.
    pub fn is_full(&self) -> bool {
        self.active.as_ref().is_some_and(|a| match a.sink.inner.try_lock() {
            Ok(buf) => buf.is_full(),
            Err(_) => false,
        })
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.active.is_some() {
            warn!("capture session dropped while open, closing microphone");
            drop(self.stop());
        }
    }
}

// -- cpal backend --

/// Microphone backend on the default `cpal` host.
///
/// The `cpal::Stream` lives on a dedicated thread; stopping joins that thread
/// so no callback can run after [`InputStream::stop`] returns.
#[derive(Debug, Default)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

impl MicrophoneBackend for CpalMicrophone {
    fn list_devices(&self) -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| VoiceError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }

    fn open(
        &mut self,
        device: &str,
        sample_rate: u32,
        sink: SampleSink,
    ) -> Result<Box<dyn InputStream>> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let name = device.to_owned();

        let thread = std::thread::Builder::new()
            .name("turnvox-capture".into())
            .spawn(move || match build_input_stream(&name, sample_rate, sink) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Hold the stream alive until stopped or the handle is dropped.
                    let _ = stop_rx.recv();
                    drop(stream);
                    info!("audio capture stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalInputStream {
                stop_tx,
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(VoiceError::DeviceUnavailable(
                "capture thread exited before the stream started".into(),
            )),
        }
    }
}

struct CpalInputStream {
    stop_tx: crossbeam_channel::Sender<()>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl InputStream for CpalInputStream {
    fn stop(mut self: Box<Self>) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("capture thread panicked");
        }
    }
}

fn build_input_stream(name: &str, target_rate: u32, sink: SampleSink) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .input_devices()
        .map_err(|e| VoiceError::DeviceUnavailable(format!("cannot enumerate devices: {e}")))?
        .find(|d| {
            d.description()
                .ok()
                .map(|desc| desc.name() == name)
                .unwrap_or(false)
        })
        .ok_or_else(|| VoiceError::DeviceUnavailable(format!("input device '{name}' not found")))?;

    let default_config = device
        .default_input_config()
        .map_err(|e| VoiceError::DeviceUnavailable(format!("no default input config: {e}")))?;

    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels();
    let stream_config = StreamConfig {
        channels: native_channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        "input '{name}': native {}Hz, {} channels -> {}Hz mono",
        native_rate, native_channels, target_rate
    );

    let error_sink = sink.clone();
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if native_channels > 1 {
                    to_mono(data, native_channels)
                } else {
                    data.to_vec()
                };
                let resampled = downsample(&mono, native_rate, target_rate);
                let samples: Vec<i16> = resampled.into_iter().map(f32_to_sample).collect();
                sink.push(&samples);
            },
            move |err| {
                error!("audio input stream error: {err}");
                error_sink.fail(err.to_string());
            },
            None,
        )
        .map_err(|e| VoiceError::DeviceUnavailable(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| VoiceError::DeviceUnavailable(format!("failed to start input stream: {e}")))?;

    Ok(stream)
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler. Speech energy sits below 8kHz, so no
/// anti-alias filter is applied for 48kHz → 16kHz.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[idx + 1]) * frac
        } else {
            f64::from(samples[idx.min(samples.len() - 1)])
        };
        output.push(sample as f32);
    }

    output
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::testing::ScriptedMicrophone;
    use std::time::Duration;

    fn session(mic: &ScriptedMicrophone) -> CaptureSession {
        let config = AudioConfig {
            capture_max_secs: 1,
            ..AudioConfig::default()
        };
        CaptureSession::new(Box::new(mic.clone()), &config, 128)
    }

    #[test]
    fn stop_without_start_returns_empty_buffer() {
        let mic = ScriptedMicrophone::new();
        let mut capture = session(&mic);
        let buf = capture.stop();
        assert!(buf.is_empty());
        assert_eq!(buf.sample_rate(), 16_000);
        assert!(!capture.is_active());
    }

    #[test]
    fn start_fails_without_devices() {
        let mic = ScriptedMicrophone::without_devices();
        let mut capture = session(&mic);
        let err = capture.start(false).unwrap_err();
        assert!(matches!(err, VoiceError::DeviceUnavailable(_)));
        assert!(!capture.is_active());
    }

    #[test]
    fn open_failure_maps_to_device_unavailable() {
        let mic = ScriptedMicrophone::new();
        mic.fail_next_open();
        let mut capture = session(&mic);
        assert!(matches!(
            capture.start(false),
            Err(VoiceError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn configured_device_must_exist() {
        let mic = ScriptedMicrophone::new();
        let config = AudioConfig {
            input_device: Some("USB Mic".into()),
            ..AudioConfig::default()
        };
        let mut capture = CaptureSession::new(Box::new(mic), &config, 128);
        assert!(matches!(
            capture.start(false),
            Err(VoiceError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn stop_returns_everything_since_start() {
        let mic = ScriptedMicrophone::new();
        let mut capture = session(&mic);
        capture.start(false).unwrap();
        mic.feed(&[100; 200]);
        mic.feed(&[-100; 56]);

        let buf = capture.stop();
        assert_eq!(buf.len(), 256);
        assert_eq!(buf.samples()[0], 100);
        assert_eq!(buf.samples()[255], -100);
        assert_eq!(mic.open_streams(), 0);
    }

    #[test]
    fn buffer_is_immutable_after_stop() {
        let mic = ScriptedMicrophone::new();
        let mut capture = session(&mic);
        capture.start(false).unwrap();
        mic.feed(&[7; 64]);
        let stale_sink = mic.last_sink().unwrap();

        let buf = capture.stop();
        stale_sink.push(&[9; 64]);

        assert_eq!(buf.len(), 64);
        assert!(stale_sink.is_sealed());
        assert!(capture.poll().is_none());
    }

    #[test]
    fn restart_stops_previous_stream_without_leakage() {
        let mic = ScriptedMicrophone::new();
        let mut capture = session(&mic);
        let first = capture.start(false).unwrap();
        mic.feed(&[1_000; 300]);
        let first_sink = mic.last_sink().unwrap();

        let second = capture.start(false).unwrap();
        assert_ne!(first, second);
        assert_eq!(mic.open_streams(), 1, "never two streams at once");
        assert_eq!(mic.opens(), 2);

        // A late callback from the first stream must not reach the new buffer.
        first_sink.push(&[5_000; 300]);
        mic.feed(&[2; 10]);

        let buf = capture.stop();
        assert_eq!(buf.samples(), &[2; 10]);
    }

    #[test]
    fn poll_returns_newest_unread_window() {
        let mic = ScriptedMicrophone::new();
        let mut capture = session(&mic);
        assert!(capture.poll().is_none());

        capture.start(false).unwrap();
        assert!(capture.poll().is_none(), "nothing captured yet");

        mic.feed(&[1; 100]);
        mic.feed(&[2; 100]);
        let window = capture.poll().unwrap();
        assert_eq!(window.samples.len(), 128);
        assert_eq!(window.samples[127], 2);
        assert_eq!(window.samples[0], 1);
        assert_eq!(window.covered, Duration::from_micros(200 * 1_000_000 / 16_000));

        assert!(capture.poll().is_none(), "window already read");
    }

    #[test]
    fn poll_during_warm_up_returns_short_window() {
        let mic = ScriptedMicrophone::new();
        let mut capture = session(&mic);
        capture.start(false).unwrap();
        mic.feed(&[3; 40]);
        let window = capture.poll().unwrap();
        assert_eq!(window.samples.len(), 40);
    }

    #[test]
    fn non_continuous_capture_stops_at_capacity() {
        let mic = ScriptedMicrophone::new();
        let mut capture = session(&mic);
        capture.start(false).unwrap();
        mic.feed(&vec![4; 16_500]);
        assert!(capture.is_full());
        assert_eq!(capture.stop().len(), 16_000);
    }

    #[test]
    fn continuous_capture_keeps_newest_samples() {
        let mic = ScriptedMicrophone::new();
        let mut capture = session(&mic);
        capture.start(true).unwrap();
        mic.feed(&vec![1; 16_000]);
        mic.feed(&[9; 100]);
        assert!(!capture.is_full());

        let buf = capture.stop();
        assert_eq!(buf.len(), 16_000);
        assert_eq!(buf.samples()[15_999], 9);
        assert_eq!(buf.samples()[0], 1);
    }

    #[test]
    fn drop_closes_open_stream() {
        let mic = ScriptedMicrophone::new();
        {
            let mut capture = session(&mic);
            capture.start(false).unwrap();
            assert_eq!(mic.open_streams(), 1);
        }
        assert_eq!(mic.open_streams(), 0);
    }

    #[test]
    fn stream_failure_is_reported_until_stop() {
        let mic = ScriptedMicrophone::new();
        let mut capture = session(&mic);
        assert!(capture.failure().is_none());

        capture.start(false).unwrap();
        assert!(capture.failure().is_none());
        mic.fail_stream("device unplugged");
        mic.fail_stream("second error");
        assert_eq!(capture.failure().as_deref(), Some("device unplugged"));

        drop(capture.stop());
        assert!(capture.failure().is_none());

        capture.start(false).unwrap();
        assert!(capture.failure().is_none(), "a new stream starts clean");
    }

    #[test]
    fn to_mono_averages_channels() {
        let mono = to_mono(&[0.2, 0.4, -1.0, 1.0], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }

    #[test]
    fn downsample_48k_to_16k_keeps_one_in_three() {
        let input: Vec<f32> = (0..48).map(|i| i as f32).collect();
        let out = downsample(&input, 48_000, 16_000);
        assert_eq!(out.len(), 16);
        assert!((out[1] - 3.0).abs() < 1e-6);
        assert_eq!(downsample(&input, 16_000, 16_000), input);
    }
}
