//! In-memory collaborators for exercising the engine without audio hardware
//! or speech services.
//!
//! Each mock is cheap to clone (or share behind an `Arc`) and records what it
//! was asked to do so tests can assert on it afterwards.

use crate::audio::capture::{InputStream, MicrophoneBackend, SampleSink};
use crate::audio::playback::PlaybackSink;
use crate::error::{Result, VoiceError};
use crate::pipeline::TurnPipeline;
use crate::pipeline::messages::AudioBuffer;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ─── ScriptedMicrophone ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MicState {
    devices: Vec<String>,
    fail_next_open: bool,
    sink: Option<SampleSink>,
    open_streams: usize,
    opens: usize,
}

/// A microphone whose samples are pushed by the test with [`feed`](Self::feed).
///
/// Clones share state, so a test keeps one clone while the capture session
/// owns another.
#[derive(Debug, Clone)]
pub struct ScriptedMicrophone {
    state: Arc<Mutex<MicState>>,
}

impl Default for ScriptedMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedMicrophone {
    /// A microphone exposing a single built-in device.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MicState {
                devices: vec!["Scripted Microphone".to_owned()],
                ..MicState::default()
            })),
        }
    }

    /// A host with no input devices at all.
    pub fn without_devices() -> Self {
        Self {
            state: Arc::new(Mutex::new(MicState::default())),
        }
    }

    /// Make the next `open` fail as if the device vanished.
    pub fn fail_next_open(&self) {
        locked(&self.state).fail_next_open = true;
    }

    /// Deliver samples to the currently open stream. Dropped when closed.
    pub fn feed(&self, samples: &[i16]) {
        let sink = locked(&self.state).sink.clone();
        if let Some(sink) = sink {
            sink.push(samples);
        }
    }

    /// Report a stream error on the open stream, as a device that fails
    /// mid-capture would.
    pub fn fail_stream(&self, reason: &str) {
        let sink = locked(&self.state).sink.clone();
        if let Some(sink) = sink {
            sink.fail(reason);
        }
    }

    /// Sink handed to the most recent `open`, even after it was closed.
    pub fn last_sink(&self) -> Option<SampleSink> {
        locked(&self.state).sink.clone()
    }

    /// Streams currently open.
    pub fn open_streams(&self) -> usize {
        locked(&self.state).open_streams
    }

    /// Total successful opens.
    pub fn opens(&self) -> usize {
        locked(&self.state).opens
    }
}

impl MicrophoneBackend for ScriptedMicrophone {
    fn list_devices(&self) -> Result<Vec<String>> {
        Ok(locked(&self.state).devices.clone())
    }

    fn open(
        &mut self,
        device: &str,
        _sample_rate: u32,
        sink: SampleSink,
    ) -> Result<Box<dyn InputStream>> {
        let mut state = locked(&self.state);
        if std::mem::take(&mut state.fail_next_open) {
            return Err(VoiceError::DeviceUnavailable(format!(
                "{device} disconnected"
            )));
        }
        state.sink = Some(sink);
        state.open_streams += 1;
        state.opens += 1;
        Ok(Box::new(ScriptedStream {
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedStream {
    state: Arc<Mutex<MicState>>,
}

impl InputStream for ScriptedStream {
    fn stop(self: Box<Self>) {
        let mut state = locked(&self.state);
        state.open_streams = state.open_streams.saturating_sub(1);
    }
}

// ─── MockPipeline ────────────────────────────────────────────────────────────

/// Canned speech services.
///
/// `converse` answers `"reply to: {text}"` and `synthesize` returns 100ms of
/// tone, unless configured to fail.
pub struct MockPipeline {
    transcript: String,
    fail_transcribe: bool,
    fail_converse: bool,
    fail_synthesize: bool,
    transcribed: Mutex<Vec<usize>>,
    conversed: Mutex<Vec<String>>,
    synthesize_calls: AtomicUsize,
    converse_held: AtomicBool,
    converse_gate: Notify,
}

impl Default for MockPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPipeline {
    pub fn new() -> Self {
        Self {
            transcript: "hello".to_owned(),
            fail_transcribe: false,
            fail_converse: false,
            fail_synthesize: false,
            transcribed: Mutex::new(Vec::new()),
            conversed: Mutex::new(Vec::new()),
            synthesize_calls: AtomicUsize::new(0),
            converse_held: AtomicBool::new(false),
            converse_gate: Notify::new(),
        }
    }

    /// Text returned by every `transcribe` call.
    pub fn with_transcript(mut self, text: &str) -> Self {
        self.transcript = text.to_owned();
        self
    }

    pub fn failing_transcribe(mut self) -> Self {
        self.fail_transcribe = true;
        self
    }

    pub fn failing_converse(mut self) -> Self {
        self.fail_converse = true;
        self
    }

    pub fn failing_synthesize(mut self) -> Self {
        self.fail_synthesize = true;
        self
    }

    /// Park `converse` until [`release_converse`](Self::release_converse).
    pub fn hold_converse(&self) {
        self.converse_held.store(true, Ordering::SeqCst);
    }

    pub fn release_converse(&self) {
        self.converse_held.store(false, Ordering::SeqCst);
        self.converse_gate.notify_one();
    }

    pub fn transcribe_calls(&self) -> usize {
        locked(&self.transcribed).len()
    }

    /// Sample count of every buffer passed to `transcribe`.
    pub fn transcribed_lengths(&self) -> Vec<usize> {
        locked(&self.transcribed).clone()
    }

    pub fn converse_calls(&self) -> usize {
        locked(&self.conversed).len()
    }

    /// Every text passed to `converse`, in order.
    pub fn conversed(&self) -> Vec<String> {
        locked(&self.conversed).clone()
    }

    pub fn synthesize_calls(&self) -> usize {
        self.synthesize_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TurnPipeline for MockPipeline {
    async fn transcribe(&self, audio: AudioBuffer) -> Result<String> {
        locked(&self.transcribed).push(audio.len());
        if self.fail_transcribe {
            return Err(VoiceError::Pipeline("speech service offline".into()));
        }
        Ok(self.transcript.clone())
    }

    async fn converse(&self, text: &str) -> Result<String> {
        locked(&self.conversed).push(text.to_owned());
        if self.converse_held.load(Ordering::SeqCst) {
            self.converse_gate.notified().await;
        }
        if self.fail_converse {
            return Err(VoiceError::Pipeline("chat service offline".into()));
        }
        Ok(format!("reply to: {text}"))
    }

    async fn synthesize(&self, _text: &str) -> Result<Option<AudioBuffer>> {
        self.synthesize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_synthesize {
            return Err(VoiceError::Pipeline("voice service offline".into()));
        }
        Ok(Some(AudioBuffer::new(vec![2_000; 1_600], 16_000)))
    }
}

// ─── RecordingPlayback ───────────────────────────────────────────────────────

/// Playback sink that records what it was given instead of making sound.
#[derive(Default)]
pub struct RecordingPlayback {
    displayed: Mutex<Vec<String>>,
    played: AtomicUsize,
    held: AtomicBool,
    gate: Notify,
}

impl RecordingPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `play` pending until [`release`](Self::release).
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.notify_one();
    }

    /// Every text shown, in order.
    pub fn displayed(&self) -> Vec<String> {
        locked(&self.displayed).clone()
    }

    /// Number of buffers handed to `play`.
    pub fn played(&self) -> usize {
        self.played.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackSink for RecordingPlayback {
    async fn play(&self, _audio: AudioBuffer) -> Result<()> {
        self.played.fetch_add(1, Ordering::SeqCst);
        if self.held.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        Ok(())
    }

    fn display_text(&self, text: &str) {
        locked(&self.displayed).push(text.to_owned());
    }
}
