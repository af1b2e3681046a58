//! Shared helpers for integration tests.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use turnvox::config::{EndpointerConfig, VoiceConfig};
use turnvox::runtime::RuntimeEvent;
use turnvox::testing::{MockPipeline, RecordingPlayback, ScriptedMicrophone};
use turnvox::{CaptureSession, DialogueState, DialogueStateMachine, TurnLock};

pub(crate) const LOUD: i16 = 6_000;

/// A state machine wired to mock collaborators, with a fixed time origin.
pub(crate) struct Engine {
    pub machine: DialogueStateMachine,
    pub mic: ScriptedMicrophone,
    pub pipeline: Arc<MockPipeline>,
    pub playback: Arc<RecordingPlayback>,
    pub lock: TurnLock,
    pub events: broadcast::Receiver<RuntimeEvent>,
    pub t0: Instant,
}

/// Defaults, except a 250ms end-of-utterance silence limit.
pub(crate) fn fast_config() -> VoiceConfig {
    VoiceConfig {
        endpointer: EndpointerConfig {
            recording_silence_limit_ms: 250,
            ..EndpointerConfig::default()
        },
        ..VoiceConfig::default()
    }
}

pub(crate) fn engine(config: &VoiceConfig, pipeline: MockPipeline) -> Engine {
    let mic = ScriptedMicrophone::new();
    let capture = CaptureSession::new(
        Box::new(mic.clone()),
        &config.audio,
        config.endpointer.window_size,
    );
    let pipeline = Arc::new(pipeline);
    let playback = Arc::new(RecordingPlayback::new());
    let lock = TurnLock::new();
    let (tx, events) = broadcast::channel(256);
    let machine = DialogueStateMachine::new(
        config,
        capture,
        lock.clone(),
        pipeline.clone(),
        playback.clone(),
    )
    .with_runtime_events(tx);
    Engine {
        machine,
        mic,
        pipeline,
        playback,
        lock,
        events,
        t0: Instant::now(),
    }
}

impl Engine {
    pub(crate) fn at(&self, millis: u64) -> Instant {
        self.t0 + Duration::from_millis(millis)
    }

    pub(crate) fn tick(&mut self, millis: u64) {
        let now = self.at(millis);
        self.machine.tick(now);
    }

    /// Speech followed by enough silence to end the utterance. Expects the
    /// machine to be Listening; leaves it Processing.
    pub(crate) fn utterance(&mut self, start_ms: u64, speech_samples: usize) {
        assert_eq!(self.machine.state(), DialogueState::Listening);
        self.mic.feed(&vec![LOUD; speech_samples]);
        self.tick(start_ms);
        assert_eq!(self.machine.state(), DialogueState::Recording);
        self.mic.feed(&[0; 4_000]);
        self.tick(start_ms + 250);
        assert_eq!(self.machine.state(), DialogueState::Processing);
    }

    /// Tick at `millis` until `state` is reached, yielding to spawned tasks.
    pub(crate) async fn settle(&mut self, millis: u64, state: DialogueState) {
        for _ in 0..50 {
            tokio::task::yield_now().await;
            self.tick(millis);
            if self.machine.state() == state {
                return;
            }
        }
        panic!("stuck in {} waiting for {state}", self.machine.state());
    }

    pub(crate) fn drain_events(&mut self) -> Vec<RuntimeEvent> {
        let mut events = Vec::new();
        while let Ok(evt) = self.events.try_recv() {
            events.push(evt);
        }
        events
    }
}
