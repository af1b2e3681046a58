//! Tick-driven dialogue state machine.
//!
//! All transitions happen inside [`DialogueStateMachine::tick`] or the two
//! entry points ([`handle_wake`](DialogueStateMachine::handle_wake) and
//! [`begin_proactive_turn`](DialogueStateMachine::begin_proactive_turn)).
//! Pipeline runs and playback happen on spawned tasks and report back as
//! [`DialogueEvent`]s, which are drained at the start of the next tick.
//!
//! Each tick runs in a fixed order: drain completions, advance Woken or
//! endpoint the microphone, then check the session timeout.

use crate::audio::capture::CaptureSession;
use crate::audio::playback::PlaybackSink;
use crate::config::{DialogueConfig, VoiceConfig};
use crate::dialogue::{DialogueState, Session};
use crate::error::{Result, VoiceError};
use crate::pipeline::messages::{AudioBuffer, TurnInput, TurnOutcome};
use crate::pipeline::{TurnPipeline, run_turn};
use crate::runtime::{RuntimeEvent, SessionEndReason};
use crate::scheduler::ProactiveTurn;
use crate::turn_lock::{TurnLock, TurnOwner};
use crate::vad::{EndpointEvent, EndpointerState, EnergyEndpointer};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Completion of background work, tagged with the session and turn that
/// started it.
#[derive(Debug)]
pub enum DialogueEvent {
    PipelineSettled {
        generation: u64,
        turn: u64,
        outcome: TurnOutcome,
    },
    PlaybackFinished {
        generation: u64,
        turn: u64,
        result: std::result::Result<(), String>,
    },
}

impl DialogueEvent {
    fn ids(&self) -> (u64, u64) {
        match self {
            Self::PipelineSettled {
                generation, turn, ..
            }
            | Self::PlaybackFinished {
                generation, turn, ..
            } => (*generation, *turn),
        }
    }
}

/// Owns the microphone, the endpointer and the current session.
pub struct DialogueStateMachine {
    config: DialogueConfig,
    endpointer: EnergyEndpointer,
    endpoint_state: EndpointerState,
    capture: CaptureSession,
    lock: TurnLock,
    pipeline: Arc<dyn TurnPipeline>,
    playback: Arc<dyn PlaybackSink>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    events_tx: mpsc::UnboundedSender<DialogueEvent>,
    events_rx: mpsc::UnboundedReceiver<DialogueEvent>,
    state: DialogueState,
    session: Option<Session>,
    next_generation: u64,
    turn: u64,
    last_remaining_secs: Option<u64>,
}

impl DialogueStateMachine {
    pub fn new(
        config: &VoiceConfig,
        capture: CaptureSession,
        lock: TurnLock,
        pipeline: Arc<dyn TurnPipeline>,
        playback: Arc<dyn PlaybackSink>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config: config.dialogue.clone(),
            endpointer: EnergyEndpointer::new(&config.endpointer),
            endpoint_state: EndpointerState::default(),
            capture,
            lock,
            pipeline,
            playback,
            runtime_tx: None,
            events_tx,
            events_rx,
            state: DialogueState::Idle,
            session: None,
            next_generation: 1,
            turn: 0,
            last_remaining_secs: None,
        }
    }

    /// Publish transitions and session progress on `tx`.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = Some(tx);
        self
    }

    pub fn state(&self) -> DialogueState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn lock(&self) -> &TurnLock {
        &self.lock
    }

    /// Whether the microphone is open.
    pub fn is_capturing(&self) -> bool {
        self.capture.is_active()
    }

    /// Start a user session. Only honoured while Idle and when the turn lock
    /// is free; returns whether a session started.
    pub fn handle_wake(&mut self, phrase: &str, now: Instant) -> bool {
        if self.state != DialogueState::Idle {
            debug!("wake '{phrase}' ignored while {}", self.state);
            return false;
        }
        if !self.lock.try_acquire(TurnOwner::User) {
            let holder = self
                .lock
                .holder()
                .map(|h| h.to_string())
                .unwrap_or_default();
            info!("wake '{phrase}' ignored, turn held by {holder}");
            return false;
        }

        self.open_session(TurnOwner::User, phrase.to_owned(), now);
        self.transition(DialogueState::Woken);
        true
    }

    /// Run a proactive turn. The scheduler must already hold the turn lock
    /// for `turn`; the lock is released when the session ends.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::LockContention`] when the lock is not held for
    /// this turn or a session is already running.
    pub fn begin_proactive_turn(&mut self, turn: ProactiveTurn, now: Instant) -> Result<()> {
        let owner = turn.owner();
        if !self.lock.is_held_by(&owner) {
            return Err(VoiceError::LockContention {
                holder: self
                    .lock
                    .holder()
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "nobody".to_owned()),
            });
        }
        if self.state != DialogueState::Idle {
            self.lock.release(&owner);
            return Err(VoiceError::LockContention {
                holder: format!("{} session", self.state),
            });
        }

        info!("starting proactive turn {}", turn.trigger_id);
        self.open_session(owner, String::new(), now);
        self.transition(DialogueState::Processing);
        self.spawn_turn(TurnInput::Prompt(turn.prompt));
        Ok(())
    }

    /// Advance the machine by one control tick.
    pub fn tick(&mut self, now: Instant) {
        self.drain_events(now);

        match self.state {
            DialogueState::Woken => {
                self.touch(now);
                self.start_listening();
            }
            DialogueState::Listening | DialogueState::Recording => self.observe_audio(now),
            _ => {}
        }

        self.check_timeout(now);
        self.publish_remaining(now);
    }

    /// End any session, close the microphone and release the turn lock.
    pub fn shutdown(&mut self) {
        if self.session.is_some() || self.capture.is_active() {
            self.end_session(SessionEndReason::Shutdown);
        }
    }

    fn open_session(&mut self, owner: TurnOwner, wake_phrase: String, now: Instant) {
        let generation = self.next_generation;
        self.next_generation += 1;
        info!("session {generation} started for {owner}");
        self.emit(RuntimeEvent::SessionStarted {
            owner: owner.clone(),
            wake_phrase: wake_phrase.clone(),
        });
        self.session = Some(Session::new(owner, wake_phrase, now, generation));
        self.last_remaining_secs = None;
    }

    fn touch(&mut self, now: Instant) {
        if let Some(session) = self.session.as_mut() {
            session.touch(now);
        }
    }

    fn start_listening(&mut self) {
        match self.capture.start(false) {
            Ok(_) => {
                self.endpoint_state.reset();
                self.transition(DialogueState::Listening);
            }
            Err(e) => {
                error!("cannot open microphone: {e}");
                self.emit(RuntimeEvent::TurnError {
                    message: e.to_string(),
                });
                self.end_session(SessionEndReason::DeviceUnavailable);
            }
        }
    }

    fn observe_audio(&mut self, now: Instant) {
        if let Some(reason) = self.capture.failure() {
            error!("microphone failed while {}: {reason}", self.state);
            self.emit(RuntimeEvent::TurnError {
                message: format!("microphone failed: {reason}"),
            });
            self.end_session(SessionEndReason::DeviceUnavailable);
            return;
        }
        if self.state == DialogueState::Recording && self.capture.is_full() {
            info!("capture buffer full, ending utterance");
            self.finish_recording(now);
            return;
        }

        let Some(window) = self.capture.poll() else {
            return;
        };
        match self.endpointer.step(&mut self.endpoint_state, &window) {
            EndpointEvent::SpeechOnset if self.state == DialogueState::Listening => {
                self.touch(now);
                self.transition(DialogueState::Recording);
            }
            EndpointEvent::SpeechOnset | EndpointEvent::Speech
                if self.state == DialogueState::Recording =>
            {
                self.touch(now);
            }
            EndpointEvent::SegmentEnd if self.state == DialogueState::Recording => {
                self.finish_recording(now);
            }
            _ => {}
        }
    }

    fn finish_recording(&mut self, now: Instant) {
        let audio = self.capture.stop();
        self.endpoint_state.reset();
        self.touch(now);
        self.transition(DialogueState::Processing);
        info!("utterance of {}ms captured", audio.duration().as_millis());
        self.spawn_turn(TurnInput::Utterance(audio));
    }

    fn spawn_turn(&mut self, input: TurnInput) {
        let Some(generation) = self.session.as_ref().map(|s| s.generation) else {
            return;
        };
        self.turn += 1;
        let turn = self.turn;
        let pipeline = Arc::clone(&self.pipeline);
        let tx = self.events_tx.clone();
        let voice_replies = self.config.voice_replies;

        tokio::spawn(async move {
            let outcome = run_turn(pipeline.as_ref(), input, voice_replies).await;
            if tx
                .send(DialogueEvent::PipelineSettled {
                    generation,
                    turn,
                    outcome,
                })
                .is_err()
            {
                debug!("dialogue engine gone, turn {turn} result dropped");
            }
        });
    }

    fn spawn_playback(&mut self, audio: AudioBuffer) {
        let Some(generation) = self.session.as_ref().map(|s| s.generation) else {
            return;
        };
        let turn = self.turn;
        let playback = Arc::clone(&self.playback);
        let tx = self.events_tx.clone();

        tokio::spawn(async move {
            // A sink that panics must still end the Speaking state.
            let result = match tokio::spawn(async move { playback.play(audio).await }).await {
                Ok(played) => played.map_err(|e| e.to_string()),
                Err(e) => Err(format!("playback task failed: {e}")),
            };
            let _ = tx.send(DialogueEvent::PlaybackFinished {
                generation,
                turn,
                result,
            });
        });
    }

    fn drain_events(&mut self, now: Instant) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event, now);
        }
    }

    fn handle_event(&mut self, event: DialogueEvent, now: Instant) {
        let (generation, turn) = event.ids();
        let current = self.session.as_ref().map(|s| s.generation);
        if current != Some(generation) || turn != self.turn {
            debug!("discarding stale result of session {generation} turn {turn}");
            return;
        }

        match event {
            DialogueEvent::PipelineSettled { outcome, .. } => {
                if self.state == DialogueState::Processing {
                    self.on_turn_settled(outcome, now);
                }
            }
            DialogueEvent::PlaybackFinished { result, .. } => {
                if self.state != DialogueState::Speaking {
                    return;
                }
                if let Err(e) = result {
                    warn!("playback failed: {e}");
                }
                self.after_turn(now);
            }
        }
    }

    fn on_turn_settled(&mut self, outcome: TurnOutcome, now: Instant) {
        match outcome {
            TurnOutcome::Reply { heard, text, audio } => {
                if let Some(heard) = heard {
                    info!("heard: {heard}");
                    self.emit(RuntimeEvent::Transcription { text: heard });
                }
                self.playback.display_text(&text);
                self.emit(RuntimeEvent::AssistantReply { text });
                self.touch(now);
                self.transition(DialogueState::Speaking);
                match audio {
                    Some(audio) => self.spawn_playback(audio),
                    None => self.after_turn(now),
                }
            }
            TurnOutcome::EmptyTranscription => {
                info!("nothing heard");
                self.emit(RuntimeEvent::NothingHeard);
                let proactive = self.session.as_ref().is_some_and(Session::is_proactive);
                if self.config.continuous_dialogue && !proactive {
                    self.start_listening();
                } else {
                    self.end_session(SessionEndReason::Completed);
                }
            }
            TurnOutcome::Failed { message } => {
                self.playback.display_text(&message);
                self.emit(RuntimeEvent::TurnError { message });
                self.after_turn(now);
            }
        }
    }

    /// Decide between another listening round and ending the session.
    fn after_turn(&mut self, now: Instant) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let follow_up = self.config.continuous_dialogue
            && !session.is_proactive()
            && session.age(now) < self.config.session_timeout();
        if follow_up {
            self.start_listening();
        } else {
            self.end_session(SessionEndReason::Completed);
        }
    }

    fn check_timeout(&mut self, now: Instant) {
        if !matches!(
            self.state,
            DialogueState::Woken
                | DialogueState::Listening
                | DialogueState::Recording
                | DialogueState::Processing
        ) {
            return;
        }
        let Some(idle) = self.session.as_ref().map(|s| s.idle_for(now)) else {
            return;
        };
        if idle > self.config.session_timeout() {
            info!("session timed out after {}s without interaction", idle.as_secs());
            self.end_session(SessionEndReason::Timeout);
        }
    }

    fn publish_remaining(&mut self, now: Instant) {
        let remaining = match (&self.session, self.state) {
            (Some(session), DialogueState::Listening) => Some(
                self.config
                    .session_timeout()
                    .saturating_sub(session.idle_for(now))
                    .as_secs(),
            ),
            _ => None,
        };
        if remaining == self.last_remaining_secs {
            return;
        }
        self.last_remaining_secs = remaining;
        if let Some(secs) = remaining {
            self.emit(RuntimeEvent::SessionRemaining { secs });
        }
    }

    fn end_session(&mut self, reason: SessionEndReason) {
        drop(self.capture.stop());
        self.endpoint_state.reset();
        self.last_remaining_secs = None;

        if let Some(session) = self.session.take() {
            if !self.lock.release(&session.owner) {
                warn!("turn lock was not held by {}", session.owner);
            }
            info!("session {} ended: {reason:?}", session.generation);
            self.emit(RuntimeEvent::SessionEnded {
                owner: session.owner,
                reason,
            });
        }
        self.transition(DialogueState::Idle);
    }

    fn transition(&mut self, to: DialogueState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        debug!("dialogue {from} -> {to}");
        debug_assert!(
            to.capture_allowed() || !self.capture.is_active(),
            "microphone open in {to}"
        );
        self.emit(RuntimeEvent::StateChanged { from, to });
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.runtime_tx {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }
}

impl Drop for DialogueStateMachine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
