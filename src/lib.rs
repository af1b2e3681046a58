//! turnvox: turn-taking engine for voice assistants.
//!
//! Decides when the microphone listens, when an utterance has ended, when the
//! assistant may speak, and when the assistant may start a conversation on its
//! own:
//! Wake → Listen → Record → Transcribe/Converse/Synthesize → Speak → Listen | Idle
//!
//! # Architecture
//!
//! - **Audio capture**: one microphone stream at a time, via `cpal`
//! - **Endpointing**: energy-based speech onset and end-of-utterance detection
//! - **Dialogue**: a tick-driven state machine owning the session lifecycle
//! - **Turn lock**: single-flight gate shared by user and proactive turns
//! - **Scheduler**: time-of-day greetings and reminders
//! - **Coordinator**: the tokio control loop tying them together
//!
//! Speech-to-text, chat and text-to-speech are injected through
//! [`TurnPipeline`]; reply delivery through [`PlaybackSink`].

pub mod audio;
pub mod config;
pub mod coordinator;
pub mod dialogue;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod scheduler;
pub mod testing;
pub mod turn_lock;
pub mod vad;
pub mod wake;

pub use audio::capture::{CaptureSession, CpalMicrophone, MicrophoneBackend};
pub use audio::playback::{CpalPlayback, PlaybackSink};
pub use config::VoiceConfig;
pub use coordinator::VoiceCoordinator;
pub use dialogue::{DialogueState, DialogueStateMachine};
pub use error::{Result, VoiceError};
pub use pipeline::TurnPipeline;
pub use pipeline::messages::{AudioBuffer, TurnOutcome};
pub use runtime::RuntimeEvent;
pub use turn_lock::{TurnLock, TurnOwner};
pub use wake::WakeEvent;
