//! Runtime events emitted by the engine for UI and observability.
//!
//! Events are lightweight so the control loop can publish them on every
//! transition without stalling.

use crate::dialogue::DialogueState;
use crate::turn_lock::TurnOwner;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// The turn finished and no follow-up was expected.
    Completed,
    /// No interaction within the session timeout.
    Timeout,
    /// The microphone could not be opened.
    DeviceUnavailable,
    /// The engine shut down.
    Shutdown,
}

/// What the engine is doing right now.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A state transition.
    StateChanged {
        from: DialogueState,
        to: DialogueState,
    },
    /// A session started.
    SessionStarted {
        owner: TurnOwner,
        wake_phrase: String,
    },
    /// A session ended and the turn lock was released.
    SessionEnded {
        owner: TurnOwner,
        reason: SessionEndReason,
    },
    /// Whole seconds left before the listening session times out.
    SessionRemaining { secs: u64 },
    /// Text heard from the user.
    Transcription { text: String },
    /// Reply produced by the assistant.
    AssistantReply { text: String },
    /// A turn produced no transcription.
    NothingHeard,
    /// A user-visible error.
    TurnError { message: String },
}
