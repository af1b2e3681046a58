//! Dialogue sessions and the turn-taking state machine.

pub mod machine;

pub use machine::{DialogueEvent, DialogueStateMachine};

use crate::turn_lock::TurnOwner;
use std::fmt;
use std::time::{Duration, Instant};

/// Where the engine is in the listen → transcribe → think → speak cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialogueState {
    /// Waiting for a wake event. Microphone closed.
    Idle,
    /// Wake accepted; the microphone opens on the next tick.
    Woken,
    /// Microphone open, waiting for speech onset.
    Listening,
    /// Speech detected, accumulating the utterance.
    Recording,
    /// Utterance handed to the pipeline. Microphone closed.
    Processing,
    /// Reply being delivered.
    Speaking,
}

impl DialogueState {
    /// Whether the microphone may be open in this state.
    pub fn capture_allowed(self) -> bool {
        matches!(self, Self::Listening | Self::Recording)
    }
}

impl fmt::Display for DialogueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Woken => "woken",
            Self::Listening => "listening",
            Self::Recording => "recording",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
        };
        f.write_str(name)
    }
}

/// One live dialogue, from wake (or proactive start) until it ends.
#[derive(Debug, Clone)]
pub struct Session {
    /// Lock holder for this session.
    pub owner: TurnOwner,
    /// Phrase that woke the session.
    pub wake_phrase: String,
    pub started_at: Instant,
    last_interaction_at: Instant,
    generation: u64,
}

impl Session {
    fn new(owner: TurnOwner, wake_phrase: String, now: Instant, generation: u64) -> Self {
        Self {
            owner,
            wake_phrase,
            started_at: now,
            last_interaction_at: now,
            generation,
        }
    }

    pub fn last_interaction_at(&self) -> Instant {
        self.last_interaction_at
    }

    /// Stamp an interaction. Never moves the timestamp backwards.
    fn touch(&mut self, now: Instant) {
        if now > self.last_interaction_at {
            self.last_interaction_at = now;
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_interaction_at)
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn is_proactive(&self) -> bool {
        matches!(self.owner, TurnOwner::Proactive(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_is_monotonic() {
        let t0 = Instant::now();
        let mut session = Session::new(TurnOwner::User, "hello".into(), t0, 1);
        session.touch(t0 + Duration::from_secs(5));
        session.touch(t0 + Duration::from_secs(2));
        assert_eq!(session.last_interaction_at(), t0 + Duration::from_secs(5));
        assert_eq!(session.idle_for(t0 + Duration::from_secs(7)), Duration::from_secs(2));
        assert_eq!(session.idle_for(t0), Duration::ZERO);
    }

    #[test]
    fn only_listening_and_recording_allow_capture() {
        assert!(DialogueState::Listening.capture_allowed());
        assert!(DialogueState::Recording.capture_allowed());
        for state in [
            DialogueState::Idle,
            DialogueState::Woken,
            DialogueState::Processing,
            DialogueState::Speaking,
        ] {
            assert!(!state.capture_allowed(), "{state}");
        }
    }
}
