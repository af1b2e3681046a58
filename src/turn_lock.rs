//! Single-flight gate shared by user sessions and proactive turns.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Who holds the turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TurnOwner {
    /// A wake-word session.
    User,
    /// A proactive trigger, by trigger id.
    Proactive(String),
}

impl fmt::Display for TurnOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Proactive(id) => write!(f, "proactive:{id}"),
        }
    }
}

/// Non-reentrant, single-holder lock. Clones share the same gate.
///
/// Acquisition never waits: a competitor gets `false` immediately.
#[derive(Debug, Clone, Default)]
pub struct TurnLock {
    holder: Arc<Mutex<Option<TurnOwner>>>,
}

impl TurnLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<TurnOwner>> {
        match self.holder.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Take the lock for `owner`. Returns `false` if anyone, including
    /// `owner` itself, already holds it.
    pub fn try_acquire(&self, owner: TurnOwner) -> bool {
        let mut slot = self.slot();
        if let Some(current) = slot.as_ref() {
            debug!("turn lock busy: {owner} denied, held by {current}");
            return false;
        }
        debug!("turn lock acquired by {owner}");
        *slot = Some(owner);
        true
    }

    /// Release the lock. Only the current holder may release; any other
    /// caller is refused and `false` is returned.
    pub fn release(&self, owner: &TurnOwner) -> bool {
        let mut slot = self.slot();
        match slot.as_ref() {
            Some(current) if current == owner => {
                *slot = None;
                debug!("turn lock released by {owner}");
                true
            }
            Some(current) => {
                warn!("turn lock release by {owner} refused, held by {current}");
                false
            }
            None => {
                warn!("turn lock release by {owner} refused, lock is free");
                false
            }
        }
    }

    pub fn holder(&self) -> Option<TurnOwner> {
        self.slot().clone()
    }

    pub fn is_held(&self) -> bool {
        self.slot().is_some()
    }

    pub fn is_held_by(&self, owner: &TurnOwner) -> bool {
        self.slot().as_ref() == Some(owner)
    }
}
