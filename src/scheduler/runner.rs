//! Proactive scheduler.
//!
//! On each tick the trigger table is walked in order. The first trigger that
//! is due tries the turn lock; if the lock is busy the trigger is dropped for
//! this tick rather than queued. Fired-today state is optionally persisted to
//! a JSON file so a restart does not repeat the morning greeting.

use crate::config::ProactiveConfig;
use crate::error::{Result, VoiceError};
use crate::scheduler::triggers::{
    ProactiveTurn, Trigger, TriggerDecision, TriggerRegistry, evaluate,
};
use crate::turn_lock::{TurnLock, TurnOwner};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, error, info};

/// Runtime edits to the trigger table.
#[derive(Debug, Clone)]
pub enum TriggerCommand {
    /// Add a trigger, replacing one with the same id.
    Add(Trigger),
    Disable(String),
    Remove(String),
}

/// Persisted per-trigger state.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TriggerState {
    id: String,
    enabled: bool,
    #[serde(default)]
    last_fired: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SchedulerState {
    #[serde(default = "default_state_version")]
    version: u8,
    #[serde(default)]
    triggers: Vec<TriggerState>,
}

fn default_state_version() -> u8 {
    1
}

/// Proposes proactive turns from a [`TriggerRegistry`].
pub struct ProactiveScheduler {
    registry: TriggerRegistry,
    lock: TurnLock,
    state_path: Option<PathBuf>,
}

impl ProactiveScheduler {
    pub fn new(registry: TriggerRegistry, lock: TurnLock) -> Self {
        Self {
            registry,
            lock,
            state_path: None,
        }
    }

    /// Build from config, restoring persisted state when a state path is set.
    ///
    /// # Errors
    ///
    /// Returns an error when the trigger table in `config` is invalid.
    pub fn from_config(config: &ProactiveConfig, lock: TurnLock) -> Result<Self> {
        let registry = TriggerRegistry::from_config(config)?;
        let mut scheduler = Self::new(registry, lock);
        if let Some(path) = &config.state_path {
            scheduler = scheduler.with_state_path(path.clone());
            scheduler.load_state();
        }
        info!(
            "proactive scheduler ready with {} triggers",
            scheduler.registry.len()
        );
        Ok(scheduler)
    }

    /// Persist trigger state to `path` after every change.
    pub fn with_state_path(mut self, path: PathBuf) -> Self {
        self.state_path = Some(path);
        self
    }

    pub fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    /// Evaluate triggers at local time `now`. Returns at most one turn; the
    /// caller owns the acquired lock until the turn ends.
    pub fn tick(&mut self, now: NaiveDateTime) -> Option<ProactiveTurn> {
        let (index, disable_after) =
            self.registry
                .triggers()
                .iter()
                .enumerate()
                .find_map(|(i, t)| match evaluate(t, &now) {
                    TriggerDecision::Fire { disable_after } => Some((i, disable_after)),
                    TriggerDecision::Skip => None,
                })?;

        let trigger = &mut self.registry.triggers_mut()[index];
        let owner = TurnOwner::Proactive(trigger.id.clone());
        if !self.lock.try_acquire(owner) {
            debug!("trigger {} skipped this tick, a turn is in progress", trigger.id);
            return None;
        }

        trigger.last_fired = Some(now.date());
        if disable_after {
            trigger.enabled = false;
        }
        let turn = ProactiveTurn {
            trigger_id: trigger.id.clone(),
            prompt: trigger.render_prompt(&now),
        };
        info!("trigger {} fired at {}", trigger.id, trigger.at);

        self.save_state();
        Some(turn)
    }

    /// Apply a runtime edit to the trigger table.
    pub fn apply(&mut self, command: TriggerCommand) {
        match command {
            TriggerCommand::Add(trigger) => {
                info!("trigger {} added at {}", trigger.id, trigger.at);
                self.registry.add(trigger);
            }
            TriggerCommand::Disable(id) => {
                if !self.registry.disable(&id) {
                    debug!("disable: no trigger {id}");
                    return;
                }
                info!("trigger {id} disabled");
            }
            TriggerCommand::Remove(id) => {
                if !self.registry.remove(&id) {
                    debug!("remove: no trigger {id}");
                    return;
                }
                info!("trigger {id} removed");
            }
        }
        self.save_state();
    }

    /// Default location of the scheduler state file.
    pub fn default_state_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("turnvox").join("proactive.json"))
    }

    fn load_state(&mut self) {
        let state = match load_state_from_path(self.state_path.as_ref()) {
            Ok(state) => state,
            Err(e) => {
                error!("cannot load scheduler state: {e}");
                return;
            }
        };
        for saved in state.triggers {
            if let Some(trigger) = self.registry.get_mut(&saved.id) {
                trigger.enabled = saved.enabled;
                trigger.last_fired = saved.last_fired;
            }
        }
    }

    fn save_state(&self) {
        let state = SchedulerState {
            version: default_state_version(),
            triggers: self
                .registry
                .triggers()
                .iter()
                .map(|t| TriggerState {
                    id: t.id.clone(),
                    enabled: t.enabled,
                    last_fired: t.last_fired,
                })
                .collect(),
        };
        if let Err(e) = save_state_to_path(self.state_path.as_ref(), &state) {
            error!("cannot persist scheduler state: {e}");
        }
    }
}

fn load_state_from_path(path: Option<&PathBuf>) -> Result<SchedulerState> {
    let Some(path) = path else {
        return Ok(SchedulerState::default());
    };

    let bytes = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(SchedulerState::default());
        }
        Err(e) => return Err(VoiceError::Scheduler(format!("cannot read state: {e}"))),
    };

    serde_json::from_slice(&bytes)
        .map_err(|e| VoiceError::Scheduler(format!("cannot parse state: {e}")))
}

fn save_state_to_path(path: Option<&PathBuf>, state: &SchedulerState) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| VoiceError::Scheduler(format!("cannot create state dir: {e}")))?;
    }

    let json = serde_json::to_string_pretty(state)
        .map_err(|e| VoiceError::Scheduler(format!("cannot serialize state: {e}")))?;
    std::fs::write(path, json)
        .map_err(|e| VoiceError::Scheduler(format!("cannot write state: {e}")))?;
    Ok(())
}
