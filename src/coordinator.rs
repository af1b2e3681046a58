//! The control loop that drives a [`DialogueStateMachine`] and the
//! [`ProactiveScheduler`] from a single task.
//!
//! Wake events, trigger edits, the control tick and the proactive tick are
//! multiplexed with `tokio::select!`; nothing else touches the machine, so
//! transitions never race.

use crate::config::VoiceConfig;
use crate::dialogue::DialogueStateMachine;
use crate::error::Result;
use crate::scheduler::{ProactiveScheduler, TriggerCommand};
use crate::wake::{WakeEvent, WakeMatcher};
use chrono::NaiveDateTime;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WallClock = Box<dyn Fn() -> NaiveDateTime + Send>;

/// Owns the dialogue engine and runs it until cancelled.
pub struct VoiceCoordinator {
    config: VoiceConfig,
    machine: DialogueStateMachine,
    scheduler: Option<ProactiveScheduler>,
    matcher: WakeMatcher,
    cancel: CancellationToken,
    wake_rx: mpsc::Receiver<WakeEvent>,
    command_tx: mpsc::UnboundedSender<TriggerCommand>,
    command_rx: mpsc::UnboundedReceiver<TriggerCommand>,
    clock: WallClock,
}

impl VoiceCoordinator {
    /// Wire a coordinator around `machine`. The proactive scheduler shares
    /// the machine's turn lock and is only built when enabled in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured trigger table is invalid.
    pub fn new(
        config: VoiceConfig,
        machine: DialogueStateMachine,
        wake_rx: mpsc::Receiver<WakeEvent>,
    ) -> Result<Self> {
        let scheduler = if config.proactive.enabled {
            Some(ProactiveScheduler::from_config(
                &config.proactive,
                machine.lock().clone(),
            )?)
        } else {
            info!("proactive turns disabled");
            None
        };
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Ok(Self {
            matcher: WakeMatcher::new(&config.dialogue.wake_phrases),
            config,
            machine,
            scheduler,
            cancel: CancellationToken::new(),
            wake_rx,
            command_tx,
            command_rx,
            clock: Box::new(|| chrono::Local::now().naive_local()),
        })
    }

    /// Replace the local wall clock used for trigger evaluation.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Sender for runtime edits to the trigger table.
    pub fn trigger_commands(&self) -> mpsc::UnboundedSender<TriggerCommand> {
        self.command_tx.clone()
    }

    /// Request graceful shutdown of the loop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Get a clone of the cancellation token for external use.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled. The microphone is closed and the turn lock
    /// released before this returns.
    pub async fn run(mut self) {
        let mut control = tokio::time::interval(self.config.dialogue.control_tick());
        control.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut proactive = tokio::time::interval(self.config.proactive.tick_interval());
        proactive.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut wake_open = true;

        info!(
            "voice coordinator started (tick {}ms)",
            self.config.dialogue.control_tick().as_millis()
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                wake = self.wake_rx.recv(), if wake_open => match wake {
                    Some(event) => self.on_wake(event),
                    None => {
                        debug!("wake source closed");
                        wake_open = false;
                    }
                },
                Some(command) = self.command_rx.recv() => self.on_command(command),
                _ = control.tick() => self.machine.tick(now()),
                _ = proactive.tick(), if self.scheduler.is_some() => self.on_proactive_tick(),
            }
        }

        self.machine.shutdown();
        info!("voice coordinator stopped");
    }

    fn on_wake(&mut self, event: WakeEvent) {
        if !self.matcher.accepts(&event.phrase) {
            return;
        }
        self.machine.handle_wake(&event.phrase, now());
    }

    fn on_command(&mut self, command: TriggerCommand) {
        match self.scheduler.as_mut() {
            Some(scheduler) => scheduler.apply(command),
            None => warn!("trigger command ignored, proactive turns disabled"),
        }
    }

    fn on_proactive_tick(&mut self) {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };
        let Some(turn) = scheduler.tick((self.clock)()) else {
            return;
        };
        if let Err(e) = self.machine.begin_proactive_turn(turn, now()) {
            warn!("proactive turn not started: {e}");
        }
    }
}

/// Monotonic now from tokio's clock, so paused-time tests advance it.
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
