//! Proactive turns: scheduled greetings and reminders.

pub mod runner;
pub mod triggers;

pub use runner::{ProactiveScheduler, TriggerCommand};
pub use triggers::{ProactiveTurn, TimeOfDay, Trigger, TriggerKind, TriggerRegistry};
