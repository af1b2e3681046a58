//! Proactive trigger definitions and the pure fire/skip decision.
//!
//! A [`Trigger`] names a local time of day and a prompt template. Whether it
//! fires at a given instant is decided by [`evaluate`], which has no side
//! effects; the scheduler applies the outcome.

use crate::config::ProactiveConfig;
use crate::error::{Result, VoiceError};
use crate::turn_lock::TurnOwner;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known id of the built-in morning greeting.
pub const MORNING_GREETING_ID: &str = "morning_greeting";

/// Well-known id of the built-in evening greeting.
pub const EVENING_GREETING_ID: &str = "evening_greeting";

const MORNING_TEMPLATE: &str = "It is {time} on {weekday}, {date}. Greet the user with a short, \
     warm good-morning message, under 20 words.";

const EVENING_TEMPLATE: &str = "It is {time} in the evening. Wish the user a relaxing evening and \
     briefly ask how their day went, under 20 words.";

const REMINDER_TEMPLATE: &str =
    "Gently remind the user: {content}. Keep it natural and friendly, under 20 words.";

/// Hour and minute in local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    /// # Errors
    ///
    /// Returns [`VoiceError::Config`] when hour > 23 or minute > 59.
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(VoiceError::Config(format!(
                "invalid time of day {hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Whether `now` falls inside this minute.
    pub fn matches(&self, now: &NaiveDateTime) -> bool {
        now.hour() == u32::from(self.hour) && now.minute() == u32::from(self.minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// What a trigger is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    Greeting,
    Reminder {
        /// What to remind the user about; fills `{content}`.
        content: String,
    },
}

/// A scheduled proactive turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Unique id; also the proactive turn owner id.
    pub id: String,
    pub at: TimeOfDay,
    pub kind: TriggerKind,
    /// Prompt sent to chat. Supports `{time}`, `{date}`, `{weekday}`, `{content}`.
    pub prompt_template: String,
    /// Fire every day; otherwise disable after the first firing.
    pub repeat_daily: bool,
    pub enabled: bool,
    /// Local date of the last firing.
    #[serde(default)]
    pub last_fired: Option<NaiveDate>,
}

impl Trigger {
    pub fn greeting(id: impl Into<String>, at: TimeOfDay, prompt_template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            at,
            kind: TriggerKind::Greeting,
            prompt_template: prompt_template.into(),
            repeat_daily: true,
            enabled: true,
            last_fired: None,
        }
    }

    pub fn reminder(
        id: impl Into<String>,
        content: impl Into<String>,
        at: TimeOfDay,
        repeat_daily: bool,
    ) -> Self {
        Self {
            id: id.into(),
            at,
            kind: TriggerKind::Reminder {
                content: content.into(),
            },
            prompt_template: REMINDER_TEMPLATE.to_owned(),
            repeat_daily,
            enabled: true,
            last_fired: None,
        }
    }

    /// Fill the prompt template for a firing at `now`.
    pub fn render_prompt(&self, now: &NaiveDateTime) -> String {
        let content = match &self.kind {
            TriggerKind::Reminder { content } => content.as_str(),
            TriggerKind::Greeting => "",
        };
        self.prompt_template
            .replace("{time}", &now.format("%H:%M").to_string())
            .replace("{date}", &now.format("%B %-d").to_string())
            .replace("{weekday}", &now.format("%A").to_string())
            .replace("{content}", content)
    }
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    Skip,
    /// Fire now; `disable_after` for one-shot reminders.
    Fire { disable_after: bool },
}

/// Decide whether `trigger` fires at `now`. Pure.
pub fn evaluate(trigger: &Trigger, now: &NaiveDateTime) -> TriggerDecision {
    if !trigger.enabled || !trigger.at.matches(now) {
        return TriggerDecision::Skip;
    }
    if trigger.last_fired == Some(now.date()) {
        return TriggerDecision::Skip;
    }
    TriggerDecision::Fire {
        disable_after: !trigger.repeat_daily,
    }
}

/// A turn the scheduler wants the dialogue engine to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProactiveTurn {
    pub trigger_id: String,
    /// Rendered prompt, treated as already-transcribed user text.
    pub prompt: String,
}

impl ProactiveTurn {
    pub fn owner(&self) -> TurnOwner {
        TurnOwner::Proactive(self.trigger_id.clone())
    }
}

/// Ordered trigger table. Order is evaluation order.
#[derive(Debug, Clone, Default)]
pub struct TriggerRegistry {
    triggers: Vec<Trigger>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from config: greetings first, then reminders in order.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Config`] for an out-of-range hour or minute.
    pub fn from_config(config: &ProactiveConfig) -> Result<Self> {
        let mut registry = Self::new();
        if config.greetings {
            registry.add(Trigger::greeting(
                MORNING_GREETING_ID,
                TimeOfDay::new(config.morning_hour, 0)?,
                MORNING_TEMPLATE,
            ));
            registry.add(Trigger::greeting(
                EVENING_GREETING_ID,
                TimeOfDay::new(config.evening_hour, 0)?,
                EVENING_TEMPLATE,
            ));
        }
        for reminder in &config.reminders {
            let mut trigger = Trigger::reminder(
                reminder.trigger_id(),
                reminder.content.clone(),
                TimeOfDay::new(reminder.hour, reminder.minute)?,
                reminder.repeat_daily,
            );
            trigger.enabled = reminder.enabled;
            registry.add(trigger);
        }
        Ok(registry)
    }

    /// Add a trigger. A trigger with the same id is replaced in place.
    pub fn add(&mut self, trigger: Trigger) {
        match self.triggers.iter_mut().find(|t| t.id == trigger.id) {
            Some(existing) => *existing = trigger,
            None => self.triggers.push(trigger),
        }
    }

    /// Returns `false` if no trigger has this id.
    pub fn disable(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(t) => {
                t.enabled = false;
                true
            }
            None => false,
        }
    }

    /// Returns `false` if no trigger has this id.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|t| t.id != id);
        self.triggers.len() != before
    }

    pub fn get(&self, id: &str) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Trigger> {
        self.triggers.iter_mut().find(|t| t.id == id)
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub(crate) fn triggers_mut(&mut self) -> &mut [Trigger] {
        &mut self.triggers
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}
