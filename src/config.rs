//! Configuration types for the turn-taking engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Microphone capture settings.
    pub audio: AudioConfig,
    /// Energy endpointer settings.
    pub endpointer: EndpointerConfig,
    /// Dialogue session settings.
    pub dialogue: DialogueConfig,
    /// Proactive greeting / reminder settings.
    pub proactive: ProactiveConfig,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz. Audio is resampled to this rate.
    pub sample_rate: u32,
    /// Maximum capture buffer length in seconds.
    pub capture_max_secs: u32,
    /// Input device name (None = first enumerated device).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            capture_max_secs: 30,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    /// Capture buffer capacity in samples.
    pub fn capture_capacity(&self) -> usize {
        self.sample_rate as usize * self.capture_max_secs as usize
    }
}

/// Energy endpointer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointerConfig {
    /// RMS threshold for speech, on samples normalized to \[-1, 1\].
    ///
    ///   - 0.005: very sensitive
    ///   - 0.01:  normal (default)
    ///   - 0.05:  only loud/close speech
    pub silence_threshold: f32,
    /// Samples per observed window.
    pub window_size: usize,
    /// Silence (ms) after speech that ends a recording segment.
    pub recording_silence_limit_ms: u64,
}

impl Default for EndpointerConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.01,
            window_size: 128,
            recording_silence_limit_ms: 2_000,
        }
    }
}

impl EndpointerConfig {
    pub fn recording_silence_limit(&self) -> Duration {
        Duration::from_millis(self.recording_silence_limit_ms)
    }
}

/// Dialogue session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// Seconds without interaction before a session is dropped.
    pub session_timeout_secs: u64,
    /// Keep the microphone open for follow-up utterances after a reply.
    pub continuous_dialogue: bool,
    /// Synthesize replies to audio. When false, replies are displayed only.
    pub voice_replies: bool,
    /// Accepted wake phrases (case-insensitive). Empty accepts any phrase.
    pub wake_phrases: Vec<String>,
    /// Control loop tick in milliseconds.
    pub control_tick_ms: u64,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 10,
            continuous_dialogue: true,
            voice_replies: true,
            wake_phrases: Vec::new(),
            control_tick_ms: 20,
        }
    }
}

impl DialogueConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn control_tick(&self) -> Duration {
        Duration::from_millis(self.control_tick_ms.max(1))
    }
}

/// A reminder entry from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// Stable trigger id. Derived from time and content when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// What to remind the user about.
    pub content: String,
    /// Hour of day (0-23, local time).
    pub hour: u8,
    /// Minute of hour (0-59).
    pub minute: u8,
    /// Fire every day, or once and then disable.
    #[serde(default = "default_true")]
    pub repeat_daily: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ReminderConfig {
    /// Id of the trigger built from this reminder, e.g. `reminder_0930_call_mum`.
    pub fn trigger_id(&self) -> String {
        if let Some(id) = self.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            return id.to_owned();
        }
        let mut slug = String::new();
        for c in self.content.chars().flat_map(char::to_lowercase) {
            if c.is_alphanumeric() {
                slug.push(c);
            } else if !slug.is_empty() && !slug.ends_with('_') {
                slug.push('_');
            }
        }
        let slug = slug.trim_end_matches('_');
        if slug.is_empty() {
            format!("reminder_{:02}{:02}", self.hour, self.minute)
        } else {
            format!("reminder_{:02}{:02}_{slug}", self.hour, self.minute)
        }
    }
}

fn default_true() -> bool {
    true
}

/// Proactive turn configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProactiveConfig {
    /// Master switch for the proactive scheduler.
    pub enabled: bool,
    /// Seconds between scheduler ticks.
    pub tick_interval_secs: u64,
    /// Register the built-in morning and evening greetings.
    pub greetings: bool,
    /// Hour of the morning greeting (local time).
    pub morning_hour: u8,
    /// Hour of the evening greeting (local time).
    pub evening_hour: u8,
    /// Configured reminders, in evaluation order.
    pub reminders: Vec<ReminderConfig>,
    /// Where fired-today state is persisted (None = in memory only).
    pub state_path: Option<PathBuf>,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: 30,
            greetings: true,
            morning_hour: 8,
            evening_hour: 20,
            reminders: Vec::new(),
            state_path: None,
        }
    }
}

impl ProactiveConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }
}

impl VoiceConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::VoiceError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::VoiceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/turnvox/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("turnvox")
            .join("config.toml")
    }
}
