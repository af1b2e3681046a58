//! Error types for the turn-taking engine.

/// Top-level error type for capture, pipeline, and scheduling failures.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// No microphone, or the microphone could not be opened.
    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),

    /// Audio stream or playback error on an already-open device.
    #[error("audio error: {0}")]
    Audio(String),

    /// Transcription, chat, or synthesis call failed.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// The turn lock is held by someone else.
    #[error("turn lock held by {holder}")]
    LockContention {
        /// Display form of the current holder.
        holder: String,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Scheduler error (trigger state persistence).
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VoiceError>;
