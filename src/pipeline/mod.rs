//! Turn pipeline: transcribe → converse → synthesize.
//!
//! The three calls are external collaborators with unbounded latency. The
//! state machine runs [`run_turn`] on a spawned task and only sees the
//! settled [`TurnOutcome`].

pub mod messages;

use crate::error::Result;
use async_trait::async_trait;
use messages::{AudioBuffer, TurnInput, TurnOutcome};
use tracing::{debug, warn};

/// Speech-to-text, chat, and text-to-speech services.
#[async_trait]
pub trait TurnPipeline: Send + Sync {
    /// Transcribe a recorded utterance.
    async fn transcribe(&self, audio: AudioBuffer) -> Result<String>;

    /// Produce the assistant's reply to `text`.
    async fn converse(&self, text: &str) -> Result<String>;

    /// Synthesize `text`. `Ok(None)` means the reply is delivered as text only.
    async fn synthesize(&self, text: &str) -> Result<Option<AudioBuffer>>;
}

/// Run one turn to completion. Never panics and never retries: every failure
/// becomes a [`TurnOutcome`].
pub async fn run_turn(
    pipeline: &dyn TurnPipeline,
    input: TurnInput,
    voice_replies: bool,
) -> TurnOutcome {
    let (heard, text) = match input {
        TurnInput::Utterance(audio) => {
            debug!("transcribing {}ms of audio", audio.duration().as_millis());
            match pipeline.transcribe(audio).await {
                Ok(text) => {
                    let text = text.trim().to_owned();
                    if text.is_empty() {
                        return TurnOutcome::EmptyTranscription;
                    }
                    (Some(text.clone()), text)
                }
                Err(e) => {
                    warn!("transcription failed: {e}");
                    return TurnOutcome::Failed {
                        message: "Sorry, I couldn't make that out.".to_owned(),
                    };
                }
            }
        }
        TurnInput::Prompt(prompt) => (None, prompt),
    };

    let reply = match pipeline.converse(&text).await {
        Ok(reply) => reply.trim().to_owned(),
        Err(e) => {
            warn!("chat request failed: {e}");
            return TurnOutcome::Failed {
                message: "Sorry, I couldn't reach the assistant.".to_owned(),
            };
        }
    };
    if reply.is_empty() {
        warn!("chat returned an empty reply");
        return TurnOutcome::Failed {
            message: "Sorry, I didn't get a reply.".to_owned(),
        };
    }

    let audio = if voice_replies {
        match pipeline.synthesize(&reply).await {
            Ok(audio) => audio.filter(|a| !a.is_empty()),
            Err(e) => {
                warn!("synthesis failed, delivering text only: {e}");
                None
            }
        }
    } else {
        None
    };

    TurnOutcome::Reply {
        heard,
        text: reply,
        audio,
    }
}
