//! Wake events and wake phrase matching.
//!
//! Wake detection itself is external: a keyword spotter (or a test, or the
//! demo's stdin) produces [`WakeEvent`]s. The matcher only decides whether the
//! reported phrase is one we answer to.

use tracing::debug;

/// A wake phrase reported by the keyword spotter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeEvent {
    pub phrase: String,
}

impl WakeEvent {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self {
            phrase: phrase.into(),
        }
    }
}

/// Accepts configured wake phrases, ignoring case and punctuation.
#[derive(Debug, Clone, Default)]
pub struct WakeMatcher {
    phrases: Vec<String>,
}

impl WakeMatcher {
    /// An empty list accepts every phrase.
    pub fn new(phrases: &[String]) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|p| normalize(p))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn accepts(&self, phrase: &str) -> bool {
        if self.phrases.is_empty() {
            return true;
        }
        let heard = normalize(phrase);
        let accepted = self.phrases.iter().any(|p| *p == heard);
        if !accepted {
            debug!("wake phrase '{phrase}' not recognised");
        }
        accepted
    }
}

/// Lowercase, drop punctuation, collapse whitespace.
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
