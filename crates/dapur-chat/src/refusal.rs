//! Refusal messages for off-topic questions.

use dapur_core::config::RefusalConfig;
use rand::Rng;

use crate::error::ChatError;

/// Picks one of a fixed set of refusal texts, uniformly at random.
#[derive(Debug, Clone)]
pub struct RefusalSelector {
    messages: Vec<String>,
}

impl RefusalSelector {
    /// Create a selector over the configured messages.
    ///
    /// At least two non-blank messages are required.
    pub fn new(config: &RefusalConfig) -> Result<Self, ChatError> {
        if config.messages.len() < 2 || config.messages.iter().any(|m| m.trim().is_empty()) {
            return Err(ChatError::Config(format!(
                "refusal selector needs at least 2 non-blank messages, got {}",
                config.messages.len()
            )));
        }
        Ok(Self {
            messages: config.messages.clone(),
        })
    }

    /// The full message set.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Pick a message using the given randomness source.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        let index = rng.random_range(0..self.messages.len());
        &self.messages[index]
    }

    /// Pick a message using the thread-local generator.
    pub fn select_refusal(&self) -> &str {
        self.select(&mut rand::rng())
    }
}
