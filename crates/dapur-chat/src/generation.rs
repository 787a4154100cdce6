//! Generation session and the streaming backend seam.

use std::pin::Pin;

use async_trait::async_trait;
use dapur_core::config::GenerationConfig;
use dapur_core::types::Role;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::attachment::InlineAttachment;
use crate::error::ChatError;
use crate::history::GenerationTurn;

/// Lazy sequence of text deltas produced by one generation call.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send + 'static>>;

/// Sampling parameters fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub temperature: f64,
    /// Nucleus sampling cutoff.
    pub top_p: f64,
    pub top_k: u32,
}

impl From<&GenerationConfig> for SamplingConfig {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
        }
    }
}

/// Backend-side context of one conversation view: history plus sampling.
///
/// Created once when a view is mounted and reused for every turn in it.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSession {
    history: Vec<GenerationTurn>,
    sampling: SamplingConfig,
}

impl GenerationSession {
    pub fn new(history: Vec<GenerationTurn>, sampling: SamplingConfig) -> Self {
        Self { history, sampling }
    }

    pub fn history(&self) -> &[GenerationTurn] {
        &self.history
    }

    pub fn sampling(&self) -> SamplingConfig {
        self.sampling
    }

    /// Append a completed question/answer exchange.
    pub fn record_exchange(&mut self, question: &str, answer: &str) {
        self.history.push(GenerationTurn::user(question));
        self.history.push(GenerationTurn::assistant(answer));
    }

    /// Append the answer to a question already at the end of the history.
    pub fn record_answer(&mut self, answer: &str) {
        self.history.push(GenerationTurn::assistant(answer));
    }

    /// Copy of the session without its trailing user turn, if any.
    ///
    /// Used when that question is about to be sent as the prompt.
    pub fn without_pending_question(&self) -> Self {
        let mut history = self.history.clone();
        if history.last().is_some_and(|turn| turn.role == Role::User) {
            history.pop();
        }
        Self {
            history,
            sampling: self.sampling,
        }
    }
}

/// Prompt sent with a single generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPayload {
    /// Model-ready attachment, placed before the text.
    pub attachment: Option<InlineAttachment>,
    /// System instruction followed by the user's raw text.
    pub text: String,
}

impl PromptPayload {
    pub fn compose(
        system_instruction: &str,
        user_text: &str,
        attachment: Option<InlineAttachment>,
    ) -> Self {
        Self {
            attachment,
            text: format!("{system_instruction}\n\nUser: {user_text}"),
        }
    }
}

/// Streaming text-generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Start a generation call. The returned stream yields text deltas in
    /// emission order and ends when the backend finishes.
    async fn stream(
        &self,
        session: &GenerationSession,
        prompt: &PromptPayload,
    ) -> Result<DeltaStream, ChatError>;
}
