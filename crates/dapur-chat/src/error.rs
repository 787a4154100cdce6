//! Error types for the conversational core.

use std::time::Duration;

use dapur_core::error::CoreError;

/// Errors from the chat engine.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("a turn is already in progress for this conversation")]
    TurnInProgress,
    #[error("attachment upload has not finished")]
    AttachmentPending,
    #[error("generation stream failed: {0}")]
    Generation(String),
    #[error("generation stream idle for more than {0:?}")]
    Timeout(Duration),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("invalid gate pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("no failed persistence to retry")]
    NothingToRetry,
    #[error("conversation view has been torn down")]
    TornDown,
}

impl ChatError {
    /// Whether the user can recover by submitting again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChatError::Generation(_)
                | ChatError::Timeout(_)
                | ChatError::Persistence(_)
                | ChatError::TurnInProgress
                | ChatError::AttachmentPending
        )
    }
}

impl From<CoreError> for ChatError {
    fn from(err: CoreError) -> Self {
        ChatError::Config(err.to_string())
    }
}
