//! Conversational core for Dapur.
//!
//! Gates questions to the culinary domain, streams answers from the
//! generation backend, and appends finished turns to the chat API.

pub mod attachment;
pub mod cache;
pub mod classifier;
pub mod controller;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod history;
pub mod persistence;
pub mod phase;
pub mod refusal;
pub mod sse;
pub mod stream;

#[cfg(test)]
mod testing;

pub use attachment::{
    mime_for_path, AttachmentState, InlineAttachment, UploadState, UploadedAttachment,
};
pub use cache::{CacheKey, ConversationCache};
pub use classifier::{GateSignals, TopicClassifier};
pub use controller::{InFlightTurn, TurnController, TurnObserver, TurnOutcome};
pub use error::ChatError;
pub use gemini::GeminiBackend;
pub use generation::{
    DeltaStream, GenerationBackend, GenerationSession, PromptPayload, SamplingConfig,
};
pub use history::{GenerationTurn, HistoryNormalizer};
pub use persistence::{Acknowledgement, HttpPersistenceGateway, PersistenceGateway};
pub use phase::{FailureKind, TurnPhase};
pub use refusal::RefusalSelector;
pub use stream::{AggregatorState, StreamAggregator};
