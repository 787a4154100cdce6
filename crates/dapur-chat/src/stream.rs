//! Incremental assembly of a streamed answer.

use std::time::Duration;

use futures_util::StreamExt;

use crate::error::ChatError;
use crate::generation::{DeltaStream, GenerationBackend, GenerationSession, PromptPayload};

/// Lifecycle of one aggregation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Streaming,
    Finished,
    Failed,
}

/// Drives one generation call and accumulates its deltas.
///
/// The delta sequence is finite and cannot be restarted: once it has
/// finished or failed, [`next_delta`](Self::next_delta) keeps returning
/// `Ok(None)`. A new question needs a new aggregator.
pub struct StreamAggregator {
    deltas: DeltaStream,
    buffer: String,
    state: AggregatorState,
    idle_timeout: Option<Duration>,
}

impl StreamAggregator {
    /// Issue the generation call and wrap its stream.
    pub async fn begin(
        backend: &dyn GenerationBackend,
        session: &GenerationSession,
        prompt: &PromptPayload,
        idle_timeout: Option<Duration>,
    ) -> Result<Self, ChatError> {
        let deltas = backend.stream(session, prompt).await?;
        Ok(Self::from_stream(deltas, idle_timeout))
    }

    pub fn from_stream(deltas: DeltaStream, idle_timeout: Option<Duration>) -> Self {
        Self {
            deltas,
            buffer: String::new(),
            state: AggregatorState::Streaming,
            idle_timeout,
        }
    }

    /// Text accumulated so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    /// Wait for the next delta and append it to the buffer.
    ///
    /// Returns `Ok(None)` once the stream has ended. A backend error or an
    /// idle timeout moves the aggregator to `Failed`; the partial buffer is
    /// kept for display but is never a final answer.
    pub async fn next_delta(&mut self) -> Result<Option<String>, ChatError> {
        if self.state != AggregatorState::Streaming {
            return Ok(None);
        }

        let next = match self.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.deltas.next()).await {
                Ok(next) => next,
                Err(_) => {
                    self.state = AggregatorState::Failed;
                    return Err(ChatError::Timeout(limit));
                }
            },
            None => self.deltas.next().await,
        };

        match next {
            Some(Ok(delta)) => {
                self.buffer.push_str(&delta);
                Ok(Some(delta))
            }
            Some(Err(e)) => {
                self.state = AggregatorState::Failed;
                Err(e)
            }
            None => {
                self.state = AggregatorState::Finished;
                Ok(None)
            }
        }
    }

    /// The final answer, available only after the stream finished cleanly.
    pub fn into_answer(self) -> Option<String> {
        match self.state {
            AggregatorState::Finished => Some(self.buffer),
            _ => None,
        }
    }

    /// Consume the whole stream, calling `on_delta(delta, buffer)` after each
    /// delta, and return the final answer.
    pub async fn drive<F>(mut self, mut on_delta: F) -> Result<String, ChatError>
    where
        F: FnMut(&str, &str),
    {
        while let Some(delta) = self.next_delta().await? {
            on_delta(&delta, &self.buffer);
        }
        Ok(self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use dapur_core::config::GenerationConfig;
    use futures_util::stream;

    fn deltas(items: Vec<Result<&str, ChatError>>) -> DeltaStream {
        let items: Vec<Result<String, ChatError>> =
            items.into_iter().map(|r| r.map(str::to_string)).collect();
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn test_concatenated_deltas_equal_answer() {
        let mut agg = StreamAggregator::from_stream(
            deltas(vec![Ok("Nasi "), Ok("goreng "), Ok("kampung")]),
            None,
        );
        let mut observed = String::new();
        while let Some(delta) = agg.next_delta().await.unwrap() {
            observed.push_str(&delta);
            assert_eq!(agg.buffer(), observed);
        }
        assert_eq!(agg.state(), AggregatorState::Finished);
        assert_eq!(agg.into_answer().as_deref(), Some("Nasi goreng kampung"));
    }

    #[tokio::test]
    async fn test_buffer_grows_monotonically() {
        let agg = StreamAggregator::from_stream(deltas(vec![Ok("a"), Ok(""), Ok("bc")]), None);
        let mut lengths = Vec::new();
        let answer = agg
            .drive(|_, buffer| lengths.push(buffer.len()))
            .await
            .unwrap();
        assert_eq!(answer, "abc");
        assert!(lengths.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_exhausted_stream_stays_exhausted() {
        let mut agg = StreamAggregator::from_stream(deltas(vec![Ok("x")]), None);
        assert_eq!(agg.next_delta().await.unwrap().as_deref(), Some("x"));
        assert!(agg.next_delta().await.unwrap().is_none());
        assert!(agg.next_delta().await.unwrap().is_none());
        assert_eq!(agg.buffer(), "x");
    }

    #[tokio::test]
    async fn test_error_aborts_and_keeps_partial_buffer() {
        let mut agg = StreamAggregator::from_stream(
            deltas(vec![
                Ok("Sebagian"),
                Err(ChatError::Generation("reset".to_string())),
                Ok("never seen"),
            ]),
            None,
        );
        assert!(agg.next_delta().await.unwrap().is_some());
        assert!(matches!(
            agg.next_delta().await,
            Err(ChatError::Generation(_))
        ));
        assert_eq!(agg.state(), AggregatorState::Failed);
        assert!(agg.next_delta().await.unwrap().is_none());
        assert_eq!(agg.buffer(), "Sebagian");
        assert!(agg.into_answer().is_none());
    }

    #[tokio::test]
    async fn test_drive_surfaces_error() {
        let agg = StreamAggregator::from_stream(
            deltas(vec![Ok("a"), Err(ChatError::Generation("boom".to_string()))]),
            None,
        );
        let result = agg.drive(|_, _| {}).await;
        assert!(matches!(result, Err(ChatError::Generation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_fails_hung_stream() {
        let hung: DeltaStream = Box::pin(stream::pending());
        let mut agg = StreamAggregator::from_stream(hung, Some(Duration::from_secs(5)));
        let err = agg.next_delta().await.unwrap_err();
        assert!(matches!(err, ChatError::Timeout(d) if d == Duration::from_secs(5)));
        assert_eq!(agg.state(), AggregatorState::Failed);
    }

    #[tokio::test]
    async fn test_begin_issues_one_backend_call() {
        let backend = ScriptedBackend::replying(&["Halo ", "chef"]);
        let session = GenerationSession::new(vec![], (&GenerationConfig::default()).into());
        let prompt = PromptPayload::compose("sys", "resep", None);
        let agg = StreamAggregator::begin(&backend, &session, &prompt, None)
            .await
            .unwrap();
        let answer = agg.drive(|_, _| {}).await.unwrap();
        assert_eq!(answer, "Halo chef");
        assert_eq!(backend.calls(), 1);
        assert_eq!(backend.last_prompt().unwrap().text, "sys\n\nUser: resep");
    }
}
