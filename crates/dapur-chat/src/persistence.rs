//! Turn storage: appending completed turns and loading conversations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dapur_core::config::PersistenceConfig;
use dapur_core::types::{Conversation, TurnRecord};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

use crate::cache::{CacheKey, ConversationCache};
use crate::error::ChatError;

const MAX_ERROR_BODY: usize = 300;

/// Whatever the backend returned for a successful append.
#[derive(Debug, Clone, PartialEq)]
pub struct Acknowledgement {
    pub body: Value,
}

/// Remote storage of conversation turns.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Append one completed turn to the conversation.
    async fn append_turn(
        &self,
        conversation_id: &str,
        record: &TurnRecord,
    ) -> Result<Acknowledgement, ChatError>;

    /// Mark every cached copy of the conversation stale. Fire and forget.
    fn invalidate(&self, conversation_id: &str);

    /// Fetch the conversation snapshot.
    async fn load_conversation(&self, conversation_id: &str) -> Result<Conversation, ChatError>;
}

/// [`PersistenceGateway`] over the chat HTTP API.
///
/// `PUT {api_url}/api/chats/{id}` appends a turn, `GET` on the same path
/// loads the conversation. Snapshots are cached under `["chat", id]`.
pub struct HttpPersistenceGateway {
    client: Client,
    api_url: String,
    credentials: Option<String>,
    bearer_token: Option<String>,
    cache: Arc<ConversationCache>,
}

impl HttpPersistenceGateway {
    pub fn new(
        config: &PersistenceConfig,
        cache: Arc<ConversationCache>,
    ) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ChatError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            credentials: config.credentials.clone(),
            bearer_token: config.bearer_token.clone(),
            cache,
        })
    }

    pub fn cache(&self) -> &Arc<ConversationCache> {
        &self.cache
    }

    fn chat_url(&self, conversation_id: &str) -> String {
        format!("{}/api/chats/{}", self.api_url, conversation_id)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = match &self.credentials {
            Some(cookie) => request.header(reqwest::header::COOKIE, cookie),
            None => request,
        };
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();
    Err(ChatError::Persistence(format!("HTTP {status}: {excerpt}")))
}

#[async_trait]
impl PersistenceGateway for HttpPersistenceGateway {
    async fn append_turn(
        &self,
        conversation_id: &str,
        record: &TurnRecord,
    ) -> Result<Acknowledgement, ChatError> {
        let request = self.client.put(self.chat_url(conversation_id)).json(record);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))?;
        let response = ensure_success(response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))?;
        let body = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body).unwrap_or(Value::String(body))
        };

        tracing::info!(
            conversation_id,
            has_question = record.question.is_some(),
            has_img = record.img.is_some(),
            answer_len = record.answer.len(),
            "Turn persisted"
        );
        Ok(Acknowledgement { body })
    }

    fn invalidate(&self, conversation_id: &str) {
        self.cache.invalidate(&CacheKey::chat(conversation_id));
    }

    async fn load_conversation(&self, conversation_id: &str) -> Result<Conversation, ChatError> {
        let key = CacheKey::chat(conversation_id);
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(conversation_id, "Conversation served from cache");
            return Ok(cached);
        }

        let request = self.client.get(self.chat_url(conversation_id));
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))?;
        let conversation: Conversation = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| ChatError::Persistence(format!("invalid conversation body: {e}")))?;

        tracing::debug!(
            conversation_id,
            turns = conversation.history.len(),
            "Conversation loaded"
        );
        self.cache.put(key, conversation.clone());
        Ok(conversation)
    }
}
