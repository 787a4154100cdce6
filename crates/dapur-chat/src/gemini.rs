//! Google Gemini streaming backend.
//!
//! Calls `streamGenerateContent` with `alt=sse` and turns every text part of
//! every streamed candidate into a delta.

use std::time::Duration;

use async_trait::async_trait;
use dapur_core::config::GenerationConfig;
use dapur_core::types::Role;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::attachment::InlineAttachment;
use crate::error::ChatError;
use crate::generation::{DeltaStream, GenerationBackend, GenerationSession, PromptPayload};
use crate::sse::{parse_data_lines, SseBuffer};

/// Longest error body excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 300;

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationParams,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

impl From<&InlineAttachment> for Part {
    fn from(attachment: &InlineAttachment) -> Self {
        Part::Inline {
            inline_data: InlineData {
                mime_type: attachment.mime_type.clone(),
                data: attachment.data.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f64,
    top_p: f64,
    top_k: u32,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

// =============================================================================
// GeminiBackend
// =============================================================================

/// Streaming generation over the Gemini REST API.
pub struct GeminiBackend {
    client: Client,
    api_base: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiBackend {
    pub fn new(
        api_base: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ChatError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    /// Build from configuration, reading the key from `api_key_env`.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, ChatError> {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "Generation API key not set; generation calls will fail"
            );
        }
        Self::new(&config.api_base, &config.model, api_key)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.api_base, self.model
        )
    }

    fn build_request(
        session: &GenerationSession,
        prompt: &PromptPayload,
    ) -> GenerateContentRequest {
        let mut contents: Vec<Content> = session
            .history()
            .iter()
            .map(|turn| Content {
                role: wire_role(turn.role),
                parts: turn
                    .content
                    .iter()
                    .map(|text| Part::Text { text: text.clone() })
                    .collect(),
            })
            .collect();

        let mut parts = Vec::with_capacity(2);
        if let Some(attachment) = &prompt.attachment {
            parts.push(Part::from(attachment));
        }
        parts.push(Part::Text {
            text: prompt.text.clone(),
        });
        contents.push(Content {
            role: wire_role(Role::User),
            parts,
        });

        let sampling = session.sampling();
        GenerateContentRequest {
            contents,
            generation_config: GenerationParams {
                temperature: sampling.temperature,
                top_p: sampling.top_p,
                top_k: sampling.top_k,
            },
        }
    }
}

/// Text deltas carried by one SSE event block.
fn deltas_from_block(block: &str) -> Result<Vec<String>, ChatError> {
    let mut deltas = Vec::new();
    for data in parse_data_lines(block) {
        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping undecodable stream event");
                continue;
            }
        };
        if let Some(err) = chunk.error {
            return Err(ChatError::Generation(format!("Gemini API error: {}", err.message)));
        }
        for candidate in chunk.candidates {
            let Some(content) = candidate.content else {
                continue;
            };
            deltas.extend(
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .filter(|t| !t.is_empty()),
            );
        }
    }
    Ok(deltas)
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    async fn stream(
        &self,
        session: &GenerationSession,
        prompt: &PromptPayload,
    ) -> Result<DeltaStream, ChatError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ChatError::Generation("Gemini API key not configured".to_string())
        })?;

        let request = Self::build_request(session, prompt);
        tracing::debug!(
            model = %self.model,
            history_len = session.history().len(),
            has_attachment = prompt.attachment.is_some(),
            "Starting generation stream"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Generation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(ChatError::Generation(format!("HTTP {status}: {excerpt}")));
        }

        let mut byte_stream = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut sse_buffer = SseBuffer::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = chunk_result.map_err(|e| ChatError::Generation(e.to_string()))?;
                sse_buffer.push_chunk(&chunk);

                while let Some(block) = sse_buffer.next_event_block() {
                    for delta in deltas_from_block(&block)? {
                        yield delta;
                    }
                }
            }

            if let Some(block) = sse_buffer.finish() {
                for delta in deltas_from_block(&block)? {
                    yield delta;
                }
            }
        };

        Ok(into_delta_stream(stream))
    }
}

fn into_delta_stream<S>(stream: S) -> DeltaStream
where
    S: futures_util::Stream<Item = Result<String, ChatError>> + Send + 'static,
{
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::SamplingConfig;
    use crate::history::GenerationTurn;
    use futures_util::StreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODEL: &str = "gemini-test";

    fn session() -> GenerationSession {
        GenerationSession::new(
            vec![
                GenerationTurn::user("resep soto?"),
                GenerationTurn::assistant("Soto ayam butuh kunyit."),
            ],
            SamplingConfig {
                temperature: 0.7,
                top_p: 0.8,
                top_k: 40,
            },
        )
    }

    fn sse_body(texts: &[&str]) -> String {
        texts
            .iter()
            .map(|t| {
                let chunk = serde_json::json!({
                    "candidates": [{"content": {"role": "model", "parts": [{"text": t}]}}]
                });
                format!("data: {chunk}\r\n\r\n")
            })
            .collect()
    }

    async fn collect(stream: DeltaStream) -> Vec<Result<String, ChatError>> {
        stream.collect().await
    }

    #[test]
    fn test_request_shape() {
        let prompt = PromptPayload::compose(
            "sys",
            "apa ini?",
            Some(InlineAttachment::from_bytes("image/png", b"img")),
        );
        let request = GeminiBackend::build_request(&session(), &prompt);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["contents"].as_array().unwrap().len(), 3);
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][2]["role"], "user");
        assert_eq!(
            json["contents"][2]["parts"][0]["inlineData"]["mimeType"],
            "image/png"
        );
        assert_eq!(json["contents"][2]["parts"][1]["text"], "sys\n\nUser: apa ini?");
        assert_eq!(json["generationConfig"]["topK"], 40);
        assert_eq!(json["generationConfig"]["topP"], 0.8);
    }

    #[test]
    fn test_error_event_aborts() {
        let block = "data: {\"error\": {\"message\": \"quota exhausted\"}}\n\n";
        let err = deltas_from_block(block).unwrap_err();
        assert!(err.to_string().contains("quota exhausted"));
    }

    #[test]
    fn test_undecodable_event_is_skipped() {
        let block = "data: not-json\n\n";
        assert!(deltas_from_block(block).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_yields_deltas_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/v1beta/models/{MODEL}:streamGenerateContent")))
            .and(query_param("alt", "sse"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "generationConfig": {"temperature": 0.7, "topP": 0.8, "topK": 40}
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    sse_body(&["Rendang ", "dimasak ", "lama."]),
                    "text/event-stream",
                ),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend =
            GeminiBackend::new(server.uri(), MODEL, Some("test-key".to_string())).unwrap();
        let prompt = PromptPayload::compose("sys", "cara masak rendang", None);
        let stream = backend.stream(&session(), &prompt).await.unwrap();
        let deltas: Vec<String> = collect(stream)
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(deltas, vec!["Rendang ", "dimasak ", "lama."]);
    }

    #[tokio::test]
    async fn test_stream_surfaces_mid_stream_error() {
        let server = MockServer::start().await;
        let body = format!(
            "{}data: {{\"error\": {{\"message\": \"overloaded\"}}}}\n\n",
            sse_body(&["Sebagian "])
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let backend = GeminiBackend::new(server.uri(), MODEL, Some("k".to_string())).unwrap();
        let prompt = PromptPayload::compose("sys", "resep", None);
        let items = collect(backend.stream(&session(), &prompt).await.unwrap()).await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "Sebagian ");
        assert!(matches!(items[1], Err(ChatError::Generation(_))));
    }

    #[tokio::test]
    async fn test_http_error_status_fails_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let backend = GeminiBackend::new(server.uri(), MODEL, Some("k".to_string())).unwrap();
        let prompt = PromptPayload::compose("sys", "resep", None);
        let err = backend.stream(&session(), &prompt).await.err().unwrap();
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let backend = GeminiBackend::new(server.uri(), MODEL, None).unwrap();
        let prompt = PromptPayload::compose("sys", "resep", None);
        let err = backend.stream(&session(), &prompt).await.err().unwrap();
        assert!(matches!(err, ChatError::Generation(_)));
    }
}
