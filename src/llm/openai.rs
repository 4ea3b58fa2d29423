use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::{LlmProvider, TokenStream};
use super::types::ChatRequest;
use crate::core::credentials::ApiKeyStore;
use crate::core::errors::ApiError;

/// Client for the OpenAI REST API (or any server speaking the same protocol).
#[derive(Clone)]
pub struct OpenAiProvider {
    base_url: String,
    client: Client,
    credentials: ApiKeyStore,
    request_timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(
        base_url: &str,
        credentials: ApiKeyStore,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            credentials,
            request_timeout,
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let key = self.credentials.require()?;
        Ok(builder.bearer_auth(key))
    }

    fn completion_body(request: &ChatRequest, model_id: &str, stream: bool) -> Value {
        let mut body = json!({
            "model": model_id,
            "messages": request.messages,
            "stream": stream,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
            if let Some(s) = &request.stop {
                obj.insert("stop".to_string(), json!(s));
            }
        }
        body
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::completion_body(&request, model_id, false);

        let res = self
            .authorized(self.client.post(&url))?
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::upstream)?;
        let res = ensure_success(res, "chat").await?;

        let payload: Value = res.json().await.map_err(ApiError::upstream)?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(content)
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        model_id: &str,
    ) -> Result<TokenStream, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::completion_body(&request, model_id, true);

        let res = self
            .authorized(self.client.post(&url))?
            .json(&body)
            .send()
            .await
            .map_err(ApiError::upstream)?;
        let res = ensure_success(res, "stream").await?;

        let (tx, rx) = mpsc::channel(64);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            let mut lines = SseLineBuffer::default();
            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::upstream(e))).await;
                        return;
                    }
                };

                for event in lines.push(&bytes) {
                    let delta = match event {
                        SseEvent::Done => return,
                        SseEvent::Data(data) => parse_stream_delta(&data),
                    };
                    match delta {
                        Ok(Some(content)) => {
                            if tx.send(Ok(content)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": model_id,
            "input": inputs,
        });

        let res = self
            .authorized(self.client.post(&url))?
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::upstream)?;
        let res = ensure_success(res, "embed").await?;

        let payload: EmbeddingResponse = res.json().await.map_err(ApiError::upstream)?;
        order_embeddings(payload.data, inputs.len())
    }
}

async fn ensure_success(res: Response, what: &str) -> Result<Response, ApiError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let text = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(text);
    Err(ApiError::Upstream(format!(
        "OpenAI {} error ({}): {}",
        what, status, message
    )))
}

/// Restores input order using each item's `index`.
fn order_embeddings(mut items: Vec<EmbeddingItem>, expected: usize) -> Result<Vec<Vec<f32>>, ApiError> {
    if items.len() != expected {
        return Err(ApiError::Upstream(format!(
            "Embedding count mismatch: expected {}, got {}",
            expected,
            items.len()
        )));
    }
    items.sort_by_key(|item| item.index);
    Ok(items.into_iter().map(|item| item.embedding).collect())
}

fn parse_stream_delta(data: &str) -> Result<Option<String>, ApiError> {
    let json: Value = serde_json::from_str(data)
        .map_err(|e| ApiError::Upstream(format!("Malformed stream payload: {}", e)))?;

    if let Some(message) = json["error"]["message"].as_str() {
        return Err(ApiError::Upstream(message.to_string()));
    }

    Ok(json["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|content| !content.is_empty())
        .map(str::to_string))
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Reassembles `data:` lines that may be split across network chunks.
#[derive(Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if data == "[DONE]" {
                    events.push(SseEvent::Done);
                } else {
                    events.push(SseEvent::Data(data.to_string()));
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatMessage;

    #[test]
    fn line_buffer_joins_split_lines() {
        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push(b"data: {\"choices\":[{\"del").is_empty());
        let events = buffer.push(b"ta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("{\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}".to_string()),
                SseEvent::Done
            ]
        );
    }

    #[test]
    fn line_buffer_skips_comments_and_blank_lines() {
        let mut buffer = SseLineBuffer::default();
        let events = buffer.push(b": keep-alive\n\n\r\ndata:{\"a\":1}\r\n");
        assert_eq!(events, vec![SseEvent::Data("{\"a\":1}".to_string())]);
    }

    #[test]
    fn line_buffer_keeps_multibyte_characters_across_chunks() {
        let mut buffer = SseLineBuffer::default();
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9}\"}}]}\n".as_bytes();
        let split = line.len() - 7;
        assert!(buffer.push(&line[..split]).is_empty());
        let events = buffer.push(&line[split..]);
        let SseEvent::Data(data) = &events[0] else {
            panic!("expected data event");
        };
        assert_eq!(parse_stream_delta(data).unwrap().as_deref(), Some("caf\u{e9}"));
    }

    #[test]
    fn stream_delta_ignores_role_only_chunks() {
        let delta = parse_stream_delta(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert!(delta.is_none());
    }

    #[test]
    fn stream_delta_surfaces_errors() {
        let err = parse_stream_delta(r#"{"error":{"message":"rate limited"}}"#).unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn embeddings_are_reordered_by_index() {
        let items = vec![
            EmbeddingItem { index: 1, embedding: vec![1.0] },
            EmbeddingItem { index: 0, embedding: vec![0.0] },
        ];
        assert_eq!(order_embeddings(items, 2).unwrap(), vec![vec![0.0], vec![1.0]]);
    }

    #[test]
    fn embedding_count_mismatch_is_an_error() {
        let items = vec![EmbeddingItem { index: 0, embedding: vec![0.0] }];
        assert!(order_embeddings(items, 2).is_err());
    }

    #[test]
    fn completion_body_includes_optional_parameters() {
        let mut request = ChatRequest::new(vec![ChatMessage::user("hello")]);
        request.temperature = Some(0.3);
        request.max_tokens = Some(64);

        let body = OpenAiProvider::completion_body(&request, "gpt-4o-mini", true);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["temperature"], 0.3);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("stop").is_none());
    }

    #[tokio::test]
    async fn requests_without_a_key_fail_before_sending() {
        let provider = OpenAiProvider::new(
            "http://127.0.0.1:9",
            ApiKeyStore::new(None),
            Duration::from_secs(1),
        )
        .unwrap();

        let err = provider
            .embed(&["text".to_string()], "text-embedding-ada-002")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ServiceUnavailable(_)));
    }
}
