//! LLM adapter: unified streaming + non-streaming interface
//!
//! The orchestrator only sees the [`LlmAdapter`] trait; the shipped
//! implementation targets Ollama's OpenAI-compatible endpoint, so any
//! `/chat/completions` backend works unchanged.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::LlmError;

/// One message in an outgoing prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request to the model backend
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    pub messages: Vec<LlmMessage>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
    /// Backend-specific extras, forwarded verbatim
    #[serde(flatten)]
    pub options: Option<serde_json::Value>,
}

/// A partial token string delivered by the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
    pub chunk_index: u64,
}

/// Unified LLM interface.
///
/// `generate_stream` pushes chunks into the provided channel and returns
/// once the stream finishes; the `cancel` flag is checked between network
/// reads so an interrupted turn closes the upstream connection promptly.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Non-streaming completion
    async fn generate(&self, req: &LlmRequest) -> Result<String, LlmError>;

    /// Streaming completion; chunks flow through `tx`, the final chunk has
    /// `done=true`. Dropping the receiver also stops the stream.
    async fn generate_stream(
        &self,
        req: &LlmRequest,
        tx: mpsc::Sender<StreamChunk>,
        cancel: Arc<AtomicBool>,
    ) -> Result<(), LlmError>;
}

/// Client for Ollama (or any OpenAI-compatible `/chat/completions` server)
#[derive(Clone)]
pub struct OllamaClient {
    client: Arc<Client>,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| LlmError::Processing(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [LlmMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the delta content from one SSE `data:` payload.
/// Returns `None` for `[DONE]`, keep-alives, and unparseable events.
fn parse_sse_data(data: &str) -> Option<String> {
    if data == "[DONE]" {
        return None;
    }
    let resp: StreamResponse = serde_json::from_str(data).ok()?;
    resp.choices.first().and_then(|c| c.delta.content.clone())
}

/// Whether this SSE payload carries a finish marker
fn is_sse_done(data: &str) -> bool {
    if data == "[DONE]" {
        return true;
    }
    serde_json::from_str::<StreamResponse>(data)
        .map(|r| r.choices.first().map(|c| c.finish_reason.is_some()).unwrap_or(false))
        .unwrap_or(false)
}

#[async_trait]
impl LlmAdapter for OllamaClient {
    async fn generate(&self, req: &LlmRequest) -> Result<String, LlmError> {
        if req.messages.is_empty() {
            return Err(LlmError::InvalidRequest("empty message list".into()));
        }

        let wire = WireRequest {
            model: &req.model,
            messages: &req.messages,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(self.completions_url())
            .json(&wire)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Upstream { status, body });
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Processing(format!("bad completion body: {e}")))?;

        let content = raw
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|msg| msg.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        if content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }

    async fn generate_stream(
        &self,
        req: &LlmRequest,
        tx: mpsc::Sender<StreamChunk>,
        cancel: Arc<AtomicBool>,
    ) -> Result<(), LlmError> {
        if req.messages.is_empty() {
            return Err(LlmError::InvalidRequest("empty message list".into()));
        }

        let wire = WireRequest {
            model: &req.model,
            messages: &req.messages,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            stream: true,
        };

        let response = self
            .client
            .post(self.completions_url())
            .json(&wire)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Upstream { status, body });
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut chunk_index: u64 = 0;

        while let Some(chunk) = stream.next().await {
            if cancel.load(Ordering::Relaxed) {
                debug!("LLM stream cancelled after {chunk_index} chunks");
                return Ok(());
            }

            let chunk = chunk.map_err(LlmError::from)?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Parse complete SSE events out of the buffer
            while let Some(pos) = buffer.find("\n\n") {
                let event = buffer[..pos].to_string();
                buffer.drain(..pos + 2);

                for line in event.lines() {
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if let Some(content) = parse_sse_data(data) {
                        if !content.is_empty() {
                            let out = StreamChunk {
                                content,
                                done: false,
                                chunk_index,
                            };
                            chunk_index += 1;
                            if tx.send(out).await.is_err() {
                                debug!("LLM stream receiver dropped, stopping");
                                return Ok(());
                            }
                        }
                    }
                    if is_sse_done(data) {
                        let _ = tx
                            .send(StreamChunk {
                                content: String::new(),
                                done: true,
                                chunk_index,
                            })
                            .await;
                        return Ok(());
                    }
                }
            }
        }

        if chunk_index == 0 {
            warn!("LLM stream ended without emitting any content");
        }
        // Stream ended without an explicit finish marker
        let _ = tx
            .send(StreamChunk {
                content: String::new(),
                done: true,
                chunk_index,
            })
            .await;
        Ok(())
    }
}
