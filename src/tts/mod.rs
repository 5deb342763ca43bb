//! Text-to-Speech adapter and bounded worker pool
//!
//! Synthesis runs against an external HTTP service. The pool bounds
//! concurrent synthesis across all sessions (FIFO by submit time) and
//! hands each result back through a per-request oneshot sink tagged by
//! `(sessionId, sentenceOrder)`; callers own the ordering policy.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};

use crate::error::TtsError;

/// Synthesis backend seam (HTTP in production, scripted in tests)
#[async_trait]
pub trait TtsBackend: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        speaker_id: &str,
        speed: f32,
        format: &str,
    ) -> Result<Vec<u8>, TtsError>;
}

/// HTTP client for the external TTS service
pub struct TtsClient {
    client: Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    speaker_id: &'a str,
    speed: f32,
    format: &'a str,
}

impl TtsClient {
    pub fn new(url: &str, connect_seconds: u64, read_seconds: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_seconds))
            .timeout(Duration::from_secs(read_seconds))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl TtsBackend for TtsClient {
    async fn synthesize(
        &self,
        text: &str,
        speaker_id: &str,
        speed: f32,
        format: &str,
    ) -> Result<Vec<u8>, TtsError> {
        let request = SynthesizeRequest {
            text,
            speaker_id,
            speed,
            format,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TtsError::Timeout(0)
                } else {
                    TtsError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::Request(format!("TTS returned {status}: {body}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?;
        if bytes.is_empty() {
            return Err(TtsError::Request("TTS returned empty audio".into()));
        }
        Ok(bytes.to_vec())
    }
}

/// One synthesis job
#[derive(Clone)]
pub struct TtsRequest {
    pub session_id: String,
    pub sentence_order: u32,
    pub text: String,
    pub speaker_id: String,
    pub speed: f32,
    pub format: String,
    /// Per-task synthesis deadline
    pub timeout: Duration,
    /// Session cancellation flag, checked before dispatch
    pub cancel: Arc<AtomicBool>,
}

/// Bounded synthesis pool shared across sessions
pub struct TtsPool {
    backend: Arc<dyn TtsBackend>,
    semaphore: Arc<Semaphore>,
}

impl TtsPool {
    pub fn new(backend: Arc<dyn TtsBackend>, concurrency: usize) -> Self {
        Self {
            backend,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Submit a job; the result arrives on the returned oneshot.
    ///
    /// Jobs whose session was cancelled before a worker picked them up
    /// resolve to `TtsError::Cancelled` without touching the backend.
    pub fn submit(&self, req: TtsRequest) -> oneshot::Receiver<Result<Vec<u8>, TtsError>> {
        let (tx, rx) = oneshot::channel();
        let backend = self.backend.clone();
        let semaphore = self.semaphore.clone();

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };

            if req.cancel.load(Ordering::Relaxed) {
                debug!(
                    "Dropping TTS job {}:{} before dispatch (cancelled)",
                    req.session_id, req.sentence_order
                );
                let _ = tx.send(Err(TtsError::Cancelled));
                return;
            }

            let timeout_secs = req.timeout.as_secs();
            let result = match tokio::time::timeout(
                req.timeout,
                backend.synthesize(&req.text, &req.speaker_id, req.speed, &req.format),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "TTS synthesis timed out after {timeout_secs}s for {}:{}",
                        req.session_id, req.sentence_order
                    );
                    Err(TtsError::Timeout(timeout_secs))
                }
            };

            // Receiver may be gone if the turn was abandoned
            let _ = tx.send(result);
        });

        rx
    }
}
