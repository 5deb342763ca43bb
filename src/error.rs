//! Error taxonomy for the serving layer
//!
//! Strategy-local failures (a single TTS sentence) never surface here;
//! they are handled inside the strategies. These types classify the
//! failures that the orchestrator translates into outbound error frames.

use thiserror::Error;

/// Turn-level failure, classified for the wire
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("turn exceeded budget: {0}")]
    BudgetExceeded(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl TurnError {
    /// Wire error code for the `errorCode` metadata field
    pub fn code(&self) -> &'static str {
        match self {
            TurnError::InvalidRequest(_) => "invalid_request",
            TurnError::UpstreamUnavailable(_) => "upstream_unavailable",
            TurnError::UpstreamTimeout(_) => "upstream_timeout",
            TurnError::BudgetExceeded(_) => "budget_exceeded",
            TurnError::Cancelled => "cancelled",
            TurnError::Internal(_) => "internal",
        }
    }
}

/// LLM adapter failure classification
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("llm error ({status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("empty response from model")]
    EmptyResponse,

    #[error("processing error: {0}")]
    Processing(String),
}

impl LlmError {
    pub fn code(&self) -> &'static str {
        match self {
            LlmError::InvalidRequest(_) => "INVALID_REQUEST",
            LlmError::Io(_) => "IO_ERROR",
            LlmError::Upstream { .. } => "LLM_ERROR",
            LlmError::EmptyResponse => "EMPTY_RESPONSE",
            LlmError::Processing(_) => "PROCESSING_ERROR",
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Io(format!("timeout: {e}"))
        } else if e.is_connect() {
            LlmError::Io(format!("connect: {e}"))
        } else {
            LlmError::Io(e.to_string())
        }
    }
}

impl From<LlmError> for TurnError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::InvalidRequest(m) => TurnError::InvalidRequest(m),
            LlmError::Io(m) if m.starts_with("timeout") => TurnError::UpstreamTimeout(m),
            LlmError::Io(m) => TurnError::UpstreamUnavailable(m),
            LlmError::Upstream { status, body } => {
                TurnError::UpstreamUnavailable(format!("LLM returned {status}: {body}"))
            }
            LlmError::EmptyResponse => TurnError::UpstreamUnavailable("empty LLM response".into()),
            LlmError::Processing(m) => TurnError::Internal(m),
        }
    }
}

/// TTS adapter failure (strategy-local)
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("tts request failed: {0}")]
    Request(String),

    #[error("tts timed out after {0}s")]
    Timeout(u64),

    #[error("tts cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_error_codes() {
        assert_eq!(TurnError::Cancelled.code(), "cancelled");
        assert_eq!(TurnError::InvalidRequest("x".into()).code(), "invalid_request");
        assert_eq!(
            TurnError::UpstreamTimeout("llm".into()).code(),
            "upstream_timeout"
        );
    }

    #[test]
    fn test_llm_error_maps_to_turn_error() {
        let e: TurnError = LlmError::Upstream {
            status: 502,
            body: "bad gateway".into(),
        }
        .into();
        assert_eq!(e.code(), "upstream_unavailable");

        let e: TurnError = LlmError::Io("timeout: deadline".into()).into();
        assert_eq!(e.code(), "upstream_timeout");
    }
}
