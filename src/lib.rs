//! Companion Chat - real-time streaming chatbot server
//!
//! A serving layer that orchestrates streaming conversations between a
//! browser client and a pluggable LLM:
//! - Online sentence segmentation with think-region filtering
//! - Multi-channel output (incremental chat window + synchronized avatar
//!   bubble track), each with its own TTS policy and ordering contract
//! - Token-budgeted context assembly from persona, memory, history, and
//!   optional web search
//! - Per-session JSON history persistence
//!
//! # Example
//!
//! ```ignore
//! use companion_chat::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(std::path::Path::new("config.toml"))?;
//!     companion_chat::server::start(config).await
//! }
//! ```

// Core modules (order matters for cross-module dependencies)
pub mod types;
pub mod error;
pub mod config;
pub mod prefs;
pub mod llm;
pub mod tts;
pub mod knowledge;
pub mod context;
pub mod session;
pub mod stream;
pub mod server;

// Re-export commonly used types for convenience
pub use config::Config;
pub use error::{LlmError, TtsError, TurnError};
pub use llm::{LlmAdapter, LlmMessage, LlmRequest, OllamaClient, StreamChunk};
pub use prefs::{PreferenceStore, UserPreferences};
pub use session::{history::HistoryStore, Session, SessionManager};
pub use stream::{StreamOrchestrator, TurnDeps, TurnOutcome, TurnRequest};
pub use types::{ChannelType, ChatMessage, MessageType, Role, Sentence};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
