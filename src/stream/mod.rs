//! Streaming pipeline: think filtering, sentence segmentation, output
//! strategies, and the per-turn orchestrator that ties them together

pub mod orchestrator;
pub mod sentence;
pub mod strategy;
pub mod think_filter;

pub use orchestrator::{StreamOrchestrator, TurnDeps, TurnOutcome, TurnRequest};
pub use sentence::SentenceBuffer;
pub use strategy::{OutputStrategy, StrategyEnv};
pub use think_filter::{StreamMode, ThinkFilter};
