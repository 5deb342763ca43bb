//! Configuration management
//!
//! Loads server configuration from a TOML file with environment variable
//! overrides for the external service endpoints. Every field carries a
//! default so a missing or partial file still yields a runnable config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// LLM backend settings (Ollama or any OpenAI-compatible endpoint)
    #[serde(default)]
    pub ollama: OllamaConfig,
    /// External Python sidecar services (ASR, TTS, VAD, OCR)
    #[serde(default)]
    pub python: PythonConfig,
    /// System-wide limits and WebSocket tuning
    #[serde(default)]
    pub system: SystemConfig,
    /// Prompt assembly and streaming behavior
    #[serde(default)]
    pub ai: AiConfig,
    /// Web search integration
    #[serde(default, rename = "web-search")]
    pub web_search: WebSearchConfig,
    /// On-disk layout
    #[serde(default)]
    pub resource: ResourceConfig,
    /// Listen address
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL of the OpenAI-compatible chat endpoint
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    /// Request timeout in seconds
    #[serde(default = "default_ollama_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_true")]
    pub stream: bool,
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_ollama_model() -> String {
    "qwen2.5:7b".to_string()
}

fn default_ollama_timeout() -> u64 {
    120
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.7
}

fn default_true() -> bool {
    true
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
            timeout: default_ollama_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            stream: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PythonConfig {
    #[serde(default)]
    pub services: PythonServices,
    #[serde(default)]
    pub timeout: PythonTimeouts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PythonServices {
    #[serde(default = "default_asr_url")]
    pub asr_url: String,
    #[serde(default = "default_tts_url")]
    pub tts_url: String,
    #[serde(default = "default_vad_url")]
    pub vad_url: String,
    #[serde(default = "default_ocr_url")]
    pub ocr_url: String,
}

fn default_asr_url() -> String {
    "http://localhost:8001/asr".to_string()
}

fn default_tts_url() -> String {
    "http://localhost:8002/tts".to_string()
}

fn default_vad_url() -> String {
    "http://localhost:8003/vad".to_string()
}

fn default_ocr_url() -> String {
    "http://localhost:8004/ocr".to_string()
}

impl Default for PythonServices {
    fn default() -> Self {
        Self {
            asr_url: default_asr_url(),
            tts_url: default_tts_url(),
            vad_url: default_vad_url(),
            ocr_url: default_ocr_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PythonTimeouts {
    #[serde(default = "default_connect_seconds")]
    pub connect_seconds: u64,
    #[serde(default = "default_read_seconds")]
    pub read_seconds: u64,
    #[serde(default = "default_write_seconds")]
    pub write_seconds: u64,
    /// Per-sentence TTS synthesis deadline (chat window track)
    #[serde(default = "default_tts_task_seconds")]
    pub tts_task_seconds: u64,
    /// Per-sentence TTS synthesis deadline (avatar track)
    #[serde(default = "default_live2d_tts_task_seconds")]
    pub live2d_tts_task_seconds: u64,
}

fn default_connect_seconds() -> u64 {
    5
}

fn default_read_seconds() -> u64 {
    30
}

fn default_write_seconds() -> u64 {
    30
}

fn default_tts_task_seconds() -> u64 {
    10
}

fn default_live2d_tts_task_seconds() -> u64 {
    30
}

impl Default for PythonTimeouts {
    fn default() -> Self {
        Self {
            connect_seconds: default_connect_seconds(),
            read_seconds: default_read_seconds(),
            write_seconds: default_write_seconds(),
            tts_task_seconds: default_tts_task_seconds(),
            live2d_tts_task_seconds: default_live2d_tts_task_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Token cap for the assembled prompt
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    /// Idle seconds after which a disconnected session is reaped
    #[serde(default = "default_session_timeout")]
    pub session_timeout: u64,
    #[serde(default)]
    pub websocket: WebsocketConfig,
    /// Bounded TTS worker pool size (shared across sessions)
    #[serde(default = "default_tts_concurrency")]
    pub tts_concurrency: usize,
}

fn default_max_context_tokens() -> usize {
    4000
}

fn default_session_timeout() -> u64 {
    1800
}

fn default_tts_concurrency() -> usize {
    3
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            session_timeout: default_session_timeout(),
            websocket: WebsocketConfig::default(),
            tts_concurrency: default_tts_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsocketConfig {
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_ping_interval() -> u64 {
    30
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            ping_interval: default_ping_interval(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Chat-window re-chunking size for paced emission (0 = passthrough)
    #[serde(default)]
    pub streaming_chunk_size: usize,
    /// Delay between paced chunks in milliseconds
    #[serde(default)]
    pub streaming_delay_ms: u64,
    #[serde(default)]
    pub system_prompt: SystemPromptConfig,
    #[serde(default)]
    pub web_search_decision: WebSearchDecisionConfig,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            streaming_chunk_size: 0,
            streaming_delay_ms: 0,
            system_prompt: SystemPromptConfig::default(),
            web_search_decision: WebSearchDecisionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPromptConfig {
    /// Base prompt used when the persona has none or is disabled
    #[serde(default = "default_base_prompt")]
    pub base: String,
    /// Last-resort prompt when even the base is empty
    #[serde(default = "default_fallback_prompt")]
    pub fallback: String,
    #[serde(default = "default_true")]
    pub enable_persona: bool,
}

fn default_base_prompt() -> String {
    "You are a warm, attentive companion. Answer naturally and keep replies conversational."
        .to_string()
}

fn default_fallback_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

impl Default for SystemPromptConfig {
    fn default() -> Self {
        Self {
            base: default_base_prompt(),
            fallback: default_fallback_prompt(),
            enable_persona: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchDecisionConfig {
    #[serde(default = "default_decision_timeout")]
    pub timeout_seconds: u64,
    /// When the decision call times out: true falls back to searching,
    /// false falls back to skipping the search.
    #[serde(default)]
    pub enable_timeout_fallback: bool,
}

fn default_decision_timeout() -> u64 {
    5
}

impl Default for WebSearchDecisionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_decision_timeout(),
            enable_timeout_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_engine")]
    pub default_engine: String,
    #[serde(default = "default_true")]
    pub enable_fallback: bool,
}

fn default_max_results() -> usize {
    3
}

fn default_search_timeout() -> u64 {
    8
}

fn default_engine() -> String {
    "wikipedia".to_string()
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_results: default_max_results(),
            timeout_seconds: default_search_timeout(),
            default_engine: default_engine(),
            enable_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    #[serde(default)]
    pub data: DataDirs,
}

fn default_base_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("./logs")
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            log_path: default_log_path(),
            data: DataDirs::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataDirs {
    #[serde(default = "default_memories_dir")]
    pub memories: String,
    #[serde(default = "default_personas_dir")]
    pub personas: String,
    #[serde(default = "default_sessions_dir")]
    pub sessions: String,
}

fn default_memories_dir() -> String {
    "memories".to_string()
}

fn default_personas_dir() -> String {
    "personas".to_string()
}

fn default_sessions_dir() -> String {
    "sessions".to_string()
}

impl Default for DataDirs {
    fn default() -> Self {
        Self {
            memories: default_memories_dir(),
            personas: default_personas_dir(),
            sessions: default_sessions_dir(),
        }
    }
}

impl ResourceConfig {
    pub fn sessions_dir(&self) -> PathBuf {
        self.base_path.join(&self.data.sessions)
    }

    pub fn personas_dir(&self) -> PathBuf {
        self.base_path.join(&self.data.personas)
    }

    pub fn memories_dir(&self) -> PathBuf {
        self.base_path.join(&self.data.memories)
    }

    pub fn preferences_dir(&self) -> PathBuf {
        self.base_path.join("preferences")
    }
}

impl Config {
    /// Load configuration from a file, falling back to defaults when the
    /// file does not exist. Environment variables override service URLs.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment overrides for deployment without editing the file
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            self.ollama.base_url = url;
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            self.ollama.model = model;
        }
        if let Ok(url) = std::env::var("TTS_URL") {
            self.python.services.tts_url = url;
        }
        if let Ok(url) = std::env::var("ASR_URL") {
            self.python.services.asr_url = url;
        }
    }

    /// Create the on-disk layout this config points at
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.resource.sessions_dir(),
            self.resource.personas_dir(),
            self.resource.memories_dir(),
            self.resource.preferences_dir(),
            self.resource.log_path.clone(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_runnable() {
        let config = Config::default();
        assert_eq!(config.system.max_context_tokens, 4000);
        assert_eq!(config.system.tts_concurrency, 3);
        assert!(config.ollama.stream);
        assert!(!config.web_search.enabled);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml = r#"
            [ollama]
            model = "llama3:8b"

            [system]
            max_context_tokens = 2000
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.ollama.model, "llama3:8b");
        assert_eq!(config.ollama.base_url, "http://localhost:11434/v1");
        assert_eq!(config.system.max_context_tokens, 2000);
        assert_eq!(config.system.session_timeout, 1800);
    }

    #[test]
    fn test_web_search_section_name() {
        let toml = r#"
            [web-search]
            enabled = true
            max_results = 5
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.web_search.enabled);
        assert_eq!(config.web_search.max_results, 5);
    }

    #[test]
    fn test_resource_paths() {
        let config = Config::default();
        assert_eq!(
            config.resource.sessions_dir(),
            PathBuf::from("./data/sessions")
        );
        assert_eq!(
            config.resource.personas_dir(),
            PathBuf::from("./data/personas")
        );
    }
}
