//! User preferences (modular shape)
//!
//! Preferences are stored one JSON file per user and snapshotted into the
//! session when it is created, so a running turn never sees a half-updated
//! record. Unknown fields are ignored on load, which lets files written by
//! older flat layouts degrade to defaults instead of failing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::types::ChannelType;

/// Output strategy selector for a channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    TextOnly,
    CharStreamTts,
    SentenceSync,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPreferences {
    pub basic: BasicPrefs,
    pub ui: UiPrefs,
    pub asr: AsrPrefs,
    pub tts: TtsPrefs,
    pub llm: LlmPrefs,
    pub web_search: WebSearchPrefs,
    pub streaming: StreamingPrefs,
    pub output_channel: OutputChannelPrefs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BasicPrefs {
    pub nickname: String,
    pub language: String,
}

impl Default for BasicPrefs {
    fn default() -> Self {
        Self {
            nickname: String::new(),
            language: "zh-CN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiPrefs {
    pub theme: String,
    pub show_thinking: bool,
}

impl Default for UiPrefs {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            show_thinking: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AsrPrefs {
    pub enabled: bool,
    pub audio_format: String,
}

impl Default for AsrPrefs {
    fn default() -> Self {
        Self {
            enabled: false,
            audio_format: "wav".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TtsPrefs {
    pub preferred_speaker: String,
    pub speed: f32,
    pub audio_format: String,
}

impl Default for TtsPrefs {
    fn default() -> Self {
        Self {
            preferred_speaker: "default".to_string(),
            speed: 1.0,
            audio_format: "wav".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmPrefs {
    /// Empty means "use the server-configured backend"
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

impl Default for LlmPrefs {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            model: String::new(),
            max_tokens: 2048,
            temperature: 0.7,
            stream: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSearchPrefs {
    pub enabled: bool,
}

impl Default for WebSearchPrefs {
    fn default() -> Self {
        Self { enabled: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamingPrefs {
    pub chunk_size: usize,
    pub delay_ms: u64,
}

impl Default for StreamingPrefs {
    fn default() -> Self {
        Self {
            chunk_size: 0,
            delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputChannelPrefs {
    pub chat_window: ChatWindowPrefs,
    pub live2d: Live2dPrefs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatWindowPrefs {
    pub enabled: bool,
    pub mode: OutputMode,
    pub auto_tts: bool,
    pub speaker_id: String,
}

impl Default for ChatWindowPrefs {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: OutputMode::CharStreamTts,
            auto_tts: true,
            speaker_id: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Live2dPrefs {
    pub enabled: bool,
    pub mode: OutputMode,
    pub speaker_id: String,
    pub speed: f32,
    pub show_bubble: bool,
    /// Grace period added to the expected speech duration when waiting for
    /// the client's playback-completed event, in milliseconds
    pub bubble_timeout: u64,
}

impl Default for Live2dPrefs {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: OutputMode::SentenceSync,
            speaker_id: "default".to_string(),
            speed: 1.0,
            show_bubble: true,
            bubble_timeout: 5000,
        }
    }
}

impl UserPreferences {
    /// Channels that are active for this user, with their modes
    pub fn active_channels(&self) -> Vec<(ChannelType, OutputMode)> {
        let mut channels = Vec::new();
        if self.output_channel.chat_window.enabled {
            channels.push((ChannelType::ChatWindow, self.output_channel.chat_window.mode));
        }
        if self.output_channel.live2d.enabled {
            channels.push((ChannelType::Live2d, self.output_channel.live2d.mode));
        }
        channels
    }
}

/// File-backed preference store, one JSON document per user id
#[derive(Clone)]
pub struct PreferenceStore {
    dir: PathBuf,
}

impl PreferenceStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        // User ids come off the wire; keep them path-safe
        let safe: String = user_id
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let safe = if safe.is_empty() { "default".to_string() } else { safe };
        self.dir.join(format!("{safe}.json"))
    }

    /// Load preferences for a user, defaulting when absent or unreadable
    pub async fn load(&self, user_id: &str) -> UserPreferences {
        let path = self.path_for(user_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(prefs) => prefs,
                Err(e) => {
                    warn!("Unparseable preferences at {}: {e}", path.display());
                    UserPreferences::default()
                }
            },
            Err(_) => {
                debug!("No preferences for '{user_id}', using defaults");
                UserPreferences::default()
            }
        }
    }

    /// Persist preferences for a user
    pub async fn save(&self, user_id: &str, prefs: &UserPreferences) -> Result<()> {
        let path = self.path_for(user_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(prefs)?;
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("Failed to write preferences {}", path.display()))?;
        Ok(())
    }

    /// Reset a user back to defaults and return the fresh record
    pub async fn reset(&self, user_id: &str) -> Result<UserPreferences> {
        let prefs = UserPreferences::default();
        self.save(user_id, &prefs).await?;
        Ok(prefs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let prefs = UserPreferences::default();
        assert!(prefs.output_channel.chat_window.enabled);
        assert_eq!(prefs.output_channel.chat_window.mode, OutputMode::CharStreamTts);
        assert!(!prefs.output_channel.live2d.enabled);
        assert_eq!(prefs.tts.speed, 1.0);
    }

    #[test]
    fn test_active_channels() {
        let mut prefs = UserPreferences::default();
        prefs.output_channel.live2d.enabled = true;
        let channels = prefs.active_channels();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].0, ChannelType::ChatWindow);
        assert_eq!(channels[1], (ChannelType::Live2d, OutputMode::SentenceSync));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        // A legacy flat layout should load as defaults, not error
        let legacy = r#"{"voiceSpeed": 1.2, "theme": "dark", "llm": {"model": "x"}}"#;
        let prefs: UserPreferences = serde_json::from_str(legacy).unwrap();
        assert_eq!(prefs.llm.model, "x");
        assert_eq!(prefs.ui.theme, "light");
    }

    #[tokio::test]
    async fn test_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path().to_path_buf());

        let mut prefs = UserPreferences::default();
        prefs.tts.preferred_speaker = "mika".to_string();
        store.save("alice", &prefs).await.unwrap();

        let loaded = store.load("alice").await;
        assert_eq!(loaded.tts.preferred_speaker, "mika");

        let reset = store.reset("alice").await.unwrap();
        assert_eq!(reset.tts.preferred_speaker, "default");
    }

    #[tokio::test]
    async fn test_path_traversal_is_neutralized() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path().to_path_buf());
        store
            .save("../../etc/passwd", &UserPreferences::default())
            .await
            .unwrap();
        // Nothing escaped the store directory
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
