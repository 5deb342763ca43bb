//! Shared types used across modules
//!
//! This module contains the message envelope and the small value types
//! that are used by multiple modules to avoid circular dependencies.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Convert to OpenAI-style role string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Parse from OpenAI-style role string
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload kind of an outbound or persisted message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Audio,
    System,
    Error,
    Thinking,
}

/// Logical output surface a message belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    ChatWindow,
    Live2d,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::ChatWindow => "chat_window",
            ChannelType::Live2d => "live2d",
        }
    }
}

/// A sentence extracted from the token stream, with its emission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub text: String,
    pub order: u32,
    pub session_id: String,
}

impl Sentence {
    /// Identity of a sentence on a channel: `channel:session:order`
    pub fn id_on(&self, channel: ChannelType) -> String {
        sentence_id(channel, &self.session_id, self.order)
    }
}

/// Build the sentence identity string `channel:session:order`
pub fn sentence_id(channel: ChannelType, session_id: &str, order: u32) -> String {
    format!("{}:{}:{}", channel.as_str(), session_id, order)
}

/// Single message envelope used both internally and on the wire.
///
/// The record is deliberately flat: optional field groups (streaming,
/// audio, sentence tracking) are plain `Option`s and cross-group helpers
/// are free functions, so the envelope stays a dumb data carrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: String,
    pub session_id: String,
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_content: Option<String>,
    pub channel_type: ChannelType,

    // Streaming group
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub stream_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentence_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentence_order: Option<u32>,
    #[serde(default)]
    pub sentence_complete: bool,

    // Audio group (base64 on the wire)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_audio"
    )]
    pub audio_data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_format: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Serde helper: `Option<Vec<u8>>` as base64 string
mod base64_audio {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => serializer.serialize_str(&BASE64.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            Some(s) => BASE64
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

impl ChatMessage {
    fn base(session_id: &str, role: Role, kind: MessageType, channel: ChannelType) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            kind,
            timestamp: Utc::now(),
            content: String::new(),
            thinking_content: None,
            channel_type: channel,
            streaming: false,
            stream_complete: false,
            sentence_id: None,
            sentence_order: None,
            sentence_complete: false,
            audio_data: None,
            audio_format: None,
            metadata: HashMap::new(),
        }
    }

    /// A streaming text chunk for a channel
    pub fn text_chunk(session_id: &str, channel: ChannelType, content: &str) -> Self {
        let mut msg = Self::base(session_id, Role::Assistant, MessageType::Text, channel);
        msg.content = content.to_string();
        msg.streaming = true;
        msg
    }

    /// A thinking-region chunk, surfaced as its own message type
    pub fn thinking_chunk(session_id: &str, channel: ChannelType, content: &str) -> Self {
        let mut msg = Self::base(session_id, Role::Assistant, MessageType::Thinking, channel);
        msg.thinking_content = Some(content.to_string());
        msg.streaming = true;
        msg.metadata.insert("stage".to_string(), "thinking".to_string());
        msg
    }

    /// A complete sentence for the avatar bubble track
    pub fn sentence_text(session_id: &str, channel: ChannelType, sentence: &Sentence) -> Self {
        let mut msg = Self::base(session_id, Role::Assistant, MessageType::Text, channel);
        msg.content = sentence.text.clone();
        msg.streaming = true;
        msg.sentence_id = Some(sentence.id_on(channel));
        msg.sentence_order = Some(sentence.order);
        msg.sentence_complete = true;
        msg
    }

    /// Synthesized audio for a sentence
    pub fn sentence_audio(
        session_id: &str,
        channel: ChannelType,
        sentence: &Sentence,
        audio: Vec<u8>,
        format: &str,
    ) -> Self {
        let mut msg = Self::base(session_id, Role::Assistant, MessageType::Audio, channel);
        msg.content = sentence.text.clone();
        msg.streaming = true;
        msg.sentence_id = Some(sentence.id_on(channel));
        msg.sentence_order = Some(sentence.order);
        msg.sentence_complete = true;
        msg.audio_data = Some(audio);
        msg.audio_format = Some(format.to_string());
        msg
    }

    /// Terminal marker: exactly one per turn per channel, always last
    pub fn stream_end(session_id: &str, channel: ChannelType) -> Self {
        let mut msg = Self::base(session_id, Role::Assistant, MessageType::Text, channel);
        msg.stream_complete = true;
        msg
    }

    /// A server-side system message (welcome, status, interrupt_confirm...)
    pub fn system(session_id: &str, sub_type: &str, content: &str) -> Self {
        let mut msg = Self::base(
            session_id,
            Role::System,
            MessageType::System,
            ChannelType::ChatWindow,
        );
        msg.content = content.to_string();
        msg.metadata.insert("subType".to_string(), sub_type.to_string());
        msg
    }

    /// An error message carrying a classified code
    pub fn error(session_id: &str, channel: ChannelType, code: &str, details: &str) -> Self {
        let mut msg = Self::base(session_id, Role::System, MessageType::Error, channel);
        msg.content = details.to_string();
        msg.metadata.insert("errorCode".to_string(), code.to_string());
        msg
    }

    /// A per-sentence TTS failure (local, does not abort the turn)
    pub fn tts_error(
        session_id: &str,
        channel: ChannelType,
        sentence: &Sentence,
        details: &str,
    ) -> Self {
        let mut msg = Self::error(session_id, channel, "tts_error", details);
        msg.sentence_id = Some(sentence.id_on(channel));
        msg.sentence_order = Some(sentence.order);
        msg
    }
}

/// True when both the text and the audio halves of a sentence are present
/// on a message (clients use this to detect a self-contained bubble frame).
pub fn both_ready(msg: &ChatMessage) -> bool {
    !msg.content.is_empty() && msg.audio_data.is_some()
}

/// Encode raw audio bytes for ad-hoc wire use
pub fn encode_audio(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode base64 audio received from a client
pub fn decode_audio(data: &str) -> anyhow::Result<Vec<u8>> {
    Ok(BASE64.decode(data.as_bytes())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert_eq!(Role::from_str_loose("User"), Some(Role::User));
        assert_eq!(Role::Assistant.as_str(), "assistant");
        assert_eq!(Role::from_str_loose("robot"), None);
    }

    #[test]
    fn test_sentence_id_format() {
        let s = Sentence {
            text: "hi.".to_string(),
            order: 2,
            session_id: "s1".to_string(),
        };
        assert_eq!(s.id_on(ChannelType::Live2d), "live2d:s1:2");
        assert_eq!(s.id_on(ChannelType::ChatWindow), "chat_window:s1:2");
    }

    #[test]
    fn test_audio_base64_on_wire() {
        let s = Sentence {
            text: "ok.".to_string(),
            order: 0,
            session_id: "s1".to_string(),
        };
        let msg = ChatMessage::sentence_audio("s1", ChannelType::Live2d, &s, vec![1, 2, 3], "wav");
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["audioData"], BASE64.encode([1u8, 2, 3]));
        assert_eq!(wire["type"], "audio");
        assert_eq!(wire["channelType"], "live2d");

        let back: ChatMessage = serde_json::from_value(wire).unwrap();
        assert_eq!(back.audio_data, Some(vec![1, 2, 3]));
        assert!(both_ready(&back));
    }

    #[test]
    fn test_stream_end_marker() {
        let msg = ChatMessage::stream_end("s1", ChannelType::ChatWindow);
        assert!(msg.stream_complete);
        assert!(!msg.streaming);
        assert!(msg.content.is_empty());
    }

    #[test]
    fn test_unique_message_ids() {
        let a = ChatMessage::system("s1", "welcome", "hello");
        let b = ChatMessage::system("s1", "welcome", "hello");
        assert_ne!(a.message_id, b.message_id);
    }
}
