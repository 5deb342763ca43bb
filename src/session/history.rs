//! Append-only session history files
//!
//! One JSON file per session under the configured sessions directory,
//! holding an ordered array of `{type, role, content, timestamp}`.
//! Appends rewrite the whole file. Thinking content is never persisted.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::types::{MessageType, Role};

/// Timestamp layout used inside history files: `yyyy-MM-dd HH:mm:ss`
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One persisted history record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

impl HistoryEntry {
    pub fn user(content: &str) -> Self {
        Self {
            kind: MessageType::Text,
            role: Role::User,
            content: content.to_string(),
            timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            kind: MessageType::Text,
            role: Role::Assistant,
            content: content.to_string(),
            timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

/// File-backed history store
#[derive(Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        self.dir.join(format!("{safe}_history.json"))
    }

    /// Load the full history of a session (empty when none exists)
    pub async fn load(&self, session_id: &str) -> Result<Vec<HistoryEntry>> {
        let path = self.path_for(session_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("Corrupt history file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Append entries by rewriting the file. Thinking records are dropped
    /// here as a last line of defense.
    pub async fn append(&self, session_id: &str, entries: &[HistoryEntry]) -> Result<()> {
        let mut all = self.load(session_id).await?;
        all.extend(
            entries
                .iter()
                .filter(|e| e.kind != MessageType::Thinking)
                .cloned(),
        );

        let path = self.path_for(session_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(&all)?;
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("History for {session_id}: {} entries", all.len());
        Ok(())
    }

    /// Remove a session's history file
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let path = self.path_for(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    /// Enumerate session ids that have a history file
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e).context("Failed to list sessions directory"),
        };
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix("_history.json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (_dir, store) = store();
        let entries = vec![
            HistoryEntry::user("你好"),
            HistoryEntry::assistant("你好，很高兴见到你。"),
        ];
        store.append("abc", &entries).await.unwrap();

        let loaded = store.load("abc").await.unwrap();
        assert_eq!(loaded, entries);
    }

    #[tokio::test]
    async fn test_append_preserves_earlier_entries() {
        let (_dir, store) = store();
        store.append("abc", &[HistoryEntry::user("one")]).await.unwrap();
        store
            .append("abc", &[HistoryEntry::assistant("two")])
            .await
            .unwrap();

        let loaded = store.load("abc").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].content, "one");
        assert_eq!(loaded[1].content, "two");
    }

    #[tokio::test]
    async fn test_thinking_is_never_persisted() {
        let (_dir, store) = store();
        let thinking = HistoryEntry {
            kind: MessageType::Thinking,
            role: Role::Assistant,
            content: "secret plan".to_string(),
            timestamp: "2025-01-01 00:00:00".to_string(),
        };
        store
            .append("abc", &[HistoryEntry::user("hi"), thinking])
            .await
            .unwrap();

        let loaded = store.load("abc").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "hi");
    }

    #[tokio::test]
    async fn test_missing_session_loads_empty() {
        let (_dir, store) = store();
        assert!(store.load("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let (_dir, store) = store();
        store.append("a", &[HistoryEntry::user("x")]).await.unwrap();
        store.append("b", &[HistoryEntry::user("y")]).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["a", "b"]);

        store.delete("a").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["b"]);
        // Deleting twice is fine
        store.delete("a").await.unwrap();
    }

    #[test]
    fn test_timestamp_format() {
        let entry = HistoryEntry::user("x");
        // yyyy-MM-dd HH:mm:ss
        assert_eq!(entry.timestamp.len(), 19);
        assert_eq!(&entry.timestamp[4..5], "-");
        assert_eq!(&entry.timestamp[10..11], " ");
        assert_eq!(&entry.timestamp[13..14], ":");
    }
}
