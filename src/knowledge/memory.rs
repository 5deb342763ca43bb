//! Short-term memory store and background extractor
//!
//! Memory entries live one JSON file per session. The context builder
//! reads a ranked subset; a background extractor writes new entries after
//! completed turns. Reads and writes to one session's file go through a
//! per-session lock.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::llm::{LlmAdapter, LlmMessage, LlmRequest};

/// Entries kept per session before the purge policy kicks in
const MEMORY_CAP: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Fact,
    Preference,
    Relationship,
    Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: String,
    pub session_id: String,
    pub content: String,
    pub kind: MemoryKind,
    /// 1 (trivial) to 10 (critical)
    pub importance: u8,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u32,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl MemoryEntry {
    pub fn new(session_id: &str, content: &str, kind: MemoryKind, importance: u8) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            content: content.to_string(),
            kind,
            importance: importance.clamp(1, 10),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            keywords: Vec::new(),
        }
    }
}

/// File-backed memory store with per-session locking
pub struct MemoryStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_entries(&self, session_id: &str) -> Result<Vec<MemoryEntry>> {
        let path = self.path_for(session_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("Corrupt memory file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn write_entries(&self, session_id: &str, entries: &[MemoryEntry]) -> Result<()> {
        let path = self.path_for(session_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Store new entries, applying the purge policy when past the cap:
    /// lowest importance goes first, least-recently-accessed breaking ties
    pub async fn add(&self, session_id: &str, new_entries: Vec<MemoryEntry>) -> Result<()> {
        if new_entries.is_empty() {
            return Ok(());
        }
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let mut entries = self.read_entries(session_id).await?;
        entries.extend(new_entries);

        if entries.len() > MEMORY_CAP {
            entries.sort_by(|a, b| {
                b.importance
                    .cmp(&a.importance)
                    .then(b.last_accessed_at.cmp(&a.last_accessed_at))
            });
            entries.truncate(MEMORY_CAP);
        }

        self.write_entries(session_id, &entries).await
    }

    /// Ranked retrieval for a query: keyword overlap weighted with
    /// importance and recency. Updates access bookkeeping best-effort.
    pub async fn retrieve(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let mut entries = self.read_entries(session_id).await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_lower = query.to_lowercase();
        let now = Utc::now();

        let mut scored: Vec<(f32, usize)> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (score_entry(e, &query_lower, now), i))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        let picked: Vec<usize> = scored.iter().map(|(_, i)| *i).collect();
        for &i in &picked {
            entries[i].access_count += 1;
            entries[i].last_accessed_at = now;
        }
        let result: Vec<MemoryEntry> = picked.iter().map(|&i| entries[i].clone()).collect();

        if let Err(e) = self.write_entries(session_id, &entries).await {
            debug!("Access bookkeeping write failed for {session_id}: {e}");
        }
        Ok(result)
    }

    pub async fn all(&self, session_id: &str) -> Result<Vec<MemoryEntry>> {
        self.read_entries(session_id).await
    }
}

/// Relevance score; zero means "not retrieved"
fn score_entry(entry: &MemoryEntry, query_lower: &str, now: DateTime<Utc>) -> f32 {
    let mut score = 0.0;

    for keyword in &entry.keywords {
        if !keyword.is_empty() && query_lower.contains(&keyword.to_lowercase()) {
            score += 2.0;
        }
    }
    if !entry.content.is_empty() {
        // Cheap content overlap: any query word of length >= 2 appearing
        let content_lower = entry.content.to_lowercase();
        for word in query_lower.split_whitespace().filter(|w| w.len() >= 2) {
            if content_lower.contains(word) {
                score += 1.0;
                break;
            }
        }
    }
    if score == 0.0 {
        return 0.0;
    }

    score += entry.importance as f32 * 0.3;
    let age_hours = (now - entry.created_at).num_hours().max(0) as f32;
    score += (24.0 - age_hours).max(0.0) / 24.0;
    score
}

/// Extractor output shape requested from the model
#[derive(Debug, Deserialize)]
struct ExtractedMemory {
    content: String,
    #[serde(default)]
    kind: Option<MemoryKind>,
    #[serde(default)]
    importance: Option<u8>,
    #[serde(default)]
    keywords: Vec<String>,
}

const EXTRACTION_PROMPT: &str = "You extract long-lived facts from a conversation exchange. \
Return a JSON array (possibly empty) of objects with fields: \
content (string), kind (one of fact, preference, relationship, event), \
importance (1-10), keywords (array of strings). \
Only include things worth remembering across sessions. Return JSON only.";

/// Distill memory entries from a completed turn. Runs in the background;
/// failures are logged and swallowed.
pub async fn extract_from_turn(
    llm: &dyn LlmAdapter,
    model: &str,
    store: &MemoryStore,
    session_id: &str,
    user_text: &str,
    assistant_text: &str,
) -> Result<()> {
    let req = LlmRequest {
        messages: vec![
            LlmMessage::system(EXTRACTION_PROMPT),
            LlmMessage::user(format!("User: {user_text}\nAssistant: {assistant_text}")),
        ],
        model: model.to_string(),
        temperature: Some(0.2),
        max_tokens: Some(512),
        stream: false,
        options: None,
    };

    let raw = match llm.generate(&req).await {
        Ok(raw) => raw,
        Err(e) => {
            debug!("Memory extraction skipped for {session_id}: {e}");
            return Ok(());
        }
    };

    let entries = parse_extraction(session_id, &raw);
    if entries.is_empty() {
        return Ok(());
    }
    debug!("Extracted {} memory entries for {session_id}", entries.len());
    store.add(session_id, entries).await
}

/// Parse the extractor's reply, tolerating surrounding prose/code fences
fn parse_extraction(session_id: &str, raw: &str) -> Vec<MemoryEntry> {
    let start = raw.find('[');
    let end = raw.rfind(']');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &raw[s..=e],
        _ => {
            warn!("Extractor returned no JSON array");
            return Vec::new();
        }
    };

    let parsed: Vec<ExtractedMemory> = match serde_json::from_str(json) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Unparseable extractor output: {e}");
            return Vec::new();
        }
    };

    parsed
        .into_iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| {
            let mut entry = MemoryEntry::new(
                session_id,
                m.content.trim(),
                m.kind.unwrap_or(MemoryKind::Fact),
                m.importance.unwrap_or(5),
            );
            entry.keywords = m.keywords;
            entry
        })
        .collect()
}
