//! Knowledge facade
//!
//! One stop for everything the context builder needs: the persona's
//! system prompt, the ranked short-term memory, and the keyword-triggered
//! long-term "world book" knowledge.

pub mod memory;
pub mod persona;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::SystemPromptConfig;

pub use memory::{MemoryEntry, MemoryKind, MemoryStore};
pub use persona::{Persona, PersonaStore};

/// A long-term knowledge entry, surfaced when a keyword matches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldBookEntry {
    pub keywords: Vec<String>,
    pub content: String,
}

/// Keyword-triggered lore, loaded from `world_book.json`
pub struct WorldBook {
    path: PathBuf,
    entries: RwLock<Vec<WorldBookEntry>>,
}

impl WorldBook {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub async fn reload(&self) -> Result<usize> {
        let entries: Vec<WorldBookEntry> = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("Corrupt world book {}", self.path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e).context("Failed to read world book"),
        };
        let count = entries.len();
        *self.entries.write().await = entries;
        if count > 0 {
            info!("Loaded {count} world book entries");
        }
        Ok(count)
    }

    /// Entries whose keywords appear in the query
    pub async fn lookup(&self, query: &str) -> Vec<String> {
        let query_lower = query.to_lowercase();
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| {
                e.keywords
                    .iter()
                    .any(|k| !k.is_empty() && query_lower.contains(&k.to_lowercase()))
            })
            .map(|e| e.content.clone())
            .collect()
    }
}

/// Persona prompt + memory + world book behind one interface
pub struct KnowledgeFacade {
    pub personas: Arc<PersonaStore>,
    pub memory: Arc<MemoryStore>,
    pub world_book: Arc<WorldBook>,
}

impl KnowledgeFacade {
    pub fn new(
        personas: Arc<PersonaStore>,
        memory: Arc<MemoryStore>,
        world_book: Arc<WorldBook>,
    ) -> Self {
        Self {
            personas,
            memory,
            world_book,
        }
    }

    /// Resolve the system prompt for a turn: persona prompt when enabled
    /// and present, otherwise the configured base, otherwise the fallback
    pub async fn system_prompt(&self, persona_name: &str, cfg: &SystemPromptConfig) -> String {
        if cfg.enable_persona && !persona_name.is_empty() {
            match self.personas.get(persona_name).await {
                Some(p) if !p.system_prompt.trim().is_empty() => return p.system_prompt,
                Some(_) => debug!("Persona '{persona_name}' has an empty prompt"),
                None => warn!("Unknown persona '{persona_name}', using base prompt"),
            }
        }
        if !cfg.base.trim().is_empty() {
            cfg.base.clone()
        } else {
            cfg.fallback.clone()
        }
    }

    /// Combined knowledge block for a query: recent memory under
    /// `【近期记忆】`, world book matches under `【相关知识】`.
    /// `None` when there is nothing relevant.
    pub async fn knowledge_block(&self, session_id: &str, query: &str) -> Option<String> {
        let memories = self
            .memory
            .retrieve(session_id, query, 5)
            .await
            .unwrap_or_else(|e| {
                warn!("Memory retrieval failed for {session_id}: {e}");
                Vec::new()
            });
        let lore = self.world_book.lookup(query).await;

        if memories.is_empty() && lore.is_empty() {
            return None;
        }

        let mut block = String::new();
        if !memories.is_empty() {
            block.push_str("【近期记忆】\n");
            for m in &memories {
                block.push_str("- ");
                block.push_str(&m.content);
                block.push('\n');
            }
        }
        if !lore.is_empty() {
            if !block.is_empty() {
                block.push('\n');
            }
            block.push_str("【相关知识】\n");
            for l in &lore {
                block.push_str("- ");
                block.push_str(l);
                block.push('\n');
            }
        }
        Some(block)
    }
}
