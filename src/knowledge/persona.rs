//! Persona store
//!
//! Personas are JSON files in the personas directory, loaded once at
//! startup and rebuilt on demand (hot reload). A turn takes an immutable
//! snapshot, so edits never affect a reply in flight.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// An immutable persona snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    /// Free-form generation parameters (temperature overrides etc.)
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Read-mostly persona registry, rebuild-on-reload
pub struct PersonaStore {
    dir: PathBuf,
    personas: RwLock<HashMap<String, Persona>>,
}

impl PersonaStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            personas: RwLock::new(HashMap::new()),
        }
    }

    /// Load every `*.json` persona file, replacing the current registry
    pub async fn reload(&self) -> Result<usize> {
        let mut loaded = HashMap::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *self.personas.write().await = loaded;
                return Ok(0);
            }
            Err(e) => return Err(e).context("Failed to read personas directory"),
        };

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => match serde_json::from_str::<Persona>(&contents) {
                    Ok(persona) => {
                        loaded.insert(persona.name.clone(), persona);
                    }
                    Err(e) => warn!("Skipping unparseable persona {}: {e}", path.display()),
                },
                Err(e) => warn!("Skipping unreadable persona {}: {e}", path.display()),
            }
        }

        let count = loaded.len();
        *self.personas.write().await = loaded;
        info!("Loaded {count} personas");
        Ok(count)
    }

    pub async fn get(&self, name: &str) -> Option<Persona> {
        self.personas.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<Persona> {
        let mut personas: Vec<Persona> = self.personas.read().await.values().cloned().collect();
        personas.sort_by(|a, b| a.name.cmp(&b.name));
        personas
    }

    /// Create or update a persona, persisting it to disk
    pub async fn save(&self, persona: Persona) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.json", persona.id));
        let contents = serde_json::to_string_pretty(&persona)?;
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("Failed to write persona {}", path.display()))?;
        self.personas
            .write()
            .await
            .insert(persona.name.clone(), persona);
        Ok(())
    }

    /// Delete a persona by name. Returns whether it existed.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let removed = self.personas.write().await.remove(name);
        if let Some(persona) = removed {
            let path = self.dir.join(format!("{}.json", persona.id));
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).context("Failed to delete persona file"),
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona(id: &str, name: &str, prompt: &str) -> Persona {
        Persona {
            id: id.to_string(),
            name: name.to_string(),
            system_prompt: prompt.to_string(),
            parameters: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_save_reload_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersonaStore::new(dir.path().to_path_buf());

        store
            .save(persona("p1", "Mika", "You are Mika."))
            .await
            .unwrap();

        // A fresh store sees the persisted file
        let fresh = PersonaStore::new(dir.path().to_path_buf());
        assert_eq!(fresh.reload().await.unwrap(), 1);
        let loaded = fresh.get("Mika").await.unwrap();
        assert_eq!(loaded.system_prompt, "You are Mika.");
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let store = PersonaStore::new(PathBuf::from("/nonexistent/personas"));
        assert_eq!(store.reload().await.unwrap(), 0);
        assert!(store.get("anyone").await.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersonaStore::new(dir.path().to_path_buf());
        store.save(persona("p1", "Mika", "x")).await.unwrap();

        assert!(store.delete("Mika").await.unwrap());
        assert!(!store.delete("Mika").await.unwrap());
        assert!(store.get("Mika").await.is_none());
    }

    #[tokio::test]
    async fn test_bad_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let store = PersonaStore::new(dir.path().to_path_buf());
        assert_eq!(store.reload().await.unwrap(), 0);
    }
}
