//! Saved review sessions, one pretty-printed JSON file per session.

use std::{path::PathBuf, time::SystemTime};

use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use crate::base::{config::Config, text::sanitize_name, types::Res};

/// Listing entry for a saved session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEntry {
    pub id: String,
    pub filename: String,
}

/// Filesystem-backed session store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sessions_dir())
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        let id = sanitize_name(id, 128);
        (!id.is_empty()).then(|| self.dir.join(format!("{id}.json")))
    }

    /// Persist `payload` and return its id.
    ///
    /// The payload's own non-empty `id` is kept; otherwise a fresh UUID is assigned.
    #[instrument(name = "SessionStore::save", skip_all)]
    pub async fn save(&self, mut payload: Value) -> Res<String> {
        let given = payload.get("id").and_then(Value::as_str).map(|s| sanitize_name(s.trim(), 128)).filter(|s| !s.is_empty());
        let id = given.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if let Some(obj) = payload.as_object_mut() {
            obj.insert("id".to_string(), Value::String(id.clone()));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(format!("{id}.json")), serde_json::to_vec_pretty(&payload)?).await?;

        Ok(id)
    }

    /// Load a session, `None` when it does not exist.
    pub async fn load(&self, id: &str) -> Res<Option<Value>> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Most recently modified sessions first; `limit` is clamped to `1..=100`.
    pub async fn list(&self, limit: usize) -> Res<Vec<SessionEntry>> {
        let limit = limit.clamp(1, 100);

        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries: Vec<(SystemTime, SessionEntry)> = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let filename = entry.file_name().to_string_lossy().to_string();

            let Some(id) = filename.strip_suffix(".json") else {
                continue;
            };

            let modified = entry.metadata().await?.modified().unwrap_or(SystemTime::UNIX_EPOCH);

            entries.push((
                modified,
                SessionEntry {
                    id: id.to_string(),
                    filename: filename.clone(),
                },
            ));
        }

        entries.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(entries.into_iter().take(limit).map(|(_, e)| e).collect())
    }

    /// Delete a session; deleting a missing session is not an error.
    pub async fn remove(&self, id: &str) -> Res<()> {
        let Some(path) = self.path_for(id) else {
            return Ok(());
        };

        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

// Tests.
