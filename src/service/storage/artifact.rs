//! Artifact store.
//!
//! Every request body, raw response and report that crosses the service
//! boundary is written to `<storage_root>/artifacts` and served back under
//! `<base_path>/artifacts/<filename>`.

use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::base::{
    config::Config,
    text::sanitize_name,
    types::{ArtifactRef, Res},
};

/// Filesystem-backed artifact store.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    url_prefix: String,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, base_path: &str) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: format!("{base_path}/artifacts"),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.artifacts_dir(), &config.base_path)
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Write `content` and return its public reference.
    ///
    /// `ext` may be given with or without the leading dot; it defaults to `.txt`.
    #[instrument(name = "ArtifactStore::save", skip_all)]
    pub async fn save(&self, content: impl AsRef<[u8]>, hint: &str, ext: Option<&str>) -> Res<ArtifactRef> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let filename = artifact_filename(hint, ext.unwrap_or(".txt"));
        tokio::fs::write(self.dir.join(&filename), content.as_ref()).await?;

        debug!("Saved artifact `{filename}`");

        Ok(ArtifactRef {
            url: format!("{}/{filename}", self.url_prefix),
            filename,
        })
    }

    /// Pretty-print `value` and save it as a `.json` artifact.
    pub async fn save_json<T: Serialize>(&self, value: &T, hint: &str) -> Res<ArtifactRef> {
        let body = serde_json::to_vec_pretty(value)?;
        self.save(body, hint, Some(".json")).await
    }
}

/// `<timestamp>_<hint>_<4 hex>.<ext>`, with `:` in the timestamp replaced by `-`.
fn artifact_filename(hint: &str, ext: &str) -> String {
    let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true).replace(':', "-");

    let hint = sanitize_name(hint, 80);
    let hint = if hint.is_empty() { "artifact".to_string() } else { hint };

    let rand = uuid::Uuid::new_v4().simple().to_string();
    let ext = ext.trim_start_matches('.');

    format!("{ts}_{hint}_{}.{ext}", &rand[..4])
}

// Tests.
