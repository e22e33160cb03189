//! Timeline events.
//!
//! Every processing step of a review is recorded as a [`TimelineItem`]:
//! written to `<storage_root>/timeline/` for auditing and appended to the
//! progress store so clients can poll it while the review runs.
//! Recording never fails the caller.

use std::path::PathBuf;

use chrono::Utc;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::{
    base::{
        config::Config,
        text::sanitize_name,
        types::{Origin, TimelineItem, Void},
    },
    service::progress::ProgressStore,
};

impl TimelineItem {
    /// New item stamped now, with origin `agent` and category `state`.
    pub fn new(step: &str, meta: Value) -> Self {
        Self {
            step: step.to_string(),
            ts: Utc::now().timestamp_millis(),
            origin: Origin::Agent,
            category: "state".to_string(),
            meta,
            artifacts: Default::default(),
        }
    }

    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }
}

/// Timeline recorder.
#[derive(Clone)]
pub struct TimelineService {
    dir: PathBuf,
    progress: ProgressStore,
}

impl TimelineService {
    pub fn new(dir: impl Into<PathBuf>, progress: ProgressStore) -> Self {
        Self { dir: dir.into(), progress }
    }

    pub fn from_config(config: &Config, progress: ProgressStore) -> Self {
        Self::new(config.timeline_dir(), progress)
    }

    /// Build an item (see [`TimelineItem::new`]).
    pub fn make(step: &str, meta: Value, origin: Option<Origin>, category: Option<&str>) -> TimelineItem {
        let item = TimelineItem::new(step, meta).origin(origin.unwrap_or_default());

        match category {
            Some(c) => item.category(c),
            None => item,
        }
    }

    /// Record `item`, forwarding it to the progress store when `progress_id` is set.
    #[instrument(name = "TimelineService::push", skip_all)]
    pub async fn push(&self, progress_id: Option<&str>, item: &TimelineItem) {
        if let Err(err) = self.write(item).await {
            warn!("Failed to write timeline event `{}`: {err}", item.step);
        }

        let Some(id) = progress_id.filter(|id| !id.trim().is_empty()) else {
            return;
        };

        if let Err(err) = self.progress.push(id, item).await {
            warn!("Failed to push progress for `{id}`: {err}");
        }
    }

    async fn write(&self, item: &TimelineItem) -> Void {
        tokio::fs::create_dir_all(&self.dir).await?;

        let rand = uuid::Uuid::new_v4().simple().to_string();
        let filename = format!("{}_{}_{}.json", item.ts, sanitize_name(&item.step, 80), &rand[..4]);

        tokio::fs::write(self.dir.join(filename), serde_json::to_vec_pretty(item)?).await?;

        Ok(())
    }
}

// Tests.
