//! Progress store: per-request timeline lists polled by the front-end.

pub mod memory;
pub mod redis;

use std::{ops::Deref, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::base::{
    config::Config,
    types::{Res, TimelineItem, Void},
};

// Traits.

/// Generic progress store trait that backends must implement.
///
/// Empty progress ids are ignored by every operation.
#[async_trait]
pub trait GenericProgressStore: Send + Sync + 'static {
    /// Human readable backend name (for logs).
    fn kind(&self) -> &'static str;

    /// Reset the list of a progress id.
    async fn init(&self, id: &str) -> Void;

    /// Append an item.
    async fn push(&self, id: &str, item: &TimelineItem) -> Void;

    /// All items, oldest first.
    async fn get(&self, id: &str) -> Res<Vec<TimelineItem>>;

    /// Drop the list.
    async fn clear(&self, id: &str) -> Void;
}

// Structs.

/// Progress store for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ProgressStore {
    inner: Arc<dyn GenericProgressStore>,
}

impl Deref for ProgressStore {
    type Target = dyn GenericProgressStore;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ProgressStore {
    pub fn new(inner: Arc<dyn GenericProgressStore>) -> Self {
        Self { inner }
    }

    /// Connect to Redis when configured, falling back to memory.
    #[instrument(name = "ProgressStore::connect", skip_all)]
    pub async fn connect(config: &Config) -> Self {
        const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

        let store = match config.redis_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => match tokio::time::timeout(CONNECT_TIMEOUT, Self::redis(url, config)).await {
                Ok(Ok(store)) => store,
                Ok(Err(err)) => {
                    warn!("Redis progress store unavailable, falling back to memory: {err}");
                    Self::memory()
                }
                Err(_) => {
                    warn!("Redis progress store timed out, falling back to memory");
                    Self::memory()
                }
            },
            None => Self::memory(),
        };

        info!("Using {} progress store", store.kind());

        store
    }
}
