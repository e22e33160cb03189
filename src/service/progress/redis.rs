//! Redis-backed progress store.
//!
//! Each progress id maps to a list `<prefix><id>` of JSON-encoded timeline
//! items; every push refreshes the key's TTL.

use std::sync::Arc;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::{instrument, warn};

use crate::base::{
    config::Config,
    types::{Res, TimelineItem, Void},
};

use super::{GenericProgressStore, ProgressStore};

// Extra methods on `ProgressStore` applied by the redis implementation.

impl ProgressStore {
    pub async fn redis(url: &str, config: &Config) -> Res<Self> {
        let store = RedisProgressStore::connect(url, &config.progress_key_prefix, config.progress_ttl_secs).await?;
        Ok(Self::new(Arc::new(store)))
    }
}

/// Redis progress store implementation.
#[derive(Clone)]
pub struct RedisProgressStore {
    conn: ConnectionManager,
    prefix: String,
    ttl_secs: i64,
}

impl RedisProgressStore {
    #[instrument(name = "RedisProgressStore::connect", skip_all)]
    pub async fn connect(url: &str, prefix: &str, ttl_secs: u64) -> Res<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        })
    }

    fn key(&self, id: &str) -> String {
        format!("{}{id}", self.prefix)
    }
}

#[async_trait]
impl GenericProgressStore for RedisProgressStore {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn init(&self, id: &str) -> Void {
        if id.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(id)).await?;

        Ok(())
    }

    async fn push(&self, id: &str, item: &TimelineItem) -> Void {
        if id.is_empty() {
            return Ok(());
        }

        let key = self.key(id);
        let mut conn = self.conn.clone();

        conn.rpush::<_, _, ()>(&key, serde_json::to_string(item)?).await?;
        conn.expire::<_, ()>(&key, self.ttl_secs).await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Res<Vec<TimelineItem>> {
        if id.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(self.key(id), 0, -1).await?;

        Ok(raw
            .iter()
            .filter_map(|entry| match serde_json::from_str(entry) {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!("Skipping malformed progress entry: {err}");
                    None
                }
            })
            .collect())
    }

    async fn clear(&self, id: &str) -> Void {
        self.init(id).await
    }
}
