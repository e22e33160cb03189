use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::base::types::{Res, TimelineItem, Void};

use super::{GenericProgressStore, ProgressStore};

// Extra methods on `ProgressStore` applied by the memory implementation.

impl ProgressStore {
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryProgressStore::default()))
    }
}

/// In-process progress store; lost on restart.
#[derive(Default)]
pub struct MemoryProgressStore {
    items: Mutex<HashMap<String, Vec<TimelineItem>>>,
}

#[async_trait]
impl GenericProgressStore for MemoryProgressStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn init(&self, id: &str) -> Void {
        if !id.is_empty() {
            self.items.lock().insert(id.to_string(), Vec::new());
        }
        Ok(())
    }

    async fn push(&self, id: &str, item: &TimelineItem) -> Void {
        if !id.is_empty() {
            self.items.lock().entry(id.to_string()).or_default().push(item.clone());
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Res<Vec<TimelineItem>> {
        Ok(self.items.lock().get(id).cloned().unwrap_or_default())
    }

    async fn clear(&self, id: &str) -> Void {
        self.items.lock().remove(id);
        Ok(())
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::types::Origin;

    fn item(step: &str) -> TimelineItem {
        TimelineItem {
            step: step.to_string(),
            ts: 1,
            origin: Origin::Backend,
            category: "state".to_string(),
            meta: serde_json::Value::Null,
            artifacts: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_push_get_clear() {
        let store = ProgressStore::memory();

        store.push("p1", &item("a")).await.unwrap();
        store.push("p1", &item("b")).await.unwrap();
        store.push("", &item("ignored")).await.unwrap();

        let items = store.get("p1").await.unwrap();
        assert_eq!(items.iter().map(|i| i.step.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(store.get("").await.unwrap().is_empty());

        store.init("p1").await.unwrap();
        assert!(store.get("p1").await.unwrap().is_empty());

        store.push("p1", &item("c")).await.unwrap();
        store.clear("p1").await.unwrap();
        assert!(store.get("p1").await.unwrap().is_empty());
        assert_eq!(store.kind(), "memory");
    }
}
