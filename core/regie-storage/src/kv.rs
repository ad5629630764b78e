//! Key/value tiers.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StoreResult;

/// A flat string key/value store used for persisted cache tiers and
/// wizard progress.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Returns the name of the backend, for logs.
    fn backend_name(&self) -> &'static str;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> StoreResult<()>;

    /// Removes a key. Returns whether it existed.
    async fn remove(&self, key: &str) -> StoreResult<bool>;

    /// Lists keys starting with `prefix`, sorted.
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Removes every key starting with `prefix`. Returns how many went.
    async fn clear_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let keys = self.keys_with_prefix(prefix).await?;
        let mut removed = 0;
        for key in keys {
            if self.remove(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// In-memory key/value store. Lives as long as the process, which is what
/// the session-scoped cache tier needs. Clones share data.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    entries: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn clear_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }
}
