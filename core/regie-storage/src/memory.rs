//! In-process document store.

use async_trait::async_trait;
use regie_model::{apply_list_query, Fields, ListQuery, Record};
use regie_types::RecordId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::adapter::{Snapshot, StoreAdapter, Subscription, SubscriptionTarget};
use crate::error::{StoreError, StoreResult};

const CHANGE_BUFFER: usize = 256;
const SUBSCRIPTION_BUFFER: usize = 16;

/// A document store held entirely in memory.
///
/// Collections keep insertion order. Cheap to clone; clones share data.
#[derive(Clone)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, Vec<Record>>>>,
    changes: broadcast::Sender<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    /// Inserts a record as-is, keeping its id. Replaces any record with the same id.
    pub async fn insert(&self, collection: &str, record: Record) {
        {
            let mut collections = self.collections.write().await;
            let docs = collections.entry(collection.to_string()).or_default();
            match docs.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => docs.push(record),
            }
        }
        self.notify(collection);
    }

    /// Number of documents in a collection.
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Snapshot of every document in a collection, in insertion order.
    pub async fn all(&self, collection: &str) -> Vec<Record> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn notify(&self, collection: &str) {
        // No receivers is fine: nobody is subscribed.
        let _ = self.changes.send(collection.to_string());
    }

    async fn snapshot(&self, target: &SubscriptionTarget) -> StoreResult<Snapshot> {
        match target {
            SubscriptionTarget::Document { collection, id } => {
                Ok(Snapshot::Document(self.get_document(collection, id).await?))
            }
            SubscriptionTarget::Collection { collection, query } => Ok(Snapshot::Collection(
                self.list_documents(collection, query).await?,
            )),
        }
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn get_document(&self, collection: &str, id: &RecordId) -> StoreResult<Option<Record>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|r| &r.id == id))
            .cloned())
    }

    async fn list_documents(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> StoreResult<Vec<Record>> {
        let collections = self.collections.read().await;
        let docs = collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);
        Ok(apply_list_query(docs, query))
    }

    async fn create_document(&self, collection: &str, data: Fields) -> StoreResult<RecordId> {
        let id = RecordId::generate();
        let record = Record::from_stored(id.clone(), data);
        self.insert(collection, record).await;
        debug!(collection, id = %id, "document created");
        Ok(id)
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &RecordId,
        data: Fields,
    ) -> StoreResult<()> {
        {
            let mut collections = self.collections.write().await;
            let record = collections
                .get_mut(collection)
                .and_then(|docs| docs.iter_mut().find(|r| &r.id == id))
                .ok_or_else(|| StoreError::not_found(collection, id))?;
            let patch = Record::from_stored(id.clone(), data);
            if patch.created_at.is_some() {
                record.created_at = patch.created_at;
            }
            if patch.updated_at.is_some() {
                record.updated_at = patch.updated_at;
            }
            record.fields.extend(patch.fields);
        }
        self.notify(collection);
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &RecordId) -> StoreResult<()> {
        {
            let mut collections = self.collections.write().await;
            let docs = collections
                .get_mut(collection)
                .ok_or_else(|| StoreError::not_found(collection, id))?;
            let before = docs.len();
            docs.retain(|r| &r.id != id);
            if docs.len() == before {
                return Err(StoreError::not_found(collection, id));
            }
        }
        self.notify(collection);
        Ok(())
    }

    async fn subscribe(&self, target: SubscriptionTarget) -> StoreResult<Subscription> {
        let (tx, subscription) = Subscription::channel(SUBSCRIPTION_BUFFER);
        let mut changes = self.changes.subscribe();
        let initial = self.snapshot(&target).await?;
        let store = self.clone();

        tokio::spawn(async move {
            if tx.send(Ok(initial)).await.is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(changed) if changed != target.collection() => continue,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let snapshot = store.snapshot(&target).await;
                        if tx.send(snapshot).await.is_err() {
                            debug!(collection = target.collection(), "subscriber dropped");
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(subscription)
    }
}
