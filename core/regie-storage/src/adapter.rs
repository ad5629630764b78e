//! Document store interface.

use async_trait::async_trait;
use regie_model::{Fields, ListQuery, Record};
use regie_types::RecordId;
use tokio::sync::mpsc;

use crate::error::{StoreError, StoreResult};

/// What a live subscription watches.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionTarget {
    /// One document.
    Document { collection: String, id: RecordId },
    /// The result set of a collection query.
    Collection { collection: String, query: ListQuery },
}

impl SubscriptionTarget {
    pub fn collection(&self) -> &str {
        match self {
            SubscriptionTarget::Document { collection, .. } => collection,
            SubscriptionTarget::Collection { collection, .. } => collection,
        }
    }
}

/// A value pushed by a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Document(Option<Record>),
    Collection(Vec<Record>),
}

/// A standing subscription. Dropping it tears the feed down.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<StoreResult<Snapshot>>,
}

impl Subscription {
    /// Creates a subscription and the sender the store pushes into.
    pub fn channel(buffer: usize) -> (mpsc::Sender<StoreResult<Snapshot>>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }

    /// Waits for the next pushed snapshot. `None` once the store hangs up.
    pub async fn next(&mut self) -> Option<StoreResult<Snapshot>> {
        self.rx.recv().await
    }

    /// Like [`Subscription::next`] but maps a hang-up to an error.
    pub async fn next_snapshot(&mut self) -> StoreResult<Snapshot> {
        self.rx.recv().await.unwrap_or(Err(StoreError::SubscriptionClosed))
    }
}

/// Abstract document store.
///
/// Records live in named collections and are addressed by store-assigned
/// ids. Timestamps inside `fields` are opaque to the store.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Reads one document. `Ok(None)` if it does not exist.
    async fn get_document(&self, collection: &str, id: &RecordId) -> StoreResult<Option<Record>>;

    /// Runs a filtered/ordered/limited collection query.
    async fn list_documents(&self, collection: &str, query: &ListQuery)
    -> StoreResult<Vec<Record>>;

    /// Counts documents matching the query's predicates, ignoring paging.
    async fn count_documents(&self, collection: &str, query: &ListQuery) -> StoreResult<usize> {
        let unpaged = ListQuery {
            predicates: query.predicates.clone(),
            ..ListQuery::default()
        };
        Ok(self.list_documents(collection, &unpaged).await?.len())
    }

    /// Creates a document and returns its new id.
    async fn create_document(&self, collection: &str, data: Fields) -> StoreResult<RecordId>;

    /// Merges `data` into an existing document.
    async fn update_document(&self, collection: &str, id: &RecordId, data: Fields)
    -> StoreResult<()>;

    /// Deletes a document.
    async fn delete_document(&self, collection: &str, id: &RecordId) -> StoreResult<()>;

    /// Opens a live subscription. The current value is pushed first.
    async fn subscribe(&self, target: SubscriptionTarget) -> StoreResult<Subscription>;
}
