#![allow(dead_code)]

use async_trait::async_trait;
use regie_model::{Fields, ListQuery, Record};
use regie_storage::{
    MemoryStore, StoreAdapter, StoreError, StoreResult, Subscription, SubscriptionTarget,
};
use regie_types::RecordId;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("regie_forms=debug")
        .try_init();
}

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// Polls `check` until it holds, failing after two seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Wraps a memory store, counting writes. Writes can be made to fail and
/// reads slowed down.
pub struct TrackedStore {
    inner: MemoryStore,
    writes: AtomicUsize,
    writes_fail: AtomicBool,
    read_delay_ms: AtomicU64,
}

impl TrackedStore {
    pub fn new(inner: MemoryStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            writes: AtomicUsize::new(0),
            writes_fail: AtomicBool::new(false),
            read_delay_ms: AtomicU64::new(0),
        })
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.writes_fail.store(fail, Ordering::SeqCst);
    }

    pub fn delay_reads(&self, by: Duration) {
        self.read_delay_ms.store(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn write(&self) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.writes_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("permission denied".into()));
        }
        Ok(())
    }

    async fn read(&self) {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait]
impl StoreAdapter for TrackedStore {
    async fn get_document(&self, collection: &str, id: &RecordId) -> StoreResult<Option<Record>> {
        self.read().await;
        self.inner.get_document(collection, id).await
    }

    async fn list_documents(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> StoreResult<Vec<Record>> {
        self.read().await;
        self.inner.list_documents(collection, query).await
    }

    async fn create_document(&self, collection: &str, data: Fields) -> StoreResult<RecordId> {
        self.write()?;
        self.inner.create_document(collection, data).await
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &RecordId,
        data: Fields,
    ) -> StoreResult<()> {
        self.write()?;
        self.inner.update_document(collection, id, data).await
    }

    async fn delete_document(&self, collection: &str, id: &RecordId) -> StoreResult<()> {
        self.write()?;
        self.inner.delete_document(collection, id).await
    }

    async fn subscribe(&self, target: SubscriptionTarget) -> StoreResult<Subscription> {
        self.inner.subscribe(target).await
    }
}
