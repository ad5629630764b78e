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
        .with_env_filter("regie_query=debug")
        .try_init();
}

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

pub fn record(id: &str, value: Value) -> Record {
    Record::new(id, fields(value))
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

pub fn ids(records: &[Record]) -> Vec<String> {
    records.iter().map(|r| r.id.to_string()).collect()
}

/// Memory store with `count` records `{id: "v{n}", name: "Venue {n}", rank: n}`.
pub async fn seeded_store(collection: &str, count: usize) -> MemoryStore {
    let store = MemoryStore::new();
    for n in 1..=count {
        store
            .insert(
                collection,
                record(
                    &format!("v{n:02}"),
                    serde_json::json!({ "name": format!("Venue {n}"), "rank": n }),
                ),
            )
            .await;
    }
    store
}

/// Wraps a store, failing the next `failures` reads with `Unavailable`
/// and counting every read that reaches it. Reads can be slowed down.
pub struct FaultyStore {
    inner: MemoryStore,
    failures: AtomicUsize,
    reads: AtomicUsize,
    read_delay_ms: AtomicU64,
    writes_fail: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            read_delay_ms: AtomicU64::new(0),
            writes_fail: AtomicBool::new(false),
        })
    }

    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.writes_fail.store(fail, Ordering::SeqCst);
    }

    pub fn delay_reads(&self, by: Duration) {
        self.read_delay_ms.store(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    async fn read(&self) -> StoreResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        Ok(())
    }

    fn write(&self) -> StoreResult<()> {
        if self.writes_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("permission denied".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreAdapter for FaultyStore {
    async fn get_document(&self, collection: &str, id: &RecordId) -> StoreResult<Option<Record>> {
        self.read().await?;
        self.inner.get_document(collection, id).await
    }

    async fn list_documents(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> StoreResult<Vec<Record>> {
        self.read().await?;
        self.inner.list_documents(collection, query).await
    }

    async fn count_documents(&self, collection: &str, query: &ListQuery) -> StoreResult<usize> {
        self.inner.count_documents(collection, query).await
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
