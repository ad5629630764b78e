//! Store writes and one-off reads.

use regie_cache::{Cache, Invalidation};
use regie_model::{Fields, ListQuery, Record};
use regie_storage::StoreAdapter;
use regie_types::{RecordId, SharedClock, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{QueryError, QueryResult};
use crate::ErrorCallback;

/// Invoked after every successful action.
pub type ActionCallback = Arc<dyn Fn(&ActionOutcome) + Send + Sync>;

/// One write inside [`ActionExecutor::batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BatchOperation {
    Create { data: Fields },
    Update { id: RecordId, data: Fields },
    Delete { id: RecordId },
}

impl BatchOperation {
    /// Parses one operation from JSON. An unknown `type` is a configuration error.
    pub fn from_json(value: Value) -> QueryResult<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        serde_json::from_value(value).map_err(|e| {
            QueryError::Configuration(format!("invalid batch operation {kind:?}: {e}"))
        })
    }
}

/// What a completed action produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Created(RecordId),
    Updated(RecordId),
    Deleted(RecordId),
    Fetched(Option<Record>),
    Queried(Vec<Record>),
    Batch(Vec<ActionOutcome>),
}

/// Observable state of an [`ActionExecutor`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionState {
    pub loading: bool,
    /// Human-readable message of the last failure, cleared by the next success.
    pub error: Option<String>,
    pub last_result: Option<ActionOutcome>,
}

/// Runs create/update/delete/read operations against one collection.
///
/// Writes are never retried and carry no version check: callers issuing
/// concurrent writes to the same record order them themselves.
pub struct ActionExecutor {
    store: Arc<dyn StoreAdapter>,
    collection: String,
    cache: Option<Arc<Cache>>,
    clock: SharedClock,
    state: RwLock<ActionState>,
    on_success: Option<ActionCallback>,
    on_error: Option<ErrorCallback>,
}

impl ActionExecutor {
    pub fn new(store: Arc<dyn StoreAdapter>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            cache: None,
            clock: Arc::new(SystemClock),
            state: RwLock::new(ActionState::default()),
            on_success: None,
            on_error: None,
        }
    }

    /// Invalidates entries tagged with the collection name after every successful write.
    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Clock used for `createdAt`/`updatedAt` stamps.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn on_success(mut self, f: impl Fn(&ActionOutcome) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&QueryError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn state(&self) -> ActionState {
        self.state.read().await.clone()
    }

    // ── Operations ───────────────────────────────────────────────

    /// Creates a record, stamping `createdAt` and `updatedAt`.
    pub async fn create(&self, data: Fields) -> QueryResult<RecordId> {
        self.begin().await;
        let result = self.create_inner(data).await;
        self.finish(result, |id| ActionOutcome::Created(id.clone()), true)
            .await
    }

    /// Merges `data` into an existing record, stamping `updatedAt`.
    pub async fn update(&self, id: &RecordId, data: Fields) -> QueryResult<()> {
        self.begin().await;
        let result = self.update_inner(id, data).await;
        self.finish(result, |id| ActionOutcome::Updated(id.clone()), true)
            .await
            .map(drop)
    }

    pub async fn delete(&self, id: &RecordId) -> QueryResult<()> {
        self.begin().await;
        let result = self.delete_inner(id).await;
        self.finish(result, |id| ActionOutcome::Deleted(id.clone()), true)
            .await
            .map(drop)
    }

    /// Reads one record. `Ok(None)` if it does not exist.
    pub async fn get_by_id(&self, id: &RecordId) -> QueryResult<Option<Record>> {
        self.begin().await;
        let result = self
            .store
            .get_document(&self.collection, id)
            .await
            .map_err(QueryError::from);
        self.finish(result, |r| ActionOutcome::Fetched(r.clone()), false)
            .await
    }

    pub async fn query(&self, query: &ListQuery) -> QueryResult<Vec<Record>> {
        self.begin().await;
        let result = self
            .store
            .list_documents(&self.collection, query)
            .await
            .map_err(QueryError::from);
        self.finish(result, |r| ActionOutcome::Queried(r.clone()), false)
            .await
    }

    /// Runs the operations in order and stops at the first failure.
    /// Operations that already succeeded are not rolled back.
    pub async fn batch(&self, operations: Vec<BatchOperation>) -> QueryResult<Vec<ActionOutcome>> {
        self.begin().await;
        let mut outcomes = Vec::with_capacity(operations.len());
        let mut failure = None;
        for (index, op) in operations.into_iter().enumerate() {
            let result = match op {
                BatchOperation::Create { data } => {
                    self.create_inner(data).await.map(ActionOutcome::Created)
                }
                BatchOperation::Update { id, data } => {
                    self.update_inner(&id, data).await.map(ActionOutcome::Updated)
                }
                BatchOperation::Delete { id } => {
                    self.delete_inner(&id).await.map(ActionOutcome::Deleted)
                }
            };
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(collection = %self.collection, index, error = %e, "batch aborted");
                    failure = Some(e);
                    break;
                }
            }
        }
        if !outcomes.is_empty() {
            self.invalidate_cache().await;
        }
        let result = match failure {
            Some(e) => Err(e),
            None => Ok(outcomes),
        };
        self.finish(result, |o| ActionOutcome::Batch(o.clone()), false)
            .await
    }

    // ── Internals ────────────────────────────────────────────────

    async fn create_inner(&self, mut data: Fields) -> QueryResult<RecordId> {
        let now = self.clock.now();
        data.insert("createdAt".into(), Value::from(now.as_millis()));
        data.insert("updatedAt".into(), Value::from(now.as_millis()));
        let id = self.store.create_document(&self.collection, data).await?;
        info!(collection = %self.collection, id = %id, "record created");
        Ok(id)
    }

    async fn update_inner(&self, id: &RecordId, mut data: Fields) -> QueryResult<RecordId> {
        data.remove("createdAt");
        data.insert("updatedAt".into(), Value::from(self.clock.now().as_millis()));
        self.store.update_document(&self.collection, id, data).await?;
        info!(collection = %self.collection, id = %id, "record updated");
        Ok(id.clone())
    }

    async fn delete_inner(&self, id: &RecordId) -> QueryResult<RecordId> {
        self.store.delete_document(&self.collection, id).await?;
        info!(collection = %self.collection, id = %id, "record deleted");
        Ok(id.clone())
    }

    async fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache
                .invalidate(Invalidation::Tags(vec![self.collection.clone()]))
                .await;
        }
    }

    async fn begin(&self) {
        let mut state = self.state.write().await;
        state.loading = true;
    }

    async fn finish<T>(
        &self,
        result: QueryResult<T>,
        outcome: impl FnOnce(&T) -> ActionOutcome,
        write: bool,
    ) -> QueryResult<T> {
        match result {
            Ok(value) => {
                if write {
                    self.invalidate_cache().await;
                }
                let outcome = outcome(&value);
                {
                    let mut state = self.state.write().await;
                    state.loading = false;
                    state.error = None;
                    state.last_result = Some(outcome.clone());
                }
                if let Some(cb) = &self.on_success {
                    cb(&outcome);
                }
                Ok(value)
            }
            Err(e) => {
                debug!(collection = %self.collection, error = %e, "action failed");
                {
                    let mut state = self.state.write().await;
                    state.loading = false;
                    state.error = Some(e.to_string());
                }
                if let Some(cb) = &self.on_error {
                    cb(&e);
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("collection", &self.collection)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}
