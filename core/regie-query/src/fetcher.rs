//! Data fetcher: one query, its cached result, retries and live updates.

use regie_cache::{Cache, Invalidation};
use regie_model::{QueryMode, QuerySignature, Record};
use regie_storage::{Snapshot, StoreAdapter, SubscriptionTarget};
use regie_types::{SharedClock, SystemClock, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{QueryError, QueryResult};
use crate::task::TaskSlot;
use crate::ErrorCallback;

/// Rewrites fetched data before it is stored in state or handed out.
pub type DataTransform = Arc<dyn Fn(FetchedData) -> FetchedData + Send + Sync>;

/// Invoked with every successfully delivered result.
pub type DataCallback = Arc<dyn Fn(&FetchedData) + Send + Sync>;

/// Configuration for a [`DataFetcher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FetcherConfig {
    pub enable_cache: bool,
    /// Age after which fetched data counts as stale.
    #[serde(rename = "cacheTTL", with = "regie_types::duration_ms")]
    pub cache_ttl: Duration,
    pub enable_stale_while_revalidate: bool,
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `retryDelay * 2^n`.
    #[serde(with = "regie_types::duration_ms")]
    pub retry_delay: Duration,
    pub enable_real_time: bool,
    /// Overrides the cache key derived from the query signature.
    pub cache_key: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache_ttl: Duration::from_secs(300),
            enable_stale_while_revalidate: false,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            enable_real_time: false,
            cache_key: None,
        }
    }
}

impl FetcherConfig {
    pub fn from_json(value: Value) -> QueryResult<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| QueryError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> QueryResult<()> {
        if self.enable_cache && self.cache_ttl.is_zero() {
            return Err(QueryError::Configuration("cacheTTL must be positive".into()));
        }
        if self.max_retries > 0 && self.retry_delay.is_zero() {
            return Err(QueryError::Configuration(
                "retryDelay must be positive when retries are enabled".into(),
            ));
        }
        if self.max_retries > 16 {
            return Err(QueryError::Configuration("maxRetries must be at most 16".into()));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// What a fetch produced: one document or a list of them.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedData {
    Single(Option<Record>),
    Collection(Vec<Record>),
}

impl FetchedData {
    pub fn record(&self) -> Option<&Record> {
        match self {
            FetchedData::Single(record) => record.as_ref(),
            FetchedData::Collection(_) => None,
        }
    }

    pub fn records(&self) -> &[Record] {
        match self {
            FetchedData::Single(Some(record)) => std::slice::from_ref(record),
            FetchedData::Single(None) => &[],
            FetchedData::Collection(records) => records,
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            FetchedData::Single(record) => record.into_iter().collect(),
            FetchedData::Collection(records) => records,
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Applies `f` to every record.
    pub fn map_records(self, f: impl Fn(Record) -> Record) -> Self {
        match self {
            FetchedData::Single(record) => FetchedData::Single(record.map(f)),
            FetchedData::Collection(records) => {
                FetchedData::Collection(records.into_iter().map(f).collect())
            }
        }
    }

    /// JSON form stored in the cache.
    pub fn to_value(&self) -> Value {
        match self {
            FetchedData::Single(None) => Value::Null,
            FetchedData::Single(Some(record)) => record.to_value(),
            FetchedData::Collection(records) => {
                Value::Array(records.iter().map(Record::to_value).collect())
            }
        }
    }

    /// Decodes a cached value for a query of the given mode.
    pub fn from_value(mode: QueryMode, value: Value) -> QueryResult<Self> {
        Ok(match mode {
            QueryMode::Single => FetchedData::Single(serde_json::from_value(value)?),
            QueryMode::Collection => FetchedData::Collection(serde_json::from_value(value)?),
        })
    }
}

impl From<Snapshot> for FetchedData {
    fn from(snapshot: Snapshot) -> Self {
        match snapshot {
            Snapshot::Document(record) => FetchedData::Single(record),
            Snapshot::Collection(records) => FetchedData::Collection(records),
        }
    }
}

/// Observable state of a [`DataFetcher`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchState {
    pub data: Option<FetchedData>,
    pub loading: bool,
    /// Human-readable message of the last failure.
    pub error: Option<String>,
    /// When the data in `data` was fetched from the store.
    pub last_fetch: Option<Timestamp>,
    pub retry_count: u32,
    pub is_stale: bool,
}

struct Shared {
    signature: RwLock<QuerySignature>,
    state: RwLock<FetchState>,
    generation: AtomicU64,
    disposed: AtomicBool,
    retry: TaskSlot,
    revalidation: TaskSlot,
    subscription: TaskSlot,
}

/// Fetches one query from the store and keeps its latest result.
///
/// Only the most recently started fetch may touch state: starting a new one
/// (or reconfiguring, or disposing) turns every older in-flight fetch into
/// a no-op that resolves to [`QueryError::Cancelled`].
///
/// Cheap to clone; clones share state. Attach hooks before cloning.
#[derive(Clone)]
pub struct DataFetcher {
    store: Arc<dyn StoreAdapter>,
    cache: Option<Arc<Cache>>,
    clock: SharedClock,
    config: FetcherConfig,
    transform: Option<DataTransform>,
    on_data: Option<DataCallback>,
    on_error: Option<ErrorCallback>,
    shared: Arc<Shared>,
}

impl DataFetcher {
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        signature: QuerySignature,
        config: FetcherConfig,
    ) -> QueryResult<Self> {
        config.validate()?;
        let signature = signature.with_explicit_key(config.cache_key.clone());
        Ok(Self {
            store,
            cache: None,
            clock: Arc::new(SystemClock),
            config,
            transform: None,
            on_data: None,
            on_error: None,
            shared: Arc::new(Shared {
                signature: RwLock::new(signature),
                state: RwLock::new(FetchState::default()),
                generation: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                retry: TaskSlot::new(),
                revalidation: TaskSlot::new(),
                subscription: TaskSlot::new(),
            }),
        })
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_transform(
        mut self,
        f: impl Fn(FetchedData) -> FetchedData + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Arc::new(f));
        self
    }

    pub fn on_data(mut self, f: impl Fn(&FetchedData) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&QueryError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    pub async fn signature(&self) -> QuerySignature {
        self.shared.signature.read().await.clone()
    }

    pub async fn cache_key(&self) -> String {
        self.shared.signature.read().await.key()
    }

    /// Snapshot of the current state with staleness evaluated now.
    pub async fn state(&self) -> FetchState {
        let mut state = self.shared.state.read().await.clone();
        state.is_stale = self.is_stale_at(state.last_fetch, self.clock.now());
        state
    }

    pub async fn data(&self) -> Option<FetchedData> {
        self.shared.state.read().await.data.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Fetches the configured query, serving it from the cache when possible.
    ///
    /// In real-time mode this (re)opens the live subscription instead and
    /// resolves with its first snapshot.
    pub async fn fetch(&self) -> QueryResult<FetchedData> {
        if self.config.enable_real_time {
            return self.start_subscription().await;
        }
        self.fetch_with(false).await
    }

    /// Fetches from the store, bypassing the cache, with a fresh retry budget.
    pub async fn refetch(&self) -> QueryResult<FetchedData> {
        self.ensure_live()?;
        self.shared.state.write().await.retry_count = 0;
        if self.config.enable_real_time {
            return self.start_subscription().await;
        }
        self.fetch_with(true).await
    }

    /// Points the fetcher at a different query. Cancels everything in flight,
    /// including the live subscription. Does not fetch.
    ///
    /// Data, error and fetch time of a different query are dropped; they
    /// never describe the new one.
    pub async fn reconfigure(&self, signature: QuerySignature) {
        self.cancel_pending();
        self.shared.subscription.abort();
        let signature = signature.with_explicit_key(self.config.cache_key.clone());
        let changed = {
            let mut current = self.shared.signature.write().await;
            let changed = *current != signature;
            *current = signature;
            changed
        };
        let mut state = self.shared.state.write().await;
        state.retry_count = 0;
        state.loading = false;
        if changed {
            state.data = None;
            state.error = None;
            state.last_fetch = None;
            state.is_stale = false;
        }
    }

    /// Drops the cached entry for the current query.
    pub async fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            let key = self.cache_key().await;
            cache.invalidate(Invalidation::Key(key)).await;
        }
    }

    /// Replaces one-shot fetching with a standing subscription. Every pushed
    /// snapshot overwrites `data` and the cache and clears `error`.
    pub async fn start_subscription(&self) -> QueryResult<FetchedData> {
        self.ensure_live()?;
        let generation = self.cancel_pending();
        self.shared.subscription.abort();
        let signature = self.signature().await;
        let target = match self.subscription_target(&signature) {
            Ok(target) => target,
            Err(e) => return Err(self.fail(generation, &signature, e, false).await),
        };
        self.set_loading(generation).await;

        let opened = match self.store.subscribe(target).await {
            Ok(mut subscription) => match subscription.next_snapshot().await {
                Ok(first) => Ok((subscription, first)),
                Err(e) => Err(QueryError::from(e)),
            },
            Err(e) => Err(QueryError::from(e)),
        };
        if !self.is_current(generation) {
            return Err(QueryError::Cancelled);
        }
        let (mut subscription, first) = match opened {
            Ok(opened) => opened,
            Err(e) => return Err(self.fail(generation, &signature, e, false).await),
        };
        let data = self.deliver(generation, &signature, first.into()).await?;
        debug!(key = %signature.key(), "live subscription opened");

        let this = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(next) = subscription.next().await {
                if this.is_disposed() {
                    return;
                }
                let current = this.shared.generation.load(Ordering::SeqCst);
                match next {
                    Ok(snapshot) => {
                        let _ = this.deliver(current, &signature, snapshot.into()).await;
                    }
                    Err(e) => {
                        let _ = this.fail(current, &signature, e.into(), false).await;
                    }
                }
            }
            debug!(key = %signature.key(), "live subscription closed by store");
        });
        self.shared.subscription.set(handle);
        Ok(data)
    }

    /// Tears down the live subscription, if any.
    pub fn stop_subscription(&self) -> bool {
        self.shared.subscription.abort()
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared.subscription.is_active()
    }

    /// Cancels everything in flight and makes every later call fail with
    /// [`QueryError::Disposed`].
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_pending();
        self.shared.subscription.abort();
        debug!("data fetcher disposed");
    }

    // ── Internals ────────────────────────────────────────────────

    fn ensure_live(&self) -> QueryResult<()> {
        if self.is_disposed() {
            Err(QueryError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Supersedes every in-flight fetch, pending retry and revalidation.
    /// Returns the new generation.
    fn cancel_pending(&self) -> u64 {
        self.shared.retry.abort();
        self.shared.revalidation.abort();
        self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.is_disposed() && self.shared.generation.load(Ordering::SeqCst) == generation
    }

    fn is_stale_at(&self, last_fetch: Option<Timestamp>, now: Timestamp) -> bool {
        self.config.enable_cache
            && last_fetch.is_some_and(|t| now.elapsed_since(t) >= self.config.cache_ttl)
    }

    fn subscription_target(&self, signature: &QuerySignature) -> QueryResult<SubscriptionTarget> {
        match signature.mode {
            QueryMode::Single => match &signature.id {
                Some(id) => Ok(SubscriptionTarget::Document {
                    collection: signature.collection.clone(),
                    id: id.clone(),
                }),
                None => Err(QueryError::MissingIdentifier {
                    collection: signature.collection.clone(),
                }),
            },
            QueryMode::Collection => Ok(SubscriptionTarget::Collection {
                collection: signature.collection.clone(),
                query: signature.to_list_query(),
            }),
        }
    }

    async fn fetch_with(&self, force: bool) -> QueryResult<FetchedData> {
        self.ensure_live()?;
        let generation = self.cancel_pending();
        let signature = self.signature().await;
        if !force && let Some(data) = self.read_cache(generation, &signature).await {
            return Ok(data);
        }
        self.attempt(generation, signature).await
    }

    /// Serves the query from the cache. A fresh entry ends the fetch; with
    /// stale-while-revalidate an old entry is served and a background
    /// refresh is started.
    async fn read_cache(&self, generation: u64, signature: &QuerySignature) -> Option<FetchedData> {
        if !self.config.enable_cache {
            return None;
        }
        let cache = self.cache.as_ref()?;
        let key = signature.key();
        let swr = self.config.enable_stale_while_revalidate;

        let peeked = if swr { cache.peek(&key).await } else { None };
        let entry = cache.get_entry(&key).await.or(peeked)?;
        let now = self.clock.now();
        let fresh = entry.age(now) < self.config.cache_ttl;
        if !fresh && !swr {
            return None;
        }

        let raw = match FetchedData::from_value(signature.mode, entry.data) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "ignoring undecodable cached result");
                return None;
            }
        };
        let data = self.transformed(raw);
        {
            let mut state = self.shared.state.write().await;
            if !self.is_current(generation) {
                return None;
            }
            state.data = Some(data.clone());
            state.loading = false;
            state.error = None;
            state.last_fetch = Some(entry.timestamp);
        }
        if let Some(cb) = &self.on_data {
            cb(&data);
        }
        if fresh {
            debug!(key = %key, "served from cache");
        } else {
            debug!(key = %key, "served stale, revalidating");
            self.spawn_revalidation(generation, signature.clone());
        }
        Some(data)
    }

    fn spawn_revalidation(&self, generation: u64, signature: QuerySignature) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let _ = this.attempt(generation, signature).await;
        });
        self.shared.revalidation.set(handle);
    }

    /// One store round-trip. Schedules a retry on failure.
    async fn attempt(&self, generation: u64, signature: QuerySignature) -> QueryResult<FetchedData> {
        if signature.mode == QueryMode::Single && signature.id.is_none() {
            let e = QueryError::MissingIdentifier {
                collection: signature.collection.clone(),
            };
            return Err(self.fail(generation, &signature, e, false).await);
        }
        self.set_loading(generation).await;

        let result = match (&signature.mode, &signature.id) {
            (QueryMode::Single, Some(id)) => self
                .store
                .get_document(&signature.collection, id)
                .await
                .map(FetchedData::Single),
            _ => self
                .store
                .list_documents(&signature.collection, &signature.to_list_query())
                .await
                .map(FetchedData::Collection),
        };
        if !self.is_current(generation) {
            debug!(key = %signature.key(), "discarding superseded fetch result");
            return Err(QueryError::Cancelled);
        }
        match result {
            Ok(raw) => self.deliver(generation, &signature, raw).await,
            Err(e) => Err(self.fail(generation, &signature, e.into(), true).await),
        }
    }

    async fn set_loading(&self, generation: u64) {
        let mut state = self.shared.state.write().await;
        if self.is_current(generation) {
            state.loading = true;
        }
    }

    fn transformed(&self, raw: FetchedData) -> FetchedData {
        match &self.transform {
            Some(transform) => transform(raw),
            None => raw,
        }
    }

    /// Caches a store result and publishes it to state and `on_data`.
    async fn deliver(
        &self,
        generation: u64,
        signature: &QuerySignature,
        raw: FetchedData,
    ) -> QueryResult<FetchedData> {
        if self.config.enable_cache
            && let Some(cache) = &self.cache
        {
            cache
                .set_with_tags(&signature.key(), raw.to_value(), &[signature.collection.clone()])
                .await;
        }
        let data = self.transformed(raw);
        {
            let mut state = self.shared.state.write().await;
            if !self.is_current(generation) {
                return Err(QueryError::Cancelled);
            }
            state.data = Some(data.clone());
            state.loading = false;
            state.error = None;
            state.last_fetch = Some(self.clock.now());
            state.retry_count = 0;
        }
        debug!(key = %signature.key(), records = data.len(), "fetch delivered");
        if let Some(cb) = &self.on_data {
            cb(&data);
        }
        Ok(data)
    }

    /// Records a failure and, when allowed, schedules the next retry.
    /// Returns the error for the caller to propagate.
    async fn fail(
        &self,
        generation: u64,
        signature: &QuerySignature,
        error: QueryError,
        retry: bool,
    ) -> QueryError {
        let next_retry = {
            let mut state = self.shared.state.write().await;
            if !self.is_current(generation) {
                return QueryError::Cancelled;
            }
            state.loading = false;
            state.error = Some(error.to_string());
            if retry && error.is_retryable() && state.retry_count < self.config.max_retries {
                let delay = self.config.backoff(state.retry_count);
                state.retry_count += 1;
                Some((state.retry_count, delay))
            } else {
                None
            }
        };
        if let Some(cb) = &self.on_error {
            cb(&error);
        }
        match next_retry {
            Some((attempt, delay)) => {
                warn!(
                    key = %signature.key(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "fetch failed, retrying"
                );
                self.schedule_retry(generation, signature.clone(), delay);
            }
            None => debug!(key = %signature.key(), error = %error, "fetch failed"),
        }
        error
    }

    fn schedule_retry(&self, generation: u64, signature: QuerySignature, delay: Duration) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.is_current(generation) {
                let _ = this.attempt(generation, signature).await;
            }
        });
        self.shared.retry.set(handle);
    }
}

impl std::fmt::Debug for DataFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFetcher")
            .field("config", &self.config)
            .field("cached", &self.cache.is_some())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
