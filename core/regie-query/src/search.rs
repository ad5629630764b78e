//! Debounced text search over a collection.

use regie_cache::Cache;
use regie_model::{Filters, ListQuery, Record};
use regie_storage::StoreAdapter;
use regie_types::{SharedClock, SystemClock, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use crate::error::{QueryError, QueryResult};
use crate::task::TaskSlot;
use crate::ErrorCallback;

/// Configuration for a [`SearchController`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchConfig {
    /// Record fields (dotted paths allowed) the term is matched against.
    pub search_fields: Vec<String>,
    #[serde(with = "regie_types::duration_ms")]
    pub debounce_delay: Duration,
    pub min_search_length: usize,
    pub max_results: usize,
    pub case_sensitive: bool,
    pub enable_history: bool,
    pub max_history: usize,
    pub enable_cache: bool,
    pub max_retries: u32,
    #[serde(with = "regie_types::duration_ms")]
    pub retry_delay: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_fields: Vec::new(),
            debounce_delay: Duration::from_millis(300),
            min_search_length: 2,
            max_results: 50,
            case_sensitive: false,
            enable_history: true,
            max_history: 10,
            enable_cache: true,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

impl SearchConfig {
    pub fn with_fields<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            search_fields: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn from_json(value: Value) -> QueryResult<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| QueryError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> QueryResult<()> {
        if self.max_results == 0 {
            return Err(QueryError::Configuration("maxResults must be at least 1".into()));
        }
        if self.max_retries > 0 && self.retry_delay.is_zero() {
            return Err(QueryError::Configuration(
                "retryDelay must be positive when retries are enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Observable state of a [`SearchController`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchState {
    pub term: String,
    pub filters: Filters,
    pub results: Vec<Record>,
    pub loading: bool,
    pub error: Option<String>,
    /// Recent terms, most recent first, without duplicates.
    pub history: Vec<String>,
    pub last_search: Option<Timestamp>,
}

#[derive(Default)]
struct Inner {
    term: String,
    filters: Filters,
    results: Vec<Record>,
    loading: bool,
    error: Option<String>,
    history: VecDeque<String>,
    last_search: Option<Timestamp>,
}

struct Shared {
    inner: RwLock<Inner>,
    generation: AtomicU64,
    disposed: AtomicBool,
    debounce: TaskSlot,
    results_tx: watch::Sender<Vec<Record>>,
}

/// Text search with structured filters over one collection.
///
/// `set_search_term` waits for `debounceDelay` of inactivity before querying;
/// a term shorter than `minSearchLength` clears the results at once. With
/// filters active, an empty or too-short term still searches (filters only).
///
/// Cheap to clone; clones share state. Attach hooks before cloning.
#[derive(Clone)]
pub struct SearchController {
    store: Arc<dyn StoreAdapter>,
    collection: String,
    cache: Option<Arc<Cache>>,
    clock: SharedClock,
    config: SearchConfig,
    on_error: Option<ErrorCallback>,
    shared: Arc<Shared>,
}

impl SearchController {
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        collection: impl Into<String>,
        config: SearchConfig,
    ) -> QueryResult<Self> {
        config.validate()?;
        let (results_tx, _) = watch::channel(Vec::new());
        Ok(Self {
            store,
            collection: collection.into(),
            cache: None,
            clock: Arc::new(SystemClock),
            config,
            on_error: None,
            shared: Arc::new(Shared {
                inner: RwLock::new(Inner::default()),
                generation: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                debounce: TaskSlot::new(),
                results_tx,
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

    pub fn on_error(mut self, f: impl Fn(&QueryError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn state(&self) -> SearchState {
        let inner = self.shared.inner.read().await;
        SearchState {
            term: inner.term.clone(),
            filters: inner.filters.clone(),
            results: inner.results.clone(),
            loading: inner.loading,
            error: inner.error.clone(),
            history: inner.history.iter().cloned().collect(),
            last_search: inner.last_search,
        }
    }

    pub async fn results(&self) -> Vec<Record> {
        self.shared.inner.read().await.results.clone()
    }

    pub async fn term(&self) -> String {
        self.shared.inner.read().await.term.clone()
    }

    pub async fn filters(&self) -> Filters {
        self.shared.inner.read().await.filters.clone()
    }

    pub async fn history(&self) -> Vec<String> {
        self.shared.inner.read().await.history.iter().cloned().collect()
    }

    /// Receives every new result set.
    pub fn subscribe_results(&self) -> watch::Receiver<Vec<Record>> {
        self.shared.results_tx.subscribe()
    }

    /// Whether the current term and filters call for a search.
    pub async fn is_active(&self) -> bool {
        let inner = self.shared.inner.read().await;
        self.should_search(&inner.term, &inner.filters)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Updates the term and (re)starts the debounce timer. Terms too short
    /// to search clear the results immediately, unless filters are active.
    ///
    /// Fails with a configuration error when no `searchFields` are configured.
    pub async fn set_search_term(&self, term: impl Into<String>) -> QueryResult<()> {
        self.ensure_live()?;
        let term = term.into();
        if !term.trim().is_empty() && self.config.search_fields.is_empty() {
            return Err(QueryError::Configuration(format!(
                "no searchFields configured for {}",
                self.collection
            )));
        }
        let generation = self.supersede();
        let searchable = {
            let mut inner = self.shared.inner.write().await;
            inner.term = term;
            let searchable = self.should_search(&inner.term, &inner.filters);
            if !searchable {
                self.clear_results(&mut inner);
            }
            searchable
        };
        if searchable {
            self.schedule(generation);
        }
        Ok(())
    }

    /// Replaces the active filters and searches right away.
    pub async fn set_filters(&self, filters: Filters) -> QueryResult<Vec<Record>> {
        self.ensure_live()?;
        self.shared.inner.write().await.filters = filters;
        self.search_now().await
    }

    /// Runs the search for the current term and filters without waiting
    /// for the debounce timer.
    pub async fn search_now(&self) -> QueryResult<Vec<Record>> {
        self.ensure_live()?;
        let generation = self.supersede();
        self.run(generation).await
    }

    /// Clears term and results. Filters and history are kept.
    pub async fn clear(&self) {
        self.supersede();
        let mut inner = self.shared.inner.write().await;
        inner.term.clear();
        self.clear_results(&mut inner);
    }

    pub async fn clear_history(&self) {
        self.shared.inner.write().await.history.clear();
    }

    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.supersede();
        debug!(collection = %self.collection, "search disposed");
    }

    // ── Internals ────────────────────────────────────────────────

    fn ensure_live(&self) -> QueryResult<()> {
        if self.is_disposed() {
            Err(QueryError::Disposed)
        } else {
            Ok(())
        }
    }

    fn supersede(&self) -> u64 {
        self.shared.debounce.abort();
        self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.is_disposed() && self.shared.generation.load(Ordering::SeqCst) == generation
    }

    fn should_search(&self, term: &str, filters: &Filters) -> bool {
        self.effective_term(term, filters).is_some()
    }

    /// The term a search runs with. A term too short to search still lets
    /// active filters run on their own, as if it were empty.
    fn effective_term(&self, term: &str, filters: &Filters) -> Option<String> {
        let term = term.trim();
        if term.chars().count() >= self.config.min_search_length {
            Some(term.to_string())
        } else if !filters.is_empty() {
            Some(String::new())
        } else {
            None
        }
    }

    fn clear_results(&self, inner: &mut Inner) {
        inner.results.clear();
        inner.loading = false;
        inner.error = None;
        self.shared.results_tx.send_replace(Vec::new());
    }

    fn schedule(&self, generation: u64) {
        let this = self.clone();
        let delay = self.config.debounce_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.is_current(generation) {
                let _ = this.run(generation).await;
            }
        });
        self.shared.debounce.set(handle);
    }

    /// `None` when the filters cannot be encoded; such searches skip the cache.
    fn cache_key(&self, term: &str, filters: &Filters) -> Option<String> {
        let term = if self.config.case_sensitive {
            term.to_string()
        } else {
            term.to_lowercase()
        };
        match serde_json::to_string(filters) {
            Ok(filters) => Some(format!("search:{}:{}:{}", self.collection, term, filters)),
            Err(e) => {
                warn!(collection = %self.collection, error = %e, "cannot key search filters, skipping cache");
                None
            }
        }
    }

    async fn run(&self, generation: u64) -> QueryResult<Vec<Record>> {
        let (term, filters) = {
            let mut inner = self.shared.inner.write().await;
            let Some(term) = self.effective_term(&inner.term, &inner.filters) else {
                self.clear_results(&mut inner);
                return Ok(Vec::new());
            };
            inner.loading = true;
            (term, inner.filters.clone())
        };

        let key = self.cache_key(&term, &filters);
        let cached = match (&self.cache, self.config.enable_cache, &key) {
            (Some(cache), true, Some(key)) => cache.get_as::<Vec<Record>>(key).await,
            _ => None,
        };
        let result = match cached {
            Some(results) => {
                debug!(collection = %self.collection, term = %term, "search served from cache");
                Ok(results)
            }
            None => self.query_store(generation, &term, &filters, key.as_deref()).await,
        };

        if !self.is_current(generation) {
            return Err(QueryError::Cancelled);
        }
        match result {
            Ok(results) => {
                let mut inner = self.shared.inner.write().await;
                if !self.is_current(generation) {
                    return Err(QueryError::Cancelled);
                }
                inner.results = results.clone();
                inner.loading = false;
                inner.error = None;
                inner.last_search = Some(self.clock.now());
                if self.config.enable_history && !term.is_empty() {
                    push_history(&mut inner.history, &term, self.config.max_history);
                }
                self.shared.results_tx.send_replace(results.clone());
                Ok(results)
            }
            Err(e) => {
                {
                    let mut inner = self.shared.inner.write().await;
                    inner.loading = false;
                    inner.error = Some(e.to_string());
                }
                if let Some(cb) = &self.on_error {
                    cb(&e);
                }
                Err(e)
            }
        }
    }

    /// Lists the filtered collection, retrying transient failures, and
    /// matches the term client-side.
    async fn query_store(
        &self,
        generation: u64,
        term: &str,
        filters: &Filters,
        key: Option<&str>,
    ) -> QueryResult<Vec<Record>> {
        let query = ListQuery::from_filters(filters);
        let mut attempt = 0;
        let records = loop {
            match self.store.list_documents(&self.collection, &query).await {
                Ok(records) => break records,
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self
                        .config
                        .retry_delay
                        .saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    warn!(collection = %self.collection, attempt, error = %e, "search failed, retrying");
                    tokio::time::sleep(delay).await;
                    if !self.is_current(generation) {
                        return Err(QueryError::Cancelled);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        };

        let results: Vec<Record> = records
            .into_iter()
            .filter(|r| term.is_empty() || self.matches_term(r, term))
            .take(self.config.max_results)
            .collect();
        debug!(collection = %self.collection, term, results = results.len(), "search completed");

        if self.config.enable_cache
            && let Some(cache) = &self.cache
            && let Some(key) = key
        {
            let value = serde_json::to_value(&results)?;
            cache
                .set_with_tags(key, value, &[self.collection.clone()])
                .await;
        }
        Ok(results)
    }

    fn matches_term(&self, record: &Record, term: &str) -> bool {
        let needle = if self.config.case_sensitive {
            term.to_string()
        } else {
            term.to_lowercase()
        };
        self.config.search_fields.iter().any(|field| {
            record
                .get_path(field)
                .is_some_and(|value| value_contains(value, &needle, self.config.case_sensitive))
        })
    }
}

fn value_contains(value: &Value, needle: &str, case_sensitive: bool) -> bool {
    let hay = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => {
            return items
                .iter()
                .any(|item| value_contains(item, needle, case_sensitive));
        }
        Value::Null | Value::Object(_) => return false,
    };
    if case_sensitive {
        hay.contains(needle)
    } else {
        hay.to_lowercase().contains(needle)
    }
}

fn push_history(history: &mut VecDeque<String>, term: &str, max: usize) {
    history.retain(|t| t != term);
    history.push_front(term.to_string());
    history.truncate(max);
}

impl std::fmt::Debug for SearchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchController")
            .field("collection", &self.collection)
            .field("config", &self.config)
            .finish()
    }
}
