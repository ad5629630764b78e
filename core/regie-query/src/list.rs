//! Paginated entity listings with sorting, selection and bulk actions.

use futures::future::join_all;
use regie_cache::Cache;
use regie_model::{Fields, Filters, ListQuery, OrderBy, QuerySignature, Record, SortDirection};
use regie_storage::StoreAdapter;
use regie_types::{RecordId, SharedClock, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::action::ActionExecutor;
use crate::error::{QueryError, QueryResult};
use crate::fetcher::{DataFetcher, FetchState, FetchedData, FetcherConfig};
use crate::filtered_search::{FilterDefinition, FilteredSearch, FilteredSearchConfig};
use crate::search::SearchConfig;
use crate::task::TaskSlot;

/// Rewrites every raw record before it is listed. Must be pure and idempotent.
pub type ItemTransform = Arc<dyn Fn(Record) -> Record + Send + Sync>;

/// How the list moves through the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationType {
    /// Discrete pages, one at a time.
    #[default]
    Pages,
    /// Pages accumulate as more are loaded.
    Infinite,
    /// Pages addressed by the id of the last record seen.
    Cursor,
}

/// Configuration for an [`EntityList`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListConfig {
    pub page_size: usize,
    pub pagination_type: PaginationType,
    pub default_sort: Option<OrderBy>,
    /// Filters always applied to the listing.
    pub default_filters: Filters,
    pub enable_selection: bool,
    pub enable_bulk_actions: bool,
    pub max_selection_size: Option<usize>,
    pub enable_search: bool,
    pub enable_filters: bool,
    pub search_fields: Vec<String>,
    /// Filters the caller may set when `enableFilters` is on.
    pub filters: Vec<FilterDefinition>,
    pub enable_cache: bool,
    pub enable_real_time: bool,
    pub auto_refresh: bool,
    #[serde(with = "regie_types::duration_ms")]
    pub refresh_interval: Duration,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            pagination_type: PaginationType::Pages,
            default_sort: None,
            default_filters: Filters::new(),
            enable_selection: false,
            enable_bulk_actions: false,
            max_selection_size: None,
            enable_search: false,
            enable_filters: false,
            search_fields: Vec::new(),
            filters: Vec::new(),
            enable_cache: true,
            enable_real_time: false,
            auto_refresh: false,
            refresh_interval: Duration::from_secs(30),
        }
    }
}

impl ListConfig {
    pub fn from_json(value: Value) -> QueryResult<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| QueryError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> QueryResult<()> {
        if self.page_size == 0 {
            return Err(QueryError::Configuration("pageSize must be at least 1".into()));
        }
        if self.max_selection_size == Some(0) {
            return Err(QueryError::Configuration(
                "maxSelectionSize must be at least 1".into(),
            ));
        }
        if self.enable_search && self.search_fields.is_empty() {
            return Err(QueryError::Configuration(
                "enableSearch requires searchFields".into(),
            ));
        }
        if self.auto_refresh && self.refresh_interval.is_zero() {
            return Err(QueryError::Configuration(
                "refreshInterval must be positive".into(),
            ));
        }
        Ok(())
    }

    fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            enable_cache: self.enable_cache,
            enable_real_time: self.enable_real_time,
            ..FetcherConfig::default()
        }
    }
}

/// Where the list is in the collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
    pub total_items: Option<usize>,
    pub total_pages: Option<usize>,
    pub has_more: bool,
    /// Last record id of the current page (cursor mode).
    pub cursor: Option<RecordId>,
}

/// Observable state of an [`EntityList`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListState {
    pub items: Vec<Record>,
    pub loading: bool,
    pub error: Option<String>,
    pub pagination: Pagination,
    pub sort: Option<OrderBy>,
    pub selected: Vec<RecordId>,
    pub search_term: String,
    pub active_filters: Filters,
}

/// Per-record result of a bulk action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOutcome {
    pub succeeded: Vec<RecordId>,
    pub failed: Vec<(RecordId, String)>,
}

impl BulkOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn from_results(ids: Vec<RecordId>, results: Vec<QueryResult<()>>) -> Self {
        let mut outcome = Self::default();
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(()) => outcome.succeeded.push(id),
                Err(e) => outcome.failed.push((id, e.to_string())),
            }
        }
        outcome
    }
}

#[derive(Debug, Default)]
struct Inner {
    page: usize,
    sort: Option<OrderBy>,
    /// Records of earlier pages (infinite mode).
    accumulated: Vec<Record>,
    /// Cursors that opened each page so far (cursor mode).
    cursors: Vec<Option<RecordId>>,
    total_items: Option<usize>,
    selected: Vec<RecordId>,
    loading: bool,
}

struct Shared {
    inner: RwLock<Inner>,
    disposed: AtomicBool,
    refresh: TaskSlot,
}

/// A listing of one collection.
///
/// The current page is owned by a [`DataFetcher`]; earlier pages in
/// infinite mode are kept here. When search or filters are enabled and
/// active, the visible items are the search results instead. Selection is
/// pruned to the visible items at every observation.
///
/// Cheap to clone; clones share state. Attach hooks before cloning.
#[derive(Clone)]
pub struct EntityList {
    store: Arc<dyn StoreAdapter>,
    collection: String,
    config: ListConfig,
    clock: SharedClock,
    cache: Option<Arc<Cache>>,
    fetcher: DataFetcher,
    search: Option<FilteredSearch>,
    actions: Arc<ActionExecutor>,
    transform_item: Option<ItemTransform>,
    shared: Arc<Shared>,
}

impl EntityList {
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        collection: impl Into<String>,
        config: ListConfig,
    ) -> QueryResult<Self> {
        config.validate()?;
        let collection = collection.into();
        let sort = config.default_sort.clone();
        let fetcher = DataFetcher::new(
            store.clone(),
            page_signature(&collection, &config, sort.clone(), 1, None),
            config.fetcher_config(),
        )?;
        let search = if config.enable_search || config.enable_filters {
            let search_config = FilteredSearchConfig {
                search: SearchConfig {
                    search_fields: config.search_fields.clone(),
                    enable_cache: config.enable_cache,
                    ..SearchConfig::default()
                },
                filters: config.filters.clone(),
                ..FilteredSearchConfig::default()
            };
            Some(FilteredSearch::new(store.clone(), collection.clone(), search_config)?)
        } else {
            None
        };
        let actions = Arc::new(ActionExecutor::new(store.clone(), collection.clone()));
        Ok(Self {
            store,
            collection,
            config,
            clock: Arc::new(SystemClock),
            cache: None,
            fetcher,
            search,
            actions,
            transform_item: None,
            shared: Arc::new(Shared {
                inner: RwLock::new(Inner {
                    page: 1,
                    sort,
                    cursors: vec![None],
                    ..Inner::default()
                }),
                disposed: AtomicBool::new(false),
                refresh: TaskSlot::new(),
            }),
        })
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.fetcher = self.fetcher.with_cache(cache.clone());
        self.search = self.search.map(|s| s.with_cache(cache.clone()));
        self.cache = Some(cache);
        self.rebuild_actions();
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.fetcher = self.fetcher.with_clock(clock.clone());
        self.search = self.search.map(|s| s.with_clock(clock.clone()));
        self.clock = clock;
        self.rebuild_actions();
        self
    }

    /// Applies `f` to every raw record before it is listed or searched.
    pub fn with_transform_item(mut self, f: impl Fn(Record) -> Record + Send + Sync + 'static) -> Self {
        let f: ItemTransform = Arc::new(f);
        let per_record = f.clone();
        self.fetcher = self
            .fetcher
            .with_transform(move |data: FetchedData| data.map_records(&*per_record));
        self.transform_item = Some(f);
        self
    }

    fn rebuild_actions(&mut self) {
        let mut actions = ActionExecutor::new(self.store.clone(), self.collection.clone())
            .with_clock(self.clock.clone());
        if let Some(cache) = &self.cache {
            actions = actions.with_cache(cache.clone());
        }
        self.actions = Arc::new(actions);
    }

    pub fn config(&self) -> &ListConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &DataFetcher {
        &self.fetcher
    }

    pub fn search(&self) -> Option<&FilteredSearch> {
        self.search.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    // ── Reading ──────────────────────────────────────────────────

    /// Items currently visible.
    pub async fn items(&self) -> Vec<Record> {
        if let Some(search) = &self.search
            && search.search().is_active().await
        {
            return search
                .results()
                .await
                .into_iter()
                .filter(|r| self.config.default_filters.matches(r))
                .map(|r| match &self.transform_item {
                    Some(f) => f(r),
                    None => r,
                })
                .collect();
        }
        let mut items = self.shared.inner.read().await.accumulated.clone();
        if let Some(data) = self.fetcher.data().await {
            items.extend(data.into_records());
        }
        items
    }

    pub async fn state(&self) -> ListState {
        let items = self.items().await;
        self.prune_selection(&items).await;
        let fetch = self.fetcher.state().await;
        let (search_term, active_filters, search_loading, search_error) = match &self.search {
            Some(search) => {
                let s = search.search().state().await;
                (s.term, search.active_filters().await, s.loading, s.error)
            }
            None => (String::new(), Filters::new(), false, None),
        };
        let has_more = self.has_more_in(&fetch);
        let inner = self.shared.inner.read().await;
        ListState {
            pagination: self.pagination_of(&inner, has_more),
            loading: inner.loading || fetch.loading || search_loading,
            error: fetch.error.or(search_error),
            sort: inner.sort.clone(),
            selected: inner.selected.clone(),
            items,
            search_term,
            active_filters,
        }
    }

    pub async fn pagination(&self) -> Pagination {
        let has_more = self.has_more().await;
        let inner = self.shared.inner.read().await;
        self.pagination_of(&inner, has_more)
    }

    fn pagination_of(&self, inner: &Inner, has_more: bool) -> Pagination {
        let page_size = self.config.page_size;
        Pagination {
            page: inner.page,
            page_size,
            total_items: inner.total_items,
            total_pages: inner.total_items.map(|n| n.div_ceil(page_size).max(1)),
            has_more,
            cursor: inner.cursors.last().cloned().flatten(),
        }
    }

    /// Whether another page may follow: the current page came back full,
    /// or (infinite mode) it failed to load and `load_more` retries it.
    pub async fn has_more(&self) -> bool {
        self.has_more_in(&self.fetcher.state().await)
    }

    fn has_more_in(&self, fetch: &FetchState) -> bool {
        match &fetch.data {
            Some(data) => data.len() == self.config.page_size,
            None => {
                self.config.pagination_type == PaginationType::Infinite && fetch.error.is_some()
            }
        }
    }

    // ── Loading ──────────────────────────────────────────────────

    /// Loads the first page. Starts auto-refresh when configured.
    pub async fn fetch(&self) -> QueryResult<Vec<Record>> {
        self.ensure_live()?;
        {
            let mut inner = self.shared.inner.write().await;
            inner.page = 1;
            inner.accumulated.clear();
            inner.cursors = vec![None];
        }
        self.count_total().await;
        let items = self.load_current(false).await?;
        if self.config.auto_refresh && !self.shared.refresh.is_active() {
            self.start_auto_refresh();
        }
        Ok(items)
    }

    /// Reloads what is currently shown, bypassing the cache.
    ///
    /// In infinite mode every loaded page is reloaded from the first one.
    pub async fn refresh(&self) -> QueryResult<Vec<Record>> {
        self.ensure_live()?;
        self.count_total().await;
        if self.config.pagination_type == PaginationType::Infinite {
            let last_page = {
                let mut inner = self.shared.inner.write().await;
                let last = inner.page;
                inner.page = 1;
                inner.accumulated.clear();
                last
            };
            self.load_current(true).await?;
            loop {
                let page = self.shared.inner.read().await.page;
                if page >= last_page || !self.has_more().await {
                    break;
                }
                self.advance_infinite(true).await?;
            }
            return Ok(self.items().await);
        }
        self.load_current(true).await
    }

    /// Jumps to a 1-based page (pages mode).
    pub async fn go_to_page(&self, page: usize) -> QueryResult<Vec<Record>> {
        self.ensure_live()?;
        if self.config.pagination_type != PaginationType::Pages {
            return Err(QueryError::Configuration(
                "go_to_page requires pages pagination".into(),
            ));
        }
        let total_pages = self.pagination().await.total_pages;
        if page == 0 || total_pages.is_some_and(|total| page > total) {
            return Err(QueryError::Configuration(format!("page {page} is out of range")));
        }
        self.shared.inner.write().await.page = page;
        self.load_current(false).await
    }

    /// Next page (pages and cursor modes). A no-op on the last page.
    pub async fn next_page(&self) -> QueryResult<Vec<Record>> {
        self.ensure_live()?;
        match self.config.pagination_type {
            PaginationType::Pages => {
                if !self.has_more().await {
                    return Ok(self.items().await);
                }
                let page = self.shared.inner.read().await.page;
                self.go_to_page(page + 1).await
            }
            PaginationType::Cursor => {
                if !self.has_more().await {
                    return Ok(self.items().await);
                }
                let last = self
                    .fetcher
                    .data()
                    .await
                    .and_then(|d| d.records().last().map(|r| r.id.clone()));
                {
                    let mut inner = self.shared.inner.write().await;
                    inner.cursors.push(last);
                    inner.page += 1;
                }
                self.load_current(false).await
            }
            PaginationType::Infinite => self.load_more().await,
        }
    }

    /// Previous page (pages and cursor modes). A no-op on the first page.
    pub async fn prev_page(&self) -> QueryResult<Vec<Record>> {
        self.ensure_live()?;
        match self.config.pagination_type {
            PaginationType::Pages => {
                let page = self.shared.inner.read().await.page;
                if page <= 1 {
                    return Ok(self.items().await);
                }
                self.go_to_page(page - 1).await
            }
            PaginationType::Cursor => {
                {
                    let mut inner = self.shared.inner.write().await;
                    if inner.page <= 1 {
                        drop(inner);
                        return Ok(self.items().await);
                    }
                    inner.cursors.pop();
                    inner.page -= 1;
                }
                self.load_current(false).await
            }
            PaginationType::Infinite => Err(QueryError::Configuration(
                "prev_page is not available in infinite pagination".into(),
            )),
        }
    }

    /// Appends the next page (infinite mode). A no-op once everything is loaded.
    pub async fn load_more(&self) -> QueryResult<Vec<Record>> {
        self.ensure_live()?;
        if self.config.pagination_type != PaginationType::Infinite {
            return Err(QueryError::Configuration(
                "load_more requires infinite pagination".into(),
            ));
        }
        if !self.has_more().await {
            return Ok(self.items().await);
        }
        self.advance_infinite(false).await?;
        Ok(self.items().await)
    }

    /// Moves the loaded page into `accumulated` and loads the next one. A
    /// page that failed to load holds no data and is loaded again instead.
    async fn advance_infinite(&self, force: bool) -> QueryResult<()> {
        match self.fetcher.data().await {
            Some(current) => {
                let mut inner = self.shared.inner.write().await;
                inner.accumulated.extend(current.into_records());
                inner.page += 1;
            }
            None => debug!(collection = %self.collection, "reloading the page that failed"),
        }
        self.load_current(force).await.map(drop)
    }

    // ── Sorting ──────────────────────────────────────────────────

    /// Sorts by `field`. Returns to the first page, dropping accumulated pages.
    pub async fn set_sort(
        &self,
        field: impl Into<String>,
        direction: SortDirection,
    ) -> QueryResult<Vec<Record>> {
        self.ensure_live()?;
        let order = OrderBy {
            field: field.into(),
            direction,
        };
        {
            let mut inner = self.shared.inner.write().await;
            inner.sort = Some(order);
            inner.page = 1;
            inner.accumulated.clear();
            inner.cursors = vec![None];
        }
        self.load_current(false).await
    }

    /// Sorts ascending by `field`, or flips the direction if already sorted by it.
    pub async fn toggle_sort(&self, field: &str) -> QueryResult<Vec<Record>> {
        let direction = match &self.shared.inner.read().await.sort {
            Some(order) if order.field == field => order.direction.toggled(),
            _ => SortDirection::Asc,
        };
        self.set_sort(field, direction).await
    }

    pub async fn sort(&self) -> Option<OrderBy> {
        self.shared.inner.read().await.sort.clone()
    }

    // ── Search and filters ───────────────────────────────────────

    fn search_or_err(&self) -> QueryResult<&FilteredSearch> {
        self.search.as_ref().ok_or_else(|| {
            QueryError::Configuration("search and filters are disabled for this list".into())
        })
    }

    pub async fn set_search_term(&self, term: impl Into<String>) -> QueryResult<()> {
        self.ensure_live()?;
        if !self.config.enable_search {
            return Err(QueryError::Configuration("search is disabled for this list".into()));
        }
        self.search_or_err()?.set_search_term(term).await
    }

    pub async fn set_filter(&self, key: &str, value: Value) -> QueryResult<Vec<Record>> {
        self.ensure_live()?;
        if !self.config.enable_filters {
            return Err(QueryError::Configuration("filters are disabled for this list".into()));
        }
        self.search_or_err()?.set_filter(key, value).await?;
        Ok(self.items().await)
    }

    pub async fn clear_filters(&self) -> QueryResult<Vec<Record>> {
        self.ensure_live()?;
        self.search_or_err()?.clear_filters().await?;
        Ok(self.items().await)
    }

    // ── Selection ────────────────────────────────────────────────

    fn ensure_selection(&self) -> QueryResult<()> {
        if self.config.enable_selection {
            Ok(())
        } else {
            Err(QueryError::Configuration("selection is disabled for this list".into()))
        }
    }

    /// Flips membership of `id`. Returns whether it is now selected.
    /// Adding beyond `maxSelectionSize` is refused and logged.
    pub async fn toggle_selection(&self, id: &RecordId) -> QueryResult<bool> {
        self.ensure_selection()?;
        let mut inner = self.shared.inner.write().await;
        if let Some(pos) = inner.selected.iter().position(|s| s == id) {
            inner.selected.remove(pos);
            return Ok(false);
        }
        if let Some(max) = self.config.max_selection_size
            && inner.selected.len() >= max
        {
            warn!(collection = %self.collection, max, "selection limit reached");
            return Ok(false);
        }
        inner.selected.push(id.clone());
        Ok(true)
    }

    /// Selects every visible item, stopping at `maxSelectionSize`.
    /// Returns how many items were added.
    pub async fn select_all(&self) -> QueryResult<usize> {
        self.ensure_selection()?;
        let items = self.items().await;
        let mut inner = self.shared.inner.write().await;
        let already: HashSet<RecordId> = inner.selected.iter().cloned().collect();
        let candidates: Vec<RecordId> = items
            .into_iter()
            .map(|r| r.id)
            .filter(|id| !already.contains(id))
            .collect();
        let room = self
            .config
            .max_selection_size
            .map_or(usize::MAX, |max| max.saturating_sub(inner.selected.len()));
        if candidates.len() > room {
            warn!(
                collection = %self.collection,
                requested = candidates.len(),
                added = room,
                "select all truncated at selection limit"
            );
        }
        let added = candidates.len().min(room);
        inner.selected.extend(candidates.into_iter().take(added));
        Ok(added)
    }

    pub async fn clear_selection(&self) {
        self.shared.inner.write().await.selected.clear();
    }

    pub async fn is_selected(&self, id: &RecordId) -> bool {
        self.shared.inner.read().await.selected.contains(id)
    }

    /// Selected ids still visible, in selection order.
    pub async fn selected_ids(&self) -> Vec<RecordId> {
        let items = self.items().await;
        self.prune_selection(&items).await;
        self.shared.inner.read().await.selected.clone()
    }

    /// Visible records that are selected, in list order.
    pub async fn selected_items(&self) -> Vec<Record> {
        let items = self.items().await;
        self.prune_selection(&items).await;
        let inner = self.shared.inner.read().await;
        items
            .into_iter()
            .filter(|r| inner.selected.contains(&r.id))
            .collect()
    }

    async fn prune_selection(&self, visible: &[Record]) {
        let visible: HashSet<&RecordId> = visible.iter().map(|r| &r.id).collect();
        let mut inner = self.shared.inner.write().await;
        let before = inner.selected.len();
        inner.selected.retain(|id| visible.contains(id));
        if inner.selected.len() != before {
            debug!(
                collection = %self.collection,
                dropped = before - inner.selected.len(),
                "pruned selection to visible items"
            );
        }
    }

    // ── Bulk actions ─────────────────────────────────────────────

    /// Deletes every selected record concurrently. A no-op unless bulk
    /// actions are enabled.
    pub async fn bulk_delete(&self) -> QueryResult<BulkOutcome> {
        self.ensure_live()?;
        if !self.config.enable_bulk_actions {
            debug!(collection = %self.collection, "bulk delete ignored, bulk actions disabled");
            return Ok(BulkOutcome::default());
        }
        let ids = self.selected_ids().await;
        let results = join_all(ids.iter().map(|id| self.actions.delete(id))).await;
        let outcome = BulkOutcome::from_results(ids, results);
        self.finish_bulk("delete", &outcome).await?;
        Ok(outcome)
    }

    /// Merges `patch` into every selected record. A no-op unless bulk actions are enabled.
    pub async fn bulk_update(&self, patch: Fields) -> QueryResult<BulkOutcome> {
        self.ensure_live()?;
        if !self.config.enable_bulk_actions {
            debug!(collection = %self.collection, "bulk update ignored, bulk actions disabled");
            return Ok(BulkOutcome::default());
        }
        let ids = self.selected_ids().await;
        let results = join_all(ids.iter().map(|id| self.actions.update(id, patch.clone()))).await;
        let outcome = BulkOutcome::from_results(ids, results);
        self.finish_bulk("update", &outcome).await?;
        Ok(outcome)
    }

    /// Selected records as a JSON array. `None` unless bulk actions are enabled.
    pub async fn bulk_export(&self) -> Option<Value> {
        if !self.config.enable_bulk_actions {
            return None;
        }
        let records = self.selected_items().await;
        Some(Value::Array(records.iter().map(Record::to_value).collect()))
    }

    async fn finish_bulk(&self, action: &str, outcome: &BulkOutcome) -> QueryResult<()> {
        if outcome.failed.is_empty() {
            debug!(collection = %self.collection, action, count = outcome.succeeded.len(), "bulk action done");
        } else {
            warn!(
                collection = %self.collection,
                action,
                succeeded = outcome.succeeded.len(),
                failed = outcome.failed.len(),
                "bulk action partially failed"
            );
        }
        if action == "delete" {
            let done: HashSet<&RecordId> = outcome.succeeded.iter().collect();
            self.shared
                .inner
                .write()
                .await
                .selected
                .retain(|id| !done.contains(id));
        }
        if !outcome.succeeded.is_empty() {
            self.count_total().await;
            self.load_current(true).await?;
        }
        Ok(())
    }

    // ── Background ───────────────────────────────────────────────

    fn start_auto_refresh(&self) {
        let this = self.clone();
        let period = self.config.refresh_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if this.is_disposed() {
                    return;
                }
                if let Err(e) = this.refresh().await
                    && !e.is_cancelled()
                {
                    warn!(collection = %this.collection, error = %e, "auto-refresh failed");
                }
            }
        });
        self.shared.refresh.set(handle);
        debug!(collection = %self.collection, "auto-refresh started");
    }

    pub fn stop_auto_refresh(&self) -> bool {
        self.shared.refresh.abort()
    }

    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.refresh.abort();
        self.fetcher.dispose();
        if let Some(search) = &self.search {
            search.dispose();
        }
        debug!(collection = %self.collection, "entity list disposed");
    }

    // ── Internals ────────────────────────────────────────────────

    fn ensure_live(&self) -> QueryResult<()> {
        if self.is_disposed() {
            Err(QueryError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Points the fetcher at the current page and loads it.
    async fn load_current(&self, force: bool) -> QueryResult<Vec<Record>> {
        let signature = {
            let mut inner = self.shared.inner.write().await;
            inner.loading = true;
            let cursor = inner.cursors.last().cloned().flatten();
            page_signature(&self.collection, &self.config, inner.sort.clone(), inner.page, cursor)
        };
        self.fetcher.reconfigure(signature).await;
        let result = if force {
            self.fetcher.refetch().await
        } else {
            self.fetcher.fetch().await
        };
        self.shared.inner.write().await.loading = false;
        result?;
        let items = self.items().await;
        self.prune_selection(&items).await;
        Ok(items)
    }

    async fn count_total(&self) {
        if self.config.pagination_type != PaginationType::Pages {
            return;
        }
        let query = ListQuery::from_filters(&self.config.default_filters);
        let total = match self.store.count_documents(&self.collection, &query).await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(collection = %self.collection, error = %e, "could not count records");
                None
            }
        };
        self.shared.inner.write().await.total_items = total;
    }
}

fn page_signature(
    collection: &str,
    config: &ListConfig,
    sort: Option<OrderBy>,
    page: usize,
    cursor: Option<RecordId>,
) -> QuerySignature {
    let signature = QuerySignature::collection(collection, config.default_filters.clone())
        .with_order(sort)
        .with_limit(Some(config.page_size));
    match config.pagination_type {
        PaginationType::Cursor => signature.with_start_after(cursor),
        PaginationType::Pages | PaginationType::Infinite => {
            signature.with_offset(Some((page.saturating_sub(1)) * config.page_size))
        }
    }
}

impl std::fmt::Debug for EntityList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityList")
            .field("collection", &self.collection)
            .field("config", &self.config)
            .finish()
    }
}
