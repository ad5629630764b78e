//! Search with typed filter definitions, presets and a filter history.

use chrono::{DateTime, NaiveDate};
use regie_cache::Cache;
use regie_model::{is_empty_value, FilterOp, FilterValue, Filters, Record};
use regie_storage::StoreAdapter;
use regie_types::{SharedClock, SystemClock, Timestamp};
use regie_validate::ValidationErrors;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{QueryError, QueryResult};
use crate::search::{SearchConfig, SearchController};

/// How a filter's value is shaped and checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterKind {
    /// One of `options`, or a list of them.
    Select,
    /// `{min, max}` within the definition's bounds.
    Range,
    /// `{start, end}` dates with `start <= end`.
    DateRange,
    /// Non-empty text, matched as a substring.
    Text,
    Boolean,
}

/// Declares one filter the caller may set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDefinition {
    /// Field the filter applies to.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub kind: FilterKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl FilterDefinition {
    fn new(key: impl Into<String>, kind: FilterKind) -> Self {
        Self {
            key: key.into(),
            label: None,
            kind,
            options: Vec::new(),
            min: None,
            max: None,
        }
    }

    pub fn select(key: impl Into<String>, options: Vec<Value>) -> Self {
        Self {
            options,
            ..Self::new(key, FilterKind::Select)
        }
    }

    pub fn range(key: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            min,
            max,
            ..Self::new(key, FilterKind::Range)
        }
    }

    pub fn date_range(key: impl Into<String>) -> Self {
        Self::new(key, FilterKind::DateRange)
    }

    pub fn text(key: impl Into<String>) -> Self {
        Self::new(key, FilterKind::Text)
    }

    pub fn boolean(key: impl Into<String>) -> Self {
        Self::new(key, FilterKind::Boolean)
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.key)
    }

    /// Checks a candidate value against this definition.
    pub fn validate(&self, value: &Value) -> bool {
        match self.kind {
            FilterKind::Select => match value {
                Value::Array(items) => items.iter().all(|v| self.options.contains(v)),
                other => self.options.contains(other),
            },
            FilterKind::Range => match value {
                Value::Number(_) => {
                    let n = value.as_f64();
                    self.within_bounds(n, n)
                }
                Value::Object(map) => {
                    let min = map.get("min").filter(|v| !v.is_null());
                    let max = map.get("max").filter(|v| !v.is_null());
                    let (Some(lo), Some(hi)) = (number_or_open(min), number_or_open(max)) else {
                        return false;
                    };
                    if let (Some(lo), Some(hi)) = (lo, hi)
                        && lo > hi
                    {
                        return false;
                    }
                    self.within_bounds(lo, hi)
                }
                _ => false,
            },
            FilterKind::DateRange => {
                let Value::Object(map) = value else {
                    return false;
                };
                let start = map.get("start").filter(|v| !v.is_null());
                let end = map.get("end").filter(|v| !v.is_null());
                let (Some(start), Some(end)) = (date_or_open(start), date_or_open(end)) else {
                    return false;
                };
                match (start, end) {
                    (Some(start), Some(end)) => start <= end,
                    _ => true,
                }
            }
            FilterKind::Text => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            FilterKind::Boolean => value.is_boolean(),
        }
    }

    fn within_bounds(&self, lo: Option<f64>, hi: Option<f64>) -> bool {
        let lo_ok = match (self.min, lo) {
            (Some(min), Some(lo)) => min <= lo,
            _ => true,
        };
        let hi_ok = match (self.max, hi) {
            (Some(max), Some(hi)) => hi <= max,
            _ => true,
        };
        lo_ok && hi_ok
    }

    /// Converts a validated value into the filter sent to the store.
    pub fn to_filter_value(&self, value: Value) -> FilterValue {
        match self.kind {
            FilterKind::Text => FilterValue::Compare {
                operator: FilterOp::Contains,
                value,
            },
            _ => FilterValue::from(value),
        }
    }
}

/// `None` if the value is present but not a number; `Some(None)` if absent.
fn number_or_open(value: Option<&Value>) -> Option<Option<f64>> {
    match value {
        None => Some(None),
        Some(v) => v.as_f64().map(Some),
    }
}

/// `None` if the value is present but not a date; `Some(None)` if absent.
fn date_or_open(value: Option<&Value>) -> Option<Option<i64>> {
    match value {
        None => Some(None),
        Some(v) => parse_date_millis(v).map(Some),
    }
}

fn parse_date_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis());
            }
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
            Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
        }
        _ => None,
    }
}

/// A named snapshot of filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterPreset {
    pub name: String,
    pub filters: Filters,
    pub created_at: Timestamp,
}

/// What a history entry recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterAction {
    Set,
    Remove,
    Clear,
    SavePreset,
    ApplyPreset,
}

/// One entry of the filter history ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterHistoryEntry {
    pub action: FilterAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    /// Active filters after the action.
    pub filters: Filters,
    pub timestamp: Timestamp,
}

/// Configuration for a [`FilteredSearch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilteredSearchConfig {
    #[serde(flatten)]
    pub search: SearchConfig,
    /// Declared filters. Keys without a definition accept any value.
    pub filters: Vec<FilterDefinition>,
    pub filter_history_size: usize,
}

impl Default for FilteredSearchConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            filters: Vec::new(),
            filter_history_size: 50,
        }
    }
}

impl FilteredSearchConfig {
    pub fn from_json(value: Value) -> QueryResult<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| QueryError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> QueryResult<()> {
        self.search.validate()?;
        if self.filter_history_size == 0 {
            return Err(QueryError::Configuration(
                "filterHistorySize must be at least 1".into(),
            ));
        }
        for (i, def) in self.filters.iter().enumerate() {
            if self.filters[..i].iter().any(|d| d.key == def.key) {
                return Err(QueryError::Configuration(format!(
                    "filter {:?} is defined twice",
                    def.key
                )));
            }
            if def.kind == FilterKind::Select && def.options.is_empty() {
                return Err(QueryError::Configuration(format!(
                    "select filter {:?} has no options",
                    def.key
                )));
            }
            if let (Some(min), Some(max)) = (def.min, def.max)
                && min > max
            {
                return Err(QueryError::Configuration(format!(
                    "range filter {:?} has min > max",
                    def.key
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FilterState {
    active: Filters,
    presets: Vec<FilterPreset>,
    history: VecDeque<FilterHistoryEntry>,
}

/// [`SearchController`] plus declared filters, presets and history.
///
/// Every filter change is pushed to the search at once; the term keeps its
/// own debounce. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FilteredSearch {
    search: SearchController,
    definitions: Arc<Vec<FilterDefinition>>,
    history_size: usize,
    clock: SharedClock,
    state: Arc<RwLock<FilterState>>,
}

impl FilteredSearch {
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        collection: impl Into<String>,
        config: FilteredSearchConfig,
    ) -> QueryResult<Self> {
        config.validate()?;
        let search = SearchController::new(store, collection, config.search)?;
        Ok(Self {
            search,
            definitions: Arc::new(config.filters),
            history_size: config.filter_history_size,
            clock: Arc::new(SystemClock),
            state: Arc::new(RwLock::new(FilterState::default())),
        })
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.search = self.search.with_cache(cache);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.search = self.search.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    pub fn on_error(mut self, f: impl Fn(&QueryError) + Send + Sync + 'static) -> Self {
        self.search = self.search.on_error(f);
        self
    }

    /// The underlying text search.
    pub fn search(&self) -> &SearchController {
        &self.search
    }

    pub async fn set_search_term(&self, term: impl Into<String>) -> QueryResult<()> {
        self.search.set_search_term(term).await
    }

    pub async fn results(&self) -> Vec<Record> {
        self.search.results().await
    }

    pub fn definitions(&self) -> &[FilterDefinition] {
        &self.definitions
    }

    pub fn definition(&self, key: &str) -> Option<&FilterDefinition> {
        self.definitions.iter().find(|d| d.key == key)
    }

    /// Whether `value` is acceptable for filter `key`. Empty values always
    /// are (they remove the filter); undeclared keys accept anything.
    pub fn validate_filter(&self, key: &str, value: &Value) -> bool {
        if is_empty_value(value) {
            return true;
        }
        self.definition(key).is_none_or(|def| def.validate(value))
    }

    // ── Filters ──────────────────────────────────────────────────

    /// Sets one filter and re-runs the search. `null`, `""` and `[]` remove it.
    pub async fn set_filter(&self, key: &str, value: Value) -> QueryResult<Vec<Record>> {
        if is_empty_value(&value) {
            return self.remove_filter(key).await;
        }
        if !self.validate_filter(key, &value) {
            let name = self.definition(key).map_or(key, |d| d.display_name());
            warn!(key, value = %value, "rejected filter value");
            let mut errors = ValidationErrors::new();
            errors.insert(key, format!("Invalid value for {name}"));
            return Err(QueryError::ValidationFailed(errors));
        }
        let filter = match self.definition(key) {
            Some(def) => def.to_filter_value(value.clone()),
            None => FilterValue::from(value.clone()),
        };
        let filters = {
            let mut state = self.state.write().await;
            state.active.set(key, filter);
            let filters = state.active.clone();
            self.record(&mut state, FilterAction::Set, Some(key), Some(value), None);
            filters
        };
        self.search.set_filters(filters).await
    }

    pub async fn remove_filter(&self, key: &str) -> QueryResult<Vec<Record>> {
        let filters = {
            let mut state = self.state.write().await;
            state.active.remove(key);
            let filters = state.active.clone();
            self.record(&mut state, FilterAction::Remove, Some(key), None, None);
            filters
        };
        self.search.set_filters(filters).await
    }

    pub async fn clear_filters(&self) -> QueryResult<Vec<Record>> {
        {
            let mut state = self.state.write().await;
            state.active.clear();
            self.record(&mut state, FilterAction::Clear, None, None, None);
        }
        self.search.set_filters(Filters::new()).await
    }

    pub async fn active_filters(&self) -> Filters {
        self.state.read().await.active.clone()
    }

    pub async fn active_filter_count(&self) -> usize {
        self.state.read().await.active.len()
    }

    // ── Presets ──────────────────────────────────────────────────

    /// Stores `filters` under `name`, replacing any preset of that name.
    pub async fn save_preset(&self, name: impl Into<String>, filters: Filters) -> FilterPreset {
        let preset = FilterPreset {
            name: name.into(),
            filters,
            created_at: self.clock.now(),
        };
        let mut state = self.state.write().await;
        state.presets.retain(|p| p.name != preset.name);
        state.presets.push(preset.clone());
        self.record(&mut state, FilterAction::SavePreset, None, None, Some(&preset.name));
        debug!(preset = %preset.name, "filter preset saved");
        preset
    }

    pub async fn delete_preset(&self, name: &str) -> bool {
        let mut state = self.state.write().await;
        let before = state.presets.len();
        state.presets.retain(|p| p.name != name);
        state.presets.len() != before
    }

    /// Replaces every active filter with the preset's and re-runs the search.
    pub async fn apply_preset(&self, name: &str) -> QueryResult<Vec<Record>> {
        let filters = {
            let mut state = self.state.write().await;
            let preset = state
                .presets
                .iter()
                .find(|p| p.name == name)
                .cloned()
                .ok_or_else(|| QueryError::Configuration(format!("unknown preset {name:?}")))?;
            state.active = preset.filters;
            let filters = state.active.clone();
            self.record(&mut state, FilterAction::ApplyPreset, None, None, Some(name));
            filters
        };
        self.search.set_filters(filters).await
    }

    pub async fn presets(&self) -> Vec<FilterPreset> {
        self.state.read().await.presets.clone()
    }

    /// Filter history, oldest first.
    pub async fn filter_history(&self) -> Vec<FilterHistoryEntry> {
        self.state.read().await.history.iter().cloned().collect()
    }

    pub fn dispose(&self) {
        self.search.dispose();
    }

    fn record(
        &self,
        state: &mut FilterState,
        action: FilterAction,
        key: Option<&str>,
        value: Option<Value>,
        preset: Option<&str>,
    ) {
        if state.history.len() == self.history_size {
            state.history.pop_front();
        }
        state.history.push_back(FilterHistoryEntry {
            action,
            key: key.map(str::to_string),
            value,
            preset: preset.map(str::to_string),
            filters: state.active.clone(),
            timestamp: self.clock.now(),
        });
    }
}

impl std::fmt::Debug for FilteredSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilteredSearch")
            .field("search", &self.search)
            .field("definitions", &self.definitions)
            .finish()
    }
}
