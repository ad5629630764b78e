//! Read and write controllers for the Regie data layer.
//!
//! - [`DataFetcher`]: one query, cached by signature, retried with
//!   exponential backoff, optionally kept live through a store subscription
//! - [`ActionExecutor`]: create/update/delete/batch writes that stamp
//!   `createdAt`/`updatedAt` and invalidate the collection's cache tag
//! - [`SearchController`] / [`FilteredSearch`]: debounced text search with
//!   structured filters, presets and history
//! - [`EntityList`]: paginated or infinite listings with sorting,
//!   selection and bulk actions
//!
//! Every controller is driven by explicit method calls. Background work
//! (retries, debounce timers, auto-refresh, live subscriptions) runs on
//! spawned tokio tasks that are aborted when superseded or on `dispose()`.
//! A superseded operation never mutates state.

use std::sync::Arc;

mod action;
mod error;
mod fetcher;
mod filtered_search;
mod list;
mod search;
mod task;

pub use action::{ActionCallback, ActionExecutor, ActionOutcome, ActionState, BatchOperation};
pub use error::{QueryError, QueryResult};
pub use fetcher::{DataCallback, DataFetcher, DataTransform, FetchState, FetchedData, FetcherConfig};
pub use filtered_search::{
    FilterAction, FilterDefinition, FilterHistoryEntry, FilterKind, FilterPreset, FilteredSearch,
    FilteredSearchConfig,
};
pub use list::{
    BulkOutcome, EntityList, ItemTransform, ListConfig, ListState, Pagination, PaginationType,
};
pub use search::{SearchConfig, SearchController, SearchState};
pub use task::TaskSlot;

/// Invoked with every error a controller records.
pub type ErrorCallback = Arc<dyn Fn(&QueryError) + Send + Sync>;
