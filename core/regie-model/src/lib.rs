//! Record and query model for the Regie data layer.
//!
//! Defines the types that flow between controllers, the cache and the
//! document store:
//! - [`Record`]: an untyped bag of fields plus the store-assigned id and write stamps
//! - [`Filters`] / [`FilterValue`]: caller-facing filter map; empty values never survive
//! - [`Predicate`]: the store-level condition a filter compiles to
//! - [`ListQuery`] / [`QuerySignature`]: what gets sent to the store and how it is cached
//!
//! Nothing here knows about a particular collection. Field semantics come
//! from the caller's configuration.

mod filter;
mod query;
mod record;

pub use filter::{
    compare_values, is_empty_value, FilterOp, FilterValue, Filters, Predicate, RangeBounds,
};
pub use query::{apply_list_query, ListQuery, OrderBy, QueryMode, QuerySignature, SortDirection};
pub use record::{Fields, Record};
