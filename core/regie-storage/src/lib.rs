//! Storage seams for the Regie data layer.
//!
//! Two kinds of storage sit underneath the controllers:
//!
//! - A **document store** reached through [`StoreAdapter`]: collections of
//!   records with get/list/create/update/delete and live subscriptions. The
//!   real backend is remote and opaque; [`MemoryStore`] implements the same
//!   contract in process for tests and offline use.
//! - **Key/value tiers** reached through [`KvBackend`]: where the cache keeps
//!   its session-scoped ([`MemoryKv`]) and durable ([`SqliteKv`]) copies and
//!   where wizard progress is persisted. Values are opaque JSON strings.

mod adapter;
mod error;
mod kv;
mod memory;
mod sqlite_kv;

pub use adapter::{Snapshot, StoreAdapter, Subscription, SubscriptionTarget};
pub use error::{StoreError, StoreResult};
pub use kv::{KvBackend, MemoryKv};
pub use memory::MemoryStore;
pub use sqlite_kv::SqliteKv;
