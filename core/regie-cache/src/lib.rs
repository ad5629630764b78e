//! Query cache for the Regie data layer.
//!
//! A [`Cache`] is constructed once per resource namespace (typically one per
//! collection) and shared by reference between every controller that reads
//! that resource. It keeps up to three tiers:
//!
//! 1. **memory**: always present, bounded by `maxSize`
//! 2. **session**: optional [`KvBackend`](regie_storage::KvBackend), e.g. `MemoryKv`
//! 3. **durable**: optional [`KvBackend`](regie_storage::KvBackend), e.g. `SqliteKv`
//!
//! Reads consult the tiers in that order and copy a lower-tier hit up into
//! the tiers above it. Writes go to every tier.
//!
//! # Strategies
//!
//! - `ttl`: an entry is valid while `now - timestamp < ttl`; expired entries
//!   are deleted on read and reported as a miss
//! - `lru`: every read and write moves the key to the front of a recency
//!   list; the memory tier evicts from the back once it exceeds `maxSize`
//! - `tags`: entries stay valid until one of their tags is invalidated
//!
//! The cache is an optimization, never a correctness boundary: tier failures
//! are logged and degrade to misses.

mod cache;
mod config;
mod entry;
mod error;

pub use cache::{Cache, CacheStats, Invalidation};
pub use config::{CacheConfig, CacheStrategy};
pub use entry::CacheEntry;
pub use error::{CacheError, CacheResult};
