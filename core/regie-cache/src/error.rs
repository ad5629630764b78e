//! Error types for the cache.

use regie_storage::StoreError;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted tier failed.
    #[error("cache tier error: {0}")]
    Tier(#[from] StoreError),

    /// Invalid cache configuration.
    #[error("invalid cache configuration: {0}")]
    Configuration(String),
}
