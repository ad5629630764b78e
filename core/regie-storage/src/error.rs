//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Document not found.
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Backend failure (network, permission, quota...).
    #[error("store backend error: {0}")]
    Backend(String),

    /// The backend is temporarily unavailable; the call may be retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite error from the durable key/value tier.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The subscription feed was closed by the store.
    #[error("subscription closed")]
    SubscriptionClosed,
}

impl StoreError {
    /// Returns true for failures worth retrying on reads.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Backend(_))
    }

    pub fn not_found(collection: impl Into<String>, id: impl ToString) -> Self {
        StoreError::NotFound {
            collection: collection.into(),
            id: id.to_string(),
        }
    }
}
