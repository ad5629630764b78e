//! Error types for the query layer.

use regie_cache::CacheError;
use regie_storage::StoreError;
use regie_validate::ValidationErrors;
use thiserror::Error;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors that can occur in fetches, writes and searches.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A single-document operation was issued without an id.
    #[error("missing identifier for {collection}")]
    MissingIdentifier { collection: String },

    /// Input was rejected before reaching the store.
    #[error("validation failed: {0}")]
    ValidationFailed(ValidationErrors),

    /// The store rejected or failed the operation.
    #[error("store operation failed: {0}")]
    StoreOperationFailed(#[from] StoreError),

    /// Programmer error: bad configuration or an unknown operation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The operation was superseded by a newer one. Never reported as an error state.
    #[error("operation cancelled")]
    Cancelled,

    /// The cache could not encode or decode a value.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// The controller has been disposed.
    #[error("controller disposed")]
    Disposed,
}

impl QueryError {
    /// Returns true for read failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueryError::StoreOperationFailed(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled | QueryError::Disposed)
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::Cache(CacheError::Serialization(e))
    }
}
