//! Error types for form controllers.

use regie_query::QueryError;
use regie_storage::StoreError;
use regie_validate::ValidationErrors;
use thiserror::Error;

/// Result type for form operations.
pub type FormResult<T> = Result<T, FormError>;

/// Errors that can occur while loading, submitting or navigating a form.
#[derive(Debug, Error)]
pub enum FormError {
    /// A read or write through the action layer failed.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The form data did not pass validation.
    #[error("validation failed: {0}")]
    ValidationFailed(ValidationErrors),

    /// Saved wizard progress could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// Programmer error: inconsistent configuration or steps.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The controller has been disposed.
    #[error("controller disposed")]
    Disposed,
}

impl FormError {
    /// True for results of superseded or torn-down work.
    pub fn is_cancelled(&self) -> bool {
        match self {
            FormError::Query(e) => e.is_cancelled(),
            FormError::Disposed => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for FormError {
    fn from(e: serde_json::Error) -> Self {
        FormError::Persistence(StoreError::Serialization(e))
    }
}
