//! Error types for rule construction.

use thiserror::Error;

/// Result type for rule construction.
pub type ValidateResult<T> = Result<T, ValidateError>;

/// Errors raised while building rules. Failing validation is not an error:
/// it is reported through [`crate::ValidationErrors`].
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("invalid pattern for field {field}: {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid rule description: {0}")]
    InvalidSpec(#[from] serde_json::Error),

    #[error("invalid rule for field {field}: {reason}")]
    InvalidRule { field: String, reason: String },
}
