//! Core type definitions for the Regie data layer.
//!
//! This crate defines the schema-agnostic primitives every other crate
//! depends on:
//! - Record identifiers assigned by the document store
//! - Millisecond wall-clock timestamps stamped on writes and cache entries
//! - An injectable [`Clock`] so cache expiry can be driven deterministically
//!
//! Anything that knows about field names or collections belongs in
//! `regie-model`, not here.

mod clock;
pub mod duration_ms;
mod ids;
mod timestamp;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use ids::RecordId;
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid record id: {0}")]
    InvalidId(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
