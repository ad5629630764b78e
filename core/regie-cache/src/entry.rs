use regie_types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A cached value with the time it was written and its invalidation tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Value,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CacheEntry {
    pub fn new(data: Value, timestamp: Timestamp, tags: Vec<String>) -> Self {
        Self {
            data,
            timestamp,
            tags,
        }
    }

    /// Age of the entry at `now`.
    pub fn age(&self, now: Timestamp) -> Duration {
        now.elapsed_since(self.timestamp)
    }

    /// Whether the entry is still valid for `ttl` at `now`.
    pub fn is_fresh(&self, now: Timestamp, ttl: Duration) -> bool {
        self.age(now) < ttl
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}
