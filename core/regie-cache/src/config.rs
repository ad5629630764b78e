use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CacheError, CacheResult};

/// How entries stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    #[default]
    Ttl,
    Lru,
    Tags,
}

/// Configuration for a [`crate::Cache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Key prefix shared by every entry of this cache, in every tier.
    pub namespace: String,
    pub strategy: CacheStrategy,
    /// Entry lifetime under the `ttl` strategy.
    #[serde(with = "regie_types::duration_ms")]
    pub ttl: Duration,
    /// Maximum number of entries in the memory tier.
    pub max_size: usize,
    /// Tags attached to every write.
    pub tags: Vec<String>,
    /// Period of the background sweep removing expired memory entries.
    #[serde(with = "regie_types::duration_ms::option")]
    pub cleanup_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "cache".to_string(),
            strategy: CacheStrategy::Ttl,
            ttl: Duration::from_secs(300),
            max_size: 100,
            tags: Vec::new(),
            cleanup_interval: None,
        }
    }
}

impl CacheConfig {
    /// Config with the given namespace and defaults elsewhere.
    pub fn namespaced(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Parses a JSON configuration blob. Unknown keys are ignored.
    pub fn from_json(value: serde_json::Value) -> CacheResult<Self> {
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.namespace.trim().is_empty() {
            return Err(CacheError::Configuration("namespace must not be empty".into()));
        }
        if self.max_size == 0 {
            return Err(CacheError::Configuration("maxSize must be at least 1".into()));
        }
        if self.strategy == CacheStrategy::Ttl && self.ttl.is_zero() {
            return Err(CacheError::Configuration("ttl must be positive".into()));
        }
        if self.cleanup_interval.is_some_and(|d| d.is_zero()) {
            return Err(CacheError::Configuration(
                "cleanupInterval must be positive".into(),
            ));
        }
        Ok(())
    }
}
