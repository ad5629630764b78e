//! Wall-clock timestamps.
//!
//! The data layer treats record timestamps as opaque values: it stamps
//! `createdAt`/`updatedAt` on writes and compares cache entry ages, nothing
//! more. Milliseconds since the Unix epoch are enough for both and survive a
//! round-trip through the persisted cache tiers unchanged.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current system time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    /// Creates a timestamp from milliseconds since the Unix epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns milliseconds since the Unix epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Time elapsed between `earlier` and `self`, saturating at zero.
    #[must_use]
    pub fn elapsed_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Returns this timestamp shifted forward by `duration`.
    #[must_use]
    pub fn plus(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_millis() as u64))
    }

    /// Renders the timestamp as an RFC 3339 string in UTC.
    pub fn to_rfc3339(&self) -> crate::Result<String> {
        let datetime = DateTime::<Utc>::from_timestamp_millis(self.0 as i64).ok_or_else(|| {
            crate::Error::InvalidTimestamp(format!("{} is out of range", self.0))
        })?;
        Ok(datetime.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl From<u64> for Timestamp {
    fn from(millis: u64) -> Self {
        Self(millis)
    }
}
