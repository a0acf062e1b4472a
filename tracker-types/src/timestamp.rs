//! Wire timestamps.
//!
//! Relays order and filter events by `created_at`, expressed in whole seconds
//! since the Unix epoch. Last-writer-wins comparisons use the same unit, so
//! two writes within the same second compare equal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The epoch itself; used as the "never synced" cursor.
    pub const ZERO: Self = Self(0);

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Self(secs)
    }

    /// Creates a timestamp from raw seconds.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    /// Returns the raw seconds.
    #[must_use]
    pub const fn as_secs(&self) -> i64 {
        self.0
    }

    /// Returns this timestamp moved back by `secs`, saturating at zero.
    #[must_use]
    pub fn saturating_sub_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_sub(secs as i64).max(0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(secs: i64) -> Self {
        Self(secs)
    }
}
