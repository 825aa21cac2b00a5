//! Last-modified timestamps.
//!
//! A touch must move an entity's `updated_at` forward even when two touches
//! land within the same clock reading, so [`Timestamp::tick`] never returns a
//! value at or before the one it was called on.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

fn epoch_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX))
}

impl Timestamp {
    #[must_use]
    pub fn now() -> Self {
        Self(epoch_micros())
    }

    /// The current time, or one microsecond past `self` if the clock has not
    /// moved beyond it.
    #[must_use]
    pub fn tick(self) -> Self {
        Self(epoch_micros().max(self.0.saturating_add(1)))
    }

    #[must_use]
    pub fn is_before(&self, other: &Self) -> bool {
        self < other
    }
}
