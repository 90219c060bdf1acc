//! Backoff configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard cap on a single quota-retry delay, in seconds
pub const MAXIMUM_BACKOFF_SECONDS: u64 = 120;

/// Configuration for the BackoffRetryScheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Upper bound on any retry delay; values above the hard cap are clamped
    #[serde(rename = "max-backoff-secs")]
    pub max_backoff_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_backoff_secs: MAXIMUM_BACKOFF_SECONDS,
        }
    }
}

impl BackoffConfig {
    /// Get the effective cap as a Duration
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs.min(MAXIMUM_BACKOFF_SECONDS))
    }
}
