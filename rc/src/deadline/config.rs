//! Deadline configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout applied to runs that do not declare one, in minutes
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 60;

/// Configuration for the DeadlineTracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Timeout for runs that specify none
    #[serde(rename = "default-timeout-minutes")]
    pub default_timeout_minutes: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            default_timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
        }
    }
}

impl TimeoutsConfig {
    /// Get the default timeout as a Duration
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_minutes.saturating_mul(60))
    }

    /// Use the run's own timeout, falling back to the default
    pub fn timeout_or_default(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or_else(|| self.default_timeout())
    }
}
