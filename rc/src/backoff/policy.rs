//! Exponential backoff with full jitter

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::config::{BackoffConfig, MAXIMUM_BACKOFF_SECONDS};

/// Largest exponent that still fits a u64 power of two
const MAX_EXPONENT: u32 = 63;

/// `2^attempt` seconds, with the exponent clamped so it cannot overflow
pub fn exponential_ceiling(attempt: u32) -> u64 {
    1u64 << attempt.min(MAX_EXPONENT)
}

/// Computes retry delays for a run that keeps hitting its quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    max_backoff_secs: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(MAXIMUM_BACKOFF_SECONDS)
    }
}

impl BackoffPolicy {
    /// Create a policy capped at `max_backoff_secs`, never above two minutes
    pub fn new(max_backoff_secs: u64) -> Self {
        Self {
            max_backoff_secs: max_backoff_secs.min(MAXIMUM_BACKOFF_SECONDS),
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        if config.max_backoff_secs > MAXIMUM_BACKOFF_SECONDS {
            warn!(
                configured = config.max_backoff_secs,
                cap = MAXIMUM_BACKOFF_SECONDS,
                "max-backoff-secs exceeds the hard cap, clamping"
            );
        }
        Self::new(config.max_backoff_secs)
    }

    pub fn max_backoff_secs(&self) -> u64 {
        self.max_backoff_secs
    }

    /// Largest delay `attempt` can produce, in seconds
    pub fn ceiling(&self, attempt: u32) -> u64 {
        exponential_ceiling(attempt).min(self.max_backoff_secs)
    }

    /// Draw the delay for `attempt`: uniform in `0..=2^attempt` seconds, capped
    pub fn delay_for<G: Rng + ?Sized>(&self, attempt: u32, rng: &mut G) -> Duration {
        let upper = exponential_ceiling(attempt);
        let jittered = rng.random_range(0..=upper);
        Duration::from_secs(jittered.min(self.max_backoff_secs))
    }
}
