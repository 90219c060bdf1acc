//! Quota-retry backoff
//!
//! When a run is rejected by a resource quota it is retried after an
//! exponential, fully jittered delay, capped at two minutes unless configured
//! otherwise. Each run keeps its own attempt counter so one noisy run does not
//! slow down the others.

mod config;
mod policy;
mod scheduler;

pub use config::{BackoffConfig, MAXIMUM_BACKOFF_SECONDS};
pub use policy::{BackoffPolicy, exponential_ceiling};
pub use scheduler::{BackoffRetryScheduler, ScheduledRetry};
