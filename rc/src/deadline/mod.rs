//! Deadline tracking for started runs
//!
//! The reconciler calls `watch` when it sees a run start and `release` when it
//! sees the run finish. If the run outlives its timeout first, the deadline
//! callback fires once with the run.

mod config;
mod resync;
mod tracker;

pub use config::{DEFAULT_TIMEOUT_MINUTES, TimeoutsConfig};
pub use resync::{ResyncStats, RunLister};
pub use tracker::{DeadlineTracker, WatchStatus, remaining};
