//! runclock - deadline and quota-retry timers for orchestrated runs
//!
//! The timeout-and-retry core of a workload controller. It tracks many
//! concurrently executing runs and, for each one, either notices that the run
//! outlived its deadline or retries it after a backoff when a resource quota
//! rejected it, without polling every run on a fixed tick.
//!
//! # Core Concepts
//!
//! - **One task per wait**: every watched run and pending retry is a single
//!   tokio task blocked in one `select!`
//! - **Exactly-once firing**: a wait either fires its callback once or is
//!   cancelled by release or shutdown, never both
//! - **Bounded backoff**: exponential with full jitter, capped, safe for any
//!   attempt count
//!
//! # Modules
//!
//! - [`deadline`] - Deadline tracking and resync
//! - [`backoff`] - Quota-retry backoff
//! - [`timer`] - Shared wait registry and wait tasks
//! - [`timers`] - Both components wired to one registry
//! - [`config`] - Configuration types and loading
//! - [`simulate`] - Scenario-driven simulation
//! - [`cli`] - Command-line interface

pub mod backoff;
pub mod cli;
pub mod config;
pub mod deadline;
pub mod domain;
pub mod error;
pub mod simulate;
pub mod timer;
pub mod timers;

// Re-export commonly used types
pub use backoff::{BackoffConfig, BackoffPolicy, BackoffRetryScheduler, ScheduledRetry};
pub use config::Config;
pub use deadline::{DeadlineTracker, ResyncStats, RunLister, TimeoutsConfig, WatchStatus};
pub use domain::{RunCallback, RunIdentity, RunKey, RunSnapshot};
pub use error::TimerError;
pub use simulate::{RunOutcome, Scenario, SimulationReport, simulate};
pub use timer::{WaitKind, WaitOutcome};
pub use timers::RunTimers;
