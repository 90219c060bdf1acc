//! Deadline tracker and retry scheduler wired to one registry

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backoff::{BackoffPolicy, BackoffRetryScheduler};
use crate::config::Config;
use crate::deadline::DeadlineTracker;
use crate::domain::RunIdentity;
use crate::timer::RunRegistry;

/// Both timers for one controller
///
/// The tracker and the scheduler share their registry, so releasing a run
/// through either cancels its deadline wait and any pending retry.
pub struct RunTimers<R> {
    registry: Arc<RunRegistry>,
    deadlines: DeadlineTracker<R>,
    retries: BackoffRetryScheduler<R>,
    shutdown: CancellationToken,
}

impl<R: RunIdentity> RunTimers<R> {
    pub fn new(config: &Config, shutdown: CancellationToken) -> Self {
        debug!(?config, "RunTimers::new: called");
        let registry = Arc::new(RunRegistry::new());
        let deadlines = DeadlineTracker::with_registry(
            Arc::clone(&registry),
            config.timeouts.default_timeout(),
            shutdown.clone(),
        );
        let retries = BackoffRetryScheduler::with_registry(
            Arc::clone(&registry),
            BackoffPolicy::from_config(&config.backoff),
            shutdown.clone(),
        );
        Self {
            registry,
            deadlines,
            retries,
            shutdown,
        }
    }

    pub fn deadlines(&self) -> &DeadlineTracker<R> {
        &self.deadlines
    }

    pub fn retries(&self) -> &BackoffRetryScheduler<R> {
        &self.retries
    }

    /// The run completed: cancel its waits and forget its retry attempts
    pub fn finish(&self, run: &R) -> bool {
        let run_key = run.run_key();
        let cleared = self.registry.release_and_reset(&run_key);
        debug!(%run_key, cleared, "RunTimers::finish: called");
        cleared
    }

    /// Stop every pending wait without firing callbacks
    pub fn shutdown(&self) {
        debug!("RunTimers::shutdown: called");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
