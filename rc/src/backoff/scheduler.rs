//! Quota-retry scheduler

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::policy::BackoffPolicy;
use crate::domain::RunIdentity;
use crate::timer::{CallbackSlot, RunRegistry, Wait, WaitKind, WaitOutcome};

/// A retry that has been scheduled
#[derive(Debug)]
pub struct ScheduledRetry {
    /// How many times this run has been backed off, including this one
    pub attempt: u32,
    /// Delay before the retry callback fires
    pub delay: Duration,
    /// The task waiting out the delay
    pub worker: JoinHandle<WaitOutcome>,
}

/// Delays retries of runs rejected by a resource quota
///
/// The delay grows with each retry of the same run and is capped. The attempt
/// counter is never reset here; callers reset it once the run gets through.
pub struct BackoffRetryScheduler<R> {
    registry: Arc<RunRegistry>,
    shutdown: CancellationToken,
    callback: CallbackSlot<R>,
    policy: BackoffPolicy,
}

impl<R: RunIdentity> BackoffRetryScheduler<R> {
    /// Create a scheduler with its own registry
    pub fn new(policy: BackoffPolicy, shutdown: CancellationToken) -> Self {
        Self::with_registry(Arc::new(RunRegistry::new()), policy, shutdown)
    }

    pub(crate) fn with_registry(
        registry: Arc<RunRegistry>,
        policy: BackoffPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        debug!(?policy, "BackoffRetryScheduler::new: called");
        Self {
            registry,
            shutdown,
            callback: CallbackSlot::new("retry"),
            policy,
        }
    }

    /// Set the callback invoked when a retry delay elapses
    ///
    /// Expected to be wired once at startup, before the first retry.
    pub fn set_retry_callback<F>(&self, callback: F)
    where
        F: Fn(R) + Send + Sync + 'static,
    {
        self.callback.set(Arc::new(callback));
    }

    /// Back off `run` and arrange for the retry callback to fire afterwards
    ///
    /// Retries already pending for the same run keep waiting; each one fires
    /// unless the run is cancelled, released or the process shuts down.
    pub fn schedule_retry(&self, run: &R) -> ScheduledRetry {
        let run_key = run.run_key();
        debug!(%run_key, "BackoffRetryScheduler::schedule_retry: called");

        let attempt = self.registry.increment_attempts(&run_key);
        let delay = self.policy.delay_for(attempt, &mut rand::rng());
        let entry = self.registry.join(&run_key, WaitKind::Retry);

        info!(
            %run_key,
            attempt,
            ceiling_secs = self.policy.ceiling(attempt),
            delay_secs = delay.as_secs(),
            "Scheduling quota retry"
        );

        let worker = Wait {
            run: run.clone(),
            run_key,
            kind: WaitKind::Retry,
            delay,
            entry,
            shutdown: self.shutdown.clone(),
            registry: Arc::clone(&self.registry),
            callback: self.callback.clone(),
        }
        .spawn();

        ScheduledRetry { attempt, delay, worker }
    }

    /// Cancel every pending retry for `run` without touching the attempt count
    pub fn cancel(&self, run: &R) -> bool {
        let run_key = run.run_key();
        debug!(%run_key, "BackoffRetryScheduler::cancel: called");
        self.registry.cancel(&run_key, WaitKind::Retry)
    }

    /// Number of times `run` has been backed off
    pub fn attempts(&self, run: &R) -> u32 {
        self.registry.attempts(&run.run_key())
    }

    /// Forget the attempt count for `run`, e.g. once it ran successfully
    pub fn reset_attempts(&self, run: &R) -> bool {
        let run_key = run.run_key();
        debug!(%run_key, "BackoffRetryScheduler::reset_attempts: called");
        self.registry.reset_attempts(&run_key)
    }

    /// Whether a retry is pending for `run`
    pub fn is_pending(&self, run: &R) -> bool {
        self.registry.is_waiting(&run.run_key(), WaitKind::Retry)
    }

    /// Number of runs with a pending retry
    pub fn pending_count(&self) -> usize {
        self.registry.waiting_count(WaitKind::Retry)
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}
