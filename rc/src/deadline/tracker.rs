//! DeadlineTracker implementation

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::TimeoutsConfig;
use super::resync::{ResyncStats, RunLister};
use crate::domain::RunIdentity;
use crate::error::TimerError;
use crate::timer::{CallbackSlot, Claim, RunRegistry, Wait, WaitKind, WaitOutcome};

/// Result of a successful `watch`
#[derive(Debug)]
pub enum WatchStatus {
    /// A new wait was started on its own task
    Started(JoinHandle<WaitOutcome>),
    /// The run already had a pending deadline wait; nothing new was started
    Attached,
}

impl WatchStatus {
    pub fn is_started(&self) -> bool {
        matches!(self, WatchStatus::Started(_))
    }
}

/// Time left before `timeout` elapses for a run that started at `start_time`
///
/// Saturates at zero for overdue runs. A timeout too large to represent is
/// returned as-is, since the elapsed time cannot matter at that scale.
pub fn remaining(timeout: Duration, start_time: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let Ok(timeout_delta) = TimeDelta::from_std(timeout) else {
        return timeout;
    };
    let elapsed = now.signed_duration_since(start_time);
    match timeout_delta.checked_sub(&elapsed) {
        Some(left) => left.to_std().unwrap_or(Duration::ZERO),
        None => timeout,
    }
}

/// Fires a callback once for every run that outlives its timeout
///
/// Each watched run gets one task that waits for whichever comes first:
/// process shutdown, the run being released, or its deadline.
pub struct DeadlineTracker<R> {
    registry: Arc<RunRegistry>,
    shutdown: CancellationToken,
    callback: CallbackSlot<R>,
    default_timeout: Duration,
}

impl<R: RunIdentity> DeadlineTracker<R> {
    /// Create a tracker with its own registry and the stock default timeout
    pub fn new(shutdown: CancellationToken) -> Self {
        let default_timeout = TimeoutsConfig::default().default_timeout();
        Self::with_registry(Arc::new(RunRegistry::new()), default_timeout, shutdown)
    }

    pub(crate) fn with_registry(
        registry: Arc<RunRegistry>,
        default_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        debug!(?default_timeout, "DeadlineTracker::new: called");
        Self {
            registry,
            shutdown,
            callback: CallbackSlot::new("deadline"),
            default_timeout,
        }
    }

    /// Override the timeout used for runs that declare none
    pub fn with_default_timeout(mut self, default_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Set the callback invoked when a run's deadline passes
    ///
    /// Expected to be wired once at startup, before the first `watch`.
    pub fn set_deadline_callback<F>(&self, callback: F)
    where
        F: Fn(R) + Send + Sync + 'static,
    {
        self.callback.set(Arc::new(callback));
    }

    /// Start enforcing `timeout` for `run`, measured from `start_time`
    ///
    /// Overdue runs fire right away. Watching a run that already has a pending
    /// wait attaches to it. A missing start time is rejected and nothing is
    /// watched.
    pub fn watch(
        &self,
        run: &R,
        timeout: Duration,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<WatchStatus, TimerError> {
        let run_key = run.run_key();
        debug!(%run_key, ?timeout, ?start_time, "DeadlineTracker::watch: called");

        // The epoch is what an unset timestamp deserializes to
        let Some(start_time) = start_time.filter(|t| *t != DateTime::<Utc>::default()) else {
            let err = TimerError::MissingStartTime { run_key };
            error!(error = %err, "Refusing to watch run");
            return Err(err);
        };

        let entry = match self.registry.claim(&run_key, WaitKind::Deadline) {
            Claim::Created(entry) => entry,
            Claim::Existing(_) => {
                debug!(%run_key, "DeadlineTracker::watch: already watched, attaching");
                return Ok(WatchStatus::Attached);
            }
        };

        let now = Utc::now();
        let remaining = remaining(timeout, start_time, now);
        info!(
            %run_key,
            %start_time,
            ?timeout,
            running_for = ?(now - start_time).to_std().unwrap_or_default(),
            ?remaining,
            "Starting deadline timer"
        );

        let worker = Wait {
            run: run.clone(),
            run_key,
            kind: WaitKind::Deadline,
            delay: remaining,
            entry,
            shutdown: self.shutdown.clone(),
            registry: Arc::clone(&self.registry),
            callback: self.callback.clone(),
        }
        .spawn();

        Ok(WatchStatus::Started(worker))
    }

    /// Like `watch`, using the default timeout when the run declares none
    pub fn watch_with_default(
        &self,
        run: &R,
        timeout: Option<Duration>,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<WatchStatus, TimerError> {
        self.watch(run, timeout.unwrap_or(self.default_timeout), start_time)
    }

    /// Cancel every pending wait for `run`
    ///
    /// Safe to call for runs that were never watched or already released.
    pub fn release(&self, run: &R) -> bool {
        let run_key = run.run_key();
        let released = self.registry.release(&run_key);
        debug!(%run_key, released, "DeadlineTracker::release: called");
        released
    }

    /// Whether a deadline wait is pending for `run`
    pub fn is_watching(&self, run: &R) -> bool {
        self.registry.is_waiting(&run.run_key(), WaitKind::Deadline)
    }

    /// Number of runs with a pending deadline wait
    pub fn watched_count(&self) -> usize {
        self.registry.waiting_count(WaitKind::Deadline)
    }

    /// Watch every started, unfinished run the lister knows about
    ///
    /// Used after a controller restart, when in-memory waits are gone. A
    /// namespace that cannot be listed is logged and skipped.
    pub async fn check_timeouts(&self, lister: &dyn RunLister<R>) -> Result<ResyncStats, TimerError> {
        debug!("DeadlineTracker::check_timeouts: called");
        let namespaces = lister.namespaces().await.map_err(|e| {
            error!(error = %e, "Can't get namespaces list");
            TimerError::ListNamespaces(e.to_string())
        })?;

        let mut stats = ResyncStats::default();
        for namespace in namespaces {
            let runs = match lister.list_runs(&namespace).await {
                Ok(runs) => runs,
                Err(e) => {
                    let err = TimerError::ListRuns {
                        namespace,
                        message: e.to_string(),
                    };
                    error!(error = %err, "Skipping namespace during resync");
                    stats.failed_namespaces += 1;
                    continue;
                }
            };
            stats.namespaces += 1;

            for snapshot in runs {
                if !snapshot.needs_deadline() {
                    stats.skipped += 1;
                    continue;
                }
                match self.watch_with_default(&snapshot.run, snapshot.timeout, snapshot.start_time) {
                    Ok(WatchStatus::Started(_)) => stats.started += 1,
                    Ok(WatchStatus::Attached) => stats.attached += 1,
                    Err(e) => {
                        warn!(%namespace, error = %e, "Skipping run during resync");
                        stats.skipped += 1;
                    }
                }
            }
        }

        info!(?stats, "Resynced deadline timers");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunKey, RunSnapshot};
    use async_trait::async_trait;
    use eyre::eyre;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn recording_tracker(shutdown: &CancellationToken) -> (DeadlineTracker<RunKey>, Arc<Mutex<Vec<String>>>) {
        let tracker = DeadlineTracker::new(shutdown.clone());
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        tracker.set_deadline_callback(move |run: RunKey| {
            sink.lock().unwrap().push(run.run_key());
        });
        (tracker, fired)
    }

    fn started(status: Result<WatchStatus, TimerError>) -> JoinHandle<WaitOutcome> {
        match status {
            Ok(WatchStatus::Started(handle)) => handle,
            other => panic!("Expected Started, got {:?}", other),
        }
    }

    #[test]
    fn test_remaining() {
        let now = Utc::now();
        let ten = Duration::from_secs(10);
        assert_eq!(remaining(ten, now - TimeDelta::seconds(3), now), Duration::from_secs(7));
        assert_eq!(remaining(ten, now - TimeDelta::seconds(30), now), Duration::ZERO);
        // Start time in the future extends the wait
        assert_eq!(remaining(ten, now + TimeDelta::seconds(5), now), Duration::from_secs(15));
        assert_eq!(remaining(Duration::MAX, now, now), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_before_deadline_never_fires() {
        let shutdown = CancellationToken::new();
        let (tracker, fired) = recording_tracker(&shutdown);
        let run = RunKey::from("a");

        let start = Utc::now() - TimeDelta::seconds(3);
        let handle = started(tracker.watch(&run, Duration::from_secs(10), Some(start)));
        assert!(tracker.is_watching(&run));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(tracker.release(&run));

        assert_eq!(handle.await.unwrap(), WaitOutcome::Released);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(fired.lock().unwrap().is_empty());
        assert!(!tracker.is_watching(&run));
    }

    #[tokio::test]
    async fn test_overdue_run_fires_immediately() {
        let shutdown = CancellationToken::new();
        let (tracker, fired) = recording_tracker(&shutdown);
        let run = RunKey::from("b");

        let start = Utc::now() - TimeDelta::seconds(6);
        let handle = started(tracker.watch(&run, Duration::from_secs(5), Some(start)));

        let outcome = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(outcome, WaitOutcome::Fired);
        assert_eq!(*fired.lock().unwrap(), vec!["b".to_string()]);
        assert!(!tracker.is_watching(&run));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_exactly_once() {
        let shutdown = CancellationToken::new();
        let (tracker, fired) = recording_tracker(&shutdown);
        let run = RunKey::from("a");

        let handle = started(tracker.watch(&run, Duration::from_secs(5), Some(Utc::now())));
        assert_eq!(handle.await.unwrap(), WaitOutcome::Fired);
        // Late release after firing is harmless
        assert!(!tracker.release(&run));
        assert_eq!(fired.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_start_time_rejected() {
        let shutdown = CancellationToken::new();
        let (tracker, _) = recording_tracker(&shutdown);
        let run = RunKey::from("a");

        let err = tracker.watch(&run, Duration::from_secs(5), None).unwrap_err();
        assert!(matches!(err, TimerError::MissingStartTime { .. }));

        let epoch = DateTime::<Utc>::default();
        assert!(tracker.watch(&run, Duration::from_secs(5), Some(epoch)).is_err());
        assert_eq!(tracker.watched_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_watch_attaches() {
        let shutdown = CancellationToken::new();
        let (tracker, fired) = recording_tracker(&shutdown);
        let run = RunKey::from("a");

        let handle = started(tracker.watch(&run, Duration::from_secs(5), Some(Utc::now())));
        let second = tracker.watch(&run, Duration::from_secs(5), Some(Utc::now())).unwrap();
        assert!(!second.is_started());
        assert_eq!(tracker.watched_count(), 1);

        assert_eq!(handle.await.unwrap(), WaitOutcome::Fired);
        assert_eq!(fired.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_double_release_is_noop() {
        let shutdown = CancellationToken::new();
        let (tracker, fired) = recording_tracker(&shutdown);
        let run = RunKey::from("a");

        assert!(!tracker.release(&run));
        assert!(!tracker.release(&run));

        let handle = started(tracker.watch(&run, Duration::from_secs(60), Some(Utc::now())));
        assert!(tracker.release(&run));
        assert!(!tracker.release(&run));
        assert_eq!(handle.await.unwrap(), WaitOutcome::Released);
        assert!(fired.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_all_watches() {
        let shutdown = CancellationToken::new();
        let (tracker, fired) = recording_tracker(&shutdown);

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let run = RunKey::from(format!("run-{}", i));
                started(tracker.watch(&run, Duration::from_secs(600), Some(Utc::now())))
            })
            .collect();

        shutdown.cancel();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), WaitOutcome::Shutdown);
        }
        assert!(fired.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_with_default_timeout() {
        let shutdown = CancellationToken::new();
        let (tracker, fired) = recording_tracker(&shutdown);
        let tracker = tracker.with_default_timeout(Duration::from_secs(30));
        let run = RunKey::from("a");

        let handle = started(tracker.watch_with_default(&run, None, Some(Utc::now())));
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(fired.lock().unwrap().is_empty());

        assert_eq!(handle.await.unwrap(), WaitOutcome::Fired);
        assert_eq!(fired.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_callback_is_noop() {
        let tracker: DeadlineTracker<RunKey> = DeadlineTracker::new(CancellationToken::new());
        let handle = started(tracker.watch(&RunKey::from("a"), Duration::from_secs(1), Some(Utc::now())));
        assert_eq!(handle.await.unwrap(), WaitOutcome::Fired);
        assert_eq!(tracker.watched_count(), 0);
    }

    struct StaticLister {
        runs: HashMap<String, Vec<RunSnapshot<RunKey>>>,
        broken: Vec<String>,
    }

    #[async_trait]
    impl RunLister<RunKey> for StaticLister {
        async fn namespaces(&self) -> eyre::Result<Vec<String>> {
            let mut names: Vec<_> = self.runs.keys().chain(self.broken.iter()).cloned().collect();
            names.sort();
            Ok(names)
        }

        async fn list_runs(&self, namespace: &str) -> eyre::Result<Vec<RunSnapshot<RunKey>>> {
            self.runs
                .get(namespace)
                .cloned()
                .ok_or_else(|| eyre!("namespace {} unavailable", namespace))
        }
    }

    struct NoNamespaces;

    #[async_trait]
    impl RunLister<RunKey> for NoNamespaces {
        async fn namespaces(&self) -> eyre::Result<Vec<String>> {
            Err(eyre!("forbidden"))
        }

        async fn list_runs(&self, _namespace: &str) -> eyre::Result<Vec<RunSnapshot<RunKey>>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_timeouts_watches_started_runs() {
        let shutdown = CancellationToken::new();
        let (tracker, _) = recording_tracker(&shutdown);
        let now = Utc::now();

        let mut runs = HashMap::new();
        runs.insert(
            "ci".to_string(),
            vec![
                RunSnapshot::started(RunKey::new("TaskRun", "ci", "running"), now)
                    .with_timeout(Duration::from_secs(300)),
                RunSnapshot::pending(RunKey::new("TaskRun", "ci", "queued")),
                RunSnapshot {
                    done: true,
                    ..RunSnapshot::started(RunKey::new("TaskRun", "ci", "finished"), now)
                },
                RunSnapshot {
                    cancelled: true,
                    ..RunSnapshot::started(RunKey::new("TaskRun", "ci", "cancelled"), now)
                },
            ],
        );
        runs.insert(
            "prod".to_string(),
            vec![RunSnapshot::started(RunKey::new("PipelineRun", "prod", "deploy"), now)],
        );
        let lister = StaticLister {
            runs,
            broken: vec!["secret".to_string()],
        };

        let stats = tracker.check_timeouts(&lister).await.unwrap();
        assert_eq!(stats.namespaces, 2);
        assert_eq!(stats.failed_namespaces, 1);
        assert_eq!(stats.started, 2);
        assert_eq!(stats.skipped, 3);
        assert!(tracker.is_watching(&RunKey::new("TaskRun", "ci", "running")));
        assert!(tracker.is_watching(&RunKey::new("PipelineRun", "prod", "deploy")));
        assert!(!tracker.is_watching(&RunKey::new("TaskRun", "ci", "finished")));

        // A second pass attaches instead of duplicating
        let stats = tracker.check_timeouts(&lister).await.unwrap();
        assert_eq!(stats.started, 0);
        assert_eq!(stats.attached, 2);
        assert_eq!(tracker.watched_count(), 2);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_check_timeouts_namespace_failure() {
        let shutdown = CancellationToken::new();
        let (tracker, _) = recording_tracker(&shutdown);
        let err = tracker.check_timeouts(&NoNamespaces).await.unwrap_err();
        assert!(matches!(err, TimerError::ListNamespaces(_)));
        assert_eq!(tracker.watched_count(), 0);
    }
}
