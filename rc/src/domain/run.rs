//! Run identity and snapshot types

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Anything the timers can track.
///
/// The key must be unique for the lifetime of the run. The timers never look
/// inside a run: the key is used for bookkeeping and the identity itself is
/// handed back to the callbacks unchanged.
pub trait RunIdentity: Clone + Send + Sync + 'static {
    /// Stable key, e.g. `taskrun/default/build-42`
    fn run_key(&self) -> String;
}

/// Callback invoked with the run whose timer fired
pub type RunCallback<R> = Arc<dyn Fn(R) + Send + Sync>;

/// Plain string run key for callers that have nothing richer to pass around
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunKey(String);

impl RunKey {
    /// Build a key in the `<kind>/<namespace>/<name>` form
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self(format!("{}/{}/{}", kind.to_lowercase(), namespace, name))
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RunIdentity for RunKey {
    fn run_key(&self) -> String {
        self.0.clone()
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RunKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RunKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Point-in-time view of a run as reported by a lister
#[derive(Debug, Clone)]
pub struct RunSnapshot<R> {
    /// The run itself
    pub run: R,
    /// Timeout the run declares, if any
    pub timeout: Option<Duration>,
    /// When the run started; `None` until it has
    pub start_time: Option<DateTime<Utc>>,
    /// Run reached a terminal condition
    pub done: bool,
    /// Run was cancelled by a user
    pub cancelled: bool,
}

impl<R> RunSnapshot<R> {
    /// Snapshot of a run that has not started yet
    pub fn pending(run: R) -> Self {
        Self {
            run,
            timeout: None,
            start_time: None,
            done: false,
            cancelled: false,
        }
    }

    /// Snapshot of a run that started at `start_time`
    pub fn started(run: R, start_time: DateTime<Utc>) -> Self {
        Self {
            start_time: Some(start_time),
            ..Self::pending(run)
        }
    }

    /// Set the timeout declared by the run
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the run has started
    pub fn has_started(&self) -> bool {
        self.start_time.is_some()
    }

    /// Whether a deadline still needs to be enforced for this run
    pub fn needs_deadline(&self) -> bool {
        !self.done && !self.cancelled && self.has_started()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_key_format() {
        let key = RunKey::new("TaskRun", "default", "build-42");
        assert_eq!(key.as_str(), "taskrun/default/build-42");
        assert_eq!(key.run_key(), "taskrun/default/build-42");
        assert_eq!(key.to_string(), "taskrun/default/build-42");
    }

    #[test]
    fn test_run_key_from_str() {
        let key: RunKey = "a".into();
        assert_eq!(key.run_key(), "a");
    }

    #[test]
    fn test_snapshot_needs_deadline() {
        let pending = RunSnapshot::pending(RunKey::from("a"));
        assert!(!pending.needs_deadline());

        let started = RunSnapshot::started(RunKey::from("b"), Utc::now());
        assert!(started.needs_deadline());

        let done = RunSnapshot {
            done: true,
            ..RunSnapshot::started(RunKey::from("c"), Utc::now())
        };
        assert!(!done.needs_deadline());

        let cancelled = RunSnapshot {
            cancelled: true,
            ..RunSnapshot::started(RunKey::from("d"), Utc::now())
        };
        assert!(!cancelled.needs_deadline());
    }
}
