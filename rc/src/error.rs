//! Timer error types

use thiserror::Error;

/// Errors reported by the timers
///
/// None of these are fatal to the controller: they describe a request that
/// was ignored.
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("start time must be specified to compute a deadline for {run_key}")]
    MissingStartTime { run_key: String },

    #[error("failed to list namespaces: {0}")]
    ListNamespaces(String),

    #[error("failed to list runs in namespace {namespace}: {message}")]
    ListRuns { namespace: String, message: String },
}

impl TimerError {
    /// Key of the run the error is about, if any
    pub fn run_key(&self) -> Option<&str> {
        match self {
            TimerError::MissingStartTime { run_key } => Some(run_key),
            TimerError::ListNamespaces(_) => None,
            TimerError::ListRuns { .. } => None,
        }
    }
}
