//! The per-run wait: one task racing shutdown, release and a timer

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::callback::CallbackSlot;
use super::registry::{RunRegistry, WaitKind, WatchEntry};
use crate::domain::RunIdentity;

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The timer elapsed and the callback was invoked (or skipped if unset)
    Fired,
    /// The run was released before the timer elapsed
    Released,
    /// The process is shutting down
    Shutdown,
}

/// Everything a single wait task needs
pub(crate) struct Wait<R> {
    pub run: R,
    pub run_key: String,
    pub kind: WaitKind,
    pub delay: Duration,
    pub entry: WatchEntry,
    pub shutdown: CancellationToken,
    pub registry: Arc<RunRegistry>,
    pub callback: CallbackSlot<R>,
}

impl<R: RunIdentity> Wait<R> {
    /// Start the wait on its own task
    pub fn spawn(self) -> JoinHandle<WaitOutcome> {
        tokio::spawn(self.run())
    }

    async fn run(self) -> WaitOutcome {
        let Wait {
            run,
            run_key,
            kind,
            delay,
            entry,
            shutdown,
            registry,
            callback,
        } = self;

        // A zero delay is ready on first poll, so it beats any release that
        // has not happened yet; one that already happened still wins.
        let expired = async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!(%run_key, kind = kind.as_str(), "Received stop signal, cancelling timer");
                return WaitOutcome::Shutdown;
            }
            _ = entry.finished().cancelled() => {
                info!(%run_key, kind = kind.as_str(), "Run finished, cancelling timer");
                return WaitOutcome::Released;
            }
            _ = expired => {}
        }

        let removed = registry.detach(&run_key, kind, entry.generation());
        debug!(%run_key, kind = kind.as_str(), removed, "Wait::run: detached from entry");
        callback.fire(run, &run_key);
        WaitOutcome::Fired
    }
}
