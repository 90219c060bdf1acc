//! Late-bound callback slot

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::domain::{RunCallback, RunIdentity};

/// Holds the callback a timer invokes when it fires
///
/// Set once during controller startup; the last write wins. Workers read the
/// slot at firing time, so a callback installed after a wait started is still
/// honored.
pub struct CallbackSlot<R> {
    inner: Arc<RwLock<Option<RunCallback<R>>>>,
    name: &'static str,
}

impl<R> Clone for CallbackSlot<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            name: self.name,
        }
    }
}

impl<R> fmt::Debug for CallbackSlot<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSlot")
            .field("name", &self.name)
            .field("configured", &self.inner.read().unwrap_or_else(PoisonError::into_inner).is_some())
            .finish()
    }
}

impl<R: RunIdentity> CallbackSlot<R> {
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
            name,
        }
    }

    pub fn set(&self, callback: RunCallback<R>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Invoke the callback with `run`; returns false when none is configured
    pub fn fire(&self, run: R, run_key: &str) -> bool {
        // Clone out of the lock so the callback runs unlocked
        let callback = self.inner.read().unwrap_or_else(PoisonError::into_inner).clone();
        match callback {
            Some(callback) => {
                info!(%run_key, callback = self.name, "Timer fired, running callback");
                callback(run);
                true
            }
            None => {
                info!(%run_key, callback = self.name, "Timer fired but no callback was provided; nothing to do");
                false
            }
        }
    }
}
