//! Per-run bookkeeping shared by the deadline tracker and the retry scheduler
//!
//! Two maps, each behind its own lock:
//!
//! 1. `waits`: finished signals for pending deadline and retry waits
//! 2. `attempts`: retry attempt counters
//!
//! Locks are held for a single map operation and never across an await.
//! Whenever both are needed the wait lock is taken first and released last.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Which kind of wait an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitKind {
    /// Waiting for a run's deadline
    Deadline,
    /// Waiting out a quota backoff before retrying
    Retry,
}

impl WaitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitKind::Deadline => "deadline",
            WaitKind::Retry => "retry",
        }
    }
}

/// Finished signal for one pending wait
#[derive(Debug, Clone)]
pub struct WatchEntry {
    finished: CancellationToken,
    generation: u64,
}

impl WatchEntry {
    /// Token cancelled when the run is released
    pub fn finished(&self) -> &CancellationToken {
        &self.finished
    }

    /// Distinguishes this entry from later entries for the same key
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of claiming a wait slot
#[derive(Debug)]
pub enum Claim {
    /// No entry existed; the caller owns the new one and must start a worker
    Created(WatchEntry),
    /// An entry was already pending; the caller shares it
    Existing(WatchEntry),
}

/// A pending entry and the number of workers still waiting on it
#[derive(Debug)]
struct Slot {
    entry: WatchEntry,
    waiters: usize,
}

#[derive(Debug, Default)]
struct WaitSlots {
    deadline: Option<Slot>,
    retry: Option<Slot>,
}

impl WaitSlots {
    fn slot(&self, kind: WaitKind) -> &Option<Slot> {
        match kind {
            WaitKind::Deadline => &self.deadline,
            WaitKind::Retry => &self.retry,
        }
    }

    fn slot_mut(&mut self, kind: WaitKind) -> &mut Option<Slot> {
        match kind {
            WaitKind::Deadline => &mut self.deadline,
            WaitKind::Retry => &mut self.retry,
        }
    }

    fn is_empty(&self) -> bool {
        self.deadline.is_none() && self.retry.is_none()
    }

    fn cancel_all(&mut self) -> bool {
        let mut cancelled = false;
        for slot in [self.deadline.take(), self.retry.take()].into_iter().flatten() {
            slot.entry.finished.cancel();
            cancelled = true;
        }
        cancelled
    }
}

/// Registry of pending waits and retry attempts, keyed by run key
#[derive(Debug, Default)]
pub struct RunRegistry {
    waits: Mutex<HashMap<String, WaitSlots>>,
    attempts: Mutex<HashMap<String, u32>>,
    next_generation: AtomicU64,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic inside one of these critical sections cannot leave a map
    // half-updated, so a poisoned lock is still safe to use.
    fn lock_waits(&self) -> MutexGuard<'_, HashMap<String, WaitSlots>> {
        self.waits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_attempts(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_slot(&self) -> Slot {
        Slot {
            entry: WatchEntry {
                finished: CancellationToken::new(),
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            },
            waiters: 1,
        }
    }

    /// Get the pending entry for `run_key`, or create one
    ///
    /// Only `Created` adds a waiter; an `Existing` caller must not start a worker.
    pub fn claim(&self, run_key: &str, kind: WaitKind) -> Claim {
        let mut waits = self.lock_waits();
        let slots = waits.entry(run_key.to_string()).or_default();
        if let Some(existing) = slots.slot(kind) {
            debug!(%run_key, kind = kind.as_str(), "RunRegistry::claim: reusing pending entry");
            return Claim::Existing(existing.entry.clone());
        }
        let slot = self.new_slot();
        let entry = slot.entry.clone();
        *slots.slot_mut(kind) = Some(slot);
        debug!(%run_key, kind = kind.as_str(), generation = entry.generation, "RunRegistry::claim: created entry");
        Claim::Created(entry)
    }

    /// Add a waiter to the pending entry for `run_key`, creating it if needed
    ///
    /// Every waiter shares one finished signal, so a release stops all of them.
    pub fn join(&self, run_key: &str, kind: WaitKind) -> WatchEntry {
        let mut waits = self.lock_waits();
        let slots = waits.entry(run_key.to_string()).or_default();
        let slot = slots.slot_mut(kind).get_or_insert_with(|| Slot {
            waiters: 0,
            ..self.new_slot()
        });
        slot.waiters += 1;
        debug!(%run_key, kind = kind.as_str(), waiters = slot.waiters, "RunRegistry::join: called");
        slot.entry.clone()
    }

    /// Cancel and remove every pending wait for `run_key`
    ///
    /// Returns false when nothing was pending.
    pub fn release(&self, run_key: &str) -> bool {
        let mut waits = self.lock_waits();
        match waits.remove(run_key) {
            Some(mut slots) => slots.cancel_all(),
            None => false,
        }
    }

    /// Cancel and remove the pending wait of one kind for `run_key`
    pub fn cancel(&self, run_key: &str, kind: WaitKind) -> bool {
        let mut waits = self.lock_waits();
        let Some(slots) = waits.get_mut(run_key) else {
            return false;
        };
        let cancelled = match slots.slot_mut(kind).take() {
            Some(slot) => {
                slot.entry.finished.cancel();
                true
            }
            None => false,
        };
        if slots.is_empty() {
            waits.remove(run_key);
        }
        cancelled
    }

    /// Drop one waiter after its timer fired
    ///
    /// The entry is removed with its last waiter. Entries from a different
    /// generation are left alone. Returns true when the entry was removed.
    pub fn detach(&self, run_key: &str, kind: WaitKind, generation: u64) -> bool {
        let mut waits = self.lock_waits();
        let Some(slots) = waits.get_mut(run_key) else {
            return false;
        };
        let slot = slots.slot_mut(kind);
        let Some(current) = slot.as_mut().filter(|s| s.entry.generation == generation) else {
            return false;
        };
        current.waiters = current.waiters.saturating_sub(1);
        if current.waiters > 0 {
            return false;
        }
        *slot = None;
        if slots.is_empty() {
            waits.remove(run_key);
        }
        true
    }

    /// Whether a wait of `kind` is pending for `run_key`
    pub fn is_waiting(&self, run_key: &str, kind: WaitKind) -> bool {
        self.lock_waits()
            .get(run_key)
            .map(|slots| slots.slot(kind).is_some())
            .unwrap_or(false)
    }

    /// Number of pending waits of `kind`
    pub fn waiting_count(&self, kind: WaitKind) -> usize {
        self.lock_waits()
            .values()
            .filter(|slots| slots.slot(kind).is_some())
            .count()
    }

    /// Bump the attempt counter for `run_key` and return the new value (first call returns 1)
    pub fn increment_attempts(&self, run_key: &str) -> u32 {
        let mut attempts = self.lock_attempts();
        let count = attempts.entry(run_key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Current attempt count for `run_key`
    pub fn attempts(&self, run_key: &str) -> u32 {
        self.lock_attempts().get(run_key).copied().unwrap_or(0)
    }

    /// Forget the attempt count for `run_key`
    pub fn reset_attempts(&self, run_key: &str) -> bool {
        self.lock_attempts().remove(run_key).is_some()
    }

    /// Release every pending wait and forget the attempt count in one step
    pub fn release_and_reset(&self, run_key: &str) -> bool {
        let mut waits = self.lock_waits();
        let mut attempts = self.lock_attempts();

        let released = match waits.remove(run_key) {
            Some(mut slots) => slots.cancel_all(),
            None => false,
        };
        let reset = attempts.remove(run_key).is_some();

        // Reverse of acquisition order
        drop(attempts);
        drop(waits);

        released || reset
    }
}
