//! Domain types for runclock
//!
//! Runs are opaque to the timers: they are identified by a key and handed
//! back to the callbacks untouched.

mod run;

pub use run::{RunCallback, RunIdentity, RunKey, RunSnapshot};
