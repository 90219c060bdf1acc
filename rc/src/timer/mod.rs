//! Cancellable one-shot waits shared by deadlines and retries
//!
//! Every pending wait is a single tokio task blocked in one `select!` over
//! the process shutdown token, the run's finished token and a timer.

mod callback;
mod registry;
mod wait;

pub use callback::CallbackSlot;
pub use registry::{Claim, RunRegistry, WaitKind, WatchEntry};
pub use wait::WaitOutcome;

pub(crate) use wait::Wait;
