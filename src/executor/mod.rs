//! Execution coordination
//!
//! One [`Coordinator`] per server instance: the lock every command runs
//! under, the broadcast signal blocked commands sleep on, and the
//! cancellation plumbing that gets them out again.

mod blocking;
mod coordinator;

pub use blocking::{parse_timeout_millis, parse_timeout_secs, BlockingWait, WaitOutcome};
pub use coordinator::{CancelHandle, Coordinator, ServerState, StateGuard};
