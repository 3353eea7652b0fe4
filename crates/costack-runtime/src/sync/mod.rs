//! Coroutine-aware synchronization primitives
//!
//! Built on the `Waitx` coordinator protocol: a suspended waiter races its
//! timer against a completion, exactly one side commits, and the winner
//! routes the coroutine to its owner scheduler's inbox — never a local
//! resume on a foreign thread.

mod event;
mod mutex;

pub use event::{Event, WaitGroup};
pub use mutex::{CoMutex, CoMutexGuard};
