//! Readiness multiplexer
//!
//! Abstraction over the OS readiness primitive plus an internal wake
//! channel. Each scheduler owns one mux; registrations happen from the
//! owning thread, while `WakeHandle::signal` may be called from anywhere to
//! interrupt a blocked `wait`.
//!
//! Per registered fd the mux keeps a slot naming the coroutine waiting for
//! read readiness and the one waiting for write readiness; surfaced events
//! resolve back to those coroutines. Error conditions (hangup and friends)
//! wake both sides.

use costack_core::id::CoroId;

/// Direction of I/O interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Read,
    Write,
}

/// Per-fd registration slot: who waits for which direction.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FdSlot {
    pub reader: Option<CoroId>,
    pub writer: Option<CoroId>,
}

impl FdSlot {
    pub(crate) fn is_empty(&self) -> bool {
        self.reader.is_none() && self.writer.is_none()
    }
}

/// One surfaced readiness event, already resolved to coroutines.
#[derive(Debug, Clone, Copy, Default)]
pub struct MuxEvent {
    /// The internal wake channel fired.
    pub wake: bool,
    /// Coroutine to resume for read readiness.
    pub reader: Option<CoroId>,
    /// Coroutine to resume for write readiness.
    pub writer: Option<CoroId>,
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod epoll;
        pub use epoll::{Mux, WakeHandle};
    } else if #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd"
    ))] {
        mod kqueue;
        pub use kqueue::{Mux, WakeHandle};
    } else {
        compile_error!("Unsupported platform: no epoll or kqueue backend");
    }
}
