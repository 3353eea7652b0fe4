//! I/O event guard
//!
//! RAII wrapper over the scheduler's fd-interest registration: construct to
//! register, `wait` to suspend until readiness or deadline, drop to
//! deregister. Dropping before any readiness guarantees the coroutine is
//! never resumed on behalf of this fd.

pub use crate::mux::IoKind;

use crate::sched;
use crate::timer::WAIT_FOREVER;
use std::os::unix::io::RawFd;

/// Registered I/O interest of the running coroutine.
pub struct IoEvent {
    fd: RawFd,
    kind: IoKind,
}

impl IoEvent {
    /// Register interest on `fd` for the running coroutine. Returns None if
    /// the direction is already claimed or the kernel refuses the fd.
    ///
    /// Must be called from a coroutine.
    pub fn new(fd: RawFd, kind: IoKind) -> Option<IoEvent> {
        let s = sched::current().expect("IoEvent::new must be called in a coroutine");
        if s.add_io_event(fd, kind) {
            Some(IoEvent { fd, kind })
        } else {
            None
        }
    }

    /// Suspend until the fd is ready or `ms` elapse ([`WAIT_FOREVER`] for
    /// no deadline). Returns false on timeout.
    pub fn wait(&self, ms: u32) -> bool {
        let s = sched::current().expect("IoEvent::wait must be called in a coroutine");
        if ms != WAIT_FOREVER {
            s.add_timer(ms);
        }
        s.suspend();
        let timed_out = s.timeout();
        let _ = s.clear_waitx();
        !timed_out
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn kind(&self) -> IoKind {
        self.kind
    }
}

impl Drop for IoEvent {
    fn drop(&mut self) {
        if let Some(s) = sched::current() {
            s.del_io_event(self.fd, Some(self.kind));
        }
    }
}
