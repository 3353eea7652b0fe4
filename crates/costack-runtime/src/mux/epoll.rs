//! Linux epoll backend
//!
//! One epoll instance per scheduler plus an eventfd serving as the wake
//! channel. Registered fds carry their own fd as the epoll token; the wake
//! eventfd uses a reserved token that can never collide.

use super::{FdSlot, IoKind, MuxEvent};
use crate::timer::WAIT_FOREVER;
use costack_core::error::{SchedError, SchedResult};
use costack_core::id::CoroId;
use std::collections::HashMap;
use std::os::unix::io::RawFd;

/// Token of the wake eventfd.
const WAKE_TOKEN: u64 = u64::MAX;

/// Event buffer capacity per wait.
const EVENT_CAPACITY: usize = 1024;

/// Thread-safe handle that interrupts a blocked `wait`.
#[derive(Debug, Clone, Copy)]
pub struct WakeHandle {
    efd: RawFd,
}

impl WakeHandle {
    /// Wake the owning scheduler's `wait` promptly.
    pub fn signal(&self) {
        let one: u64 = 1;
        unsafe {
            libc::write(self.efd, &one as *const u64 as *const libc::c_void, 8);
        }
    }
}

/// epoll-based readiness multiplexer.
pub struct Mux {
    ep: RawFd,
    efd: RawFd,
    events: Vec<libc::epoll_event>,
    nevents: usize,
    fds: HashMap<RawFd, FdSlot>,
}

impl Mux {
    pub fn new() -> SchedResult<Self> {
        let ep = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if ep < 0 {
            return Err(SchedError::Mux(last_errno()));
        }

        let efd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if efd < 0 {
            let err = last_errno();
            unsafe { libc::close(ep) };
            return Err(SchedError::Mux(err));
        }

        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        let rc = unsafe { libc::epoll_ctl(ep, libc::EPOLL_CTL_ADD, efd, &mut ev) };
        if rc != 0 {
            let err = last_errno();
            unsafe {
                libc::close(efd);
                libc::close(ep);
            }
            return Err(SchedError::Mux(err));
        }

        Ok(Mux {
            ep,
            efd,
            events: Vec::with_capacity(EVENT_CAPACITY),
            nevents: 0,
            fds: HashMap::new(),
        })
    }

    pub fn wake_handle(&self) -> WakeHandle {
        WakeHandle { efd: self.efd }
    }

    /// Register or widen interest on `fd` for `co`.
    ///
    /// Fails if another coroutine already waits for the same direction, or
    /// if the kernel rejects the registration.
    pub fn add_event(&mut self, fd: RawFd, kind: IoKind, co: CoroId) -> bool {
        let slot = self.fds.entry(fd).or_default();
        let existed = !slot.is_empty();
        let prev = *slot;
        match kind {
            IoKind::Read => match slot.reader {
                Some(r) if r != co => return false,
                Some(_) => return true,
                None => slot.reader = Some(co),
            },
            IoKind::Write => match slot.writer {
                Some(w) if w != co => return false,
                Some(_) => return true,
                None => slot.writer = Some(co),
            },
        }

        let mut ev = libc::epoll_event {
            events: event_mask(slot),
            u64: fd as u64,
        };
        let op = if existed {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };
        let rc = unsafe { libc::epoll_ctl(self.ep, op, fd, &mut ev) };
        if rc != 0 {
            costack_core::cowarn!("epoll_ctl on fd {} failed: errno {}", fd, last_errno());
            let slot = self.fds.get_mut(&fd).unwrap();
            *slot = prev;
            if slot.is_empty() {
                self.fds.remove(&fd);
            }
            return false;
        }
        true
    }

    /// Narrow interest on `fd` to the other direction, or drop it entirely
    /// when `kind` is `None` or nothing remains.
    pub fn del_event(&mut self, fd: RawFd, kind: Option<IoKind>) {
        let Some(slot) = self.fds.get_mut(&fd) else {
            return;
        };
        match kind {
            Some(IoKind::Read) => slot.reader = None,
            Some(IoKind::Write) => slot.writer = None,
            None => *slot = FdSlot::default(),
        }

        if slot.is_empty() {
            self.fds.remove(&fd);
            unsafe {
                libc::epoll_ctl(self.ep, libc::EPOLL_CTL_DEL, fd, core::ptr::null_mut());
            }
        } else {
            let mut ev = libc::epoll_event {
                events: event_mask(slot),
                u64: fd as u64,
            };
            unsafe {
                libc::epoll_ctl(self.ep, libc::EPOLL_CTL_MOD, fd, &mut ev);
            }
        }
    }

    /// Block up to `ms` milliseconds ([`WAIT_FOREVER`] blocks without
    /// limit). Returns the number of surfaced events, 0 on timeout or
    /// interruption, -1 on a transient error the caller should log and
    /// retry next tick.
    pub fn wait(&mut self, ms: u32) -> i32 {
        let timeout = if ms == WAIT_FOREVER {
            -1
        } else {
            ms.min(i32::MAX as u32) as i32
        };

        unsafe {
            self.events.set_len(0);
        }
        let n = unsafe {
            libc::epoll_wait(
                self.ep,
                self.events.as_mut_ptr(),
                EVENT_CAPACITY as i32,
                timeout,
            )
        };
        if n < 0 {
            self.nevents = 0;
            return if last_errno() == libc::EINTR { 0 } else { -1 };
        }
        unsafe {
            self.events.set_len(n as usize);
        }
        self.nevents = n as usize;
        n
    }

    /// Resolve the `i`-th event of the last `wait` batch.
    ///
    /// Error conditions (EPOLLERR/EPOLLHUP arrive without IN/OUT bits) wake
    /// both registered sides so each waiter can observe the failure.
    pub fn event_at(&self, i: usize) -> MuxEvent {
        let ev = self.events[i];
        if ev.u64 == WAKE_TOKEN {
            return MuxEvent {
                wake: true,
                ..MuxEvent::default()
            };
        }

        let fd = ev.u64 as RawFd;
        let slot = self.fds.get(&fd).copied().unwrap_or_default();
        let readable = ev.events & libc::EPOLLIN as u32 != 0;
        let writable = ev.events & libc::EPOLLOUT as u32 != 0;

        MuxEvent {
            wake: false,
            reader: if readable || !writable { slot.reader } else { None },
            writer: if writable || !readable { slot.writer } else { None },
        }
    }

    /// Drain the wake channel after a wake event surfaced.
    pub fn drain_wake(&self) {
        let mut buf: u64 = 0;
        unsafe {
            libc::read(self.efd, &mut buf as *mut u64 as *mut libc::c_void, 8);
        }
    }

    pub fn registered_fds(&self) -> usize {
        self.fds.len()
    }
}

impl Drop for Mux {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.efd);
            libc::close(self.ep);
        }
    }
}

fn event_mask(slot: &FdSlot) -> u32 {
    let mut mask = 0u32;
    if slot.reader.is_some() {
        mask |= libc::EPOLLIN as u32;
    }
    if slot.writer.is_some() {
        mask |= libc::EPOLLOUT as u32;
    }
    mask
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os_pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn test_signal_wakes_wait() {
        let mut mux = Mux::new().unwrap();
        mux.wake_handle().signal();
        let n = mux.wait(1000);
        assert_eq!(n, 1);
        let ev = mux.event_at(0);
        assert!(ev.wake);
        mux.drain_wake();
    }

    #[test]
    fn test_read_readiness_resolves_waiter() {
        let mut mux = Mux::new().unwrap();
        let (rd, wr) = os_pipe();
        let co = CoroId::new(5);
        assert!(mux.add_event(rd, IoKind::Read, co));

        unsafe { libc::write(wr, b"x".as_ptr() as *const libc::c_void, 1) };
        let n = mux.wait(1000);
        assert_eq!(n, 1);
        let ev = mux.event_at(0);
        assert_eq!(ev.reader, Some(co));
        assert_eq!(ev.writer, None);

        mux.del_event(rd, None);
        assert_eq!(mux.registered_fds(), 0);
        unsafe {
            libc::close(rd);
            libc::close(wr);
        }
    }

    #[test]
    fn test_deleted_interest_never_surfaces() {
        let mut mux = Mux::new().unwrap();
        let (rd, wr) = os_pipe();
        assert!(mux.add_event(rd, IoKind::Read, CoroId::new(9)));
        mux.del_event(rd, Some(IoKind::Read));

        unsafe { libc::write(wr, b"x".as_ptr() as *const libc::c_void, 1) };
        let n = mux.wait(50);
        assert_eq!(n, 0);
        unsafe {
            libc::close(rd);
            libc::close(wr);
        }
    }

    #[test]
    fn test_conflicting_registration_rejected() {
        let mut mux = Mux::new().unwrap();
        let (rd, wr) = os_pipe();
        assert!(mux.add_event(rd, IoKind::Read, CoroId::new(1)));
        assert!(!mux.add_event(rd, IoKind::Read, CoroId::new(2)));
        // Same coroutine again is fine.
        assert!(mux.add_event(rd, IoKind::Read, CoroId::new(1)));
        unsafe {
            libc::close(rd);
            libc::close(wr);
        }
    }

    #[test]
    fn test_wait_timeout_returns_zero() {
        let mut mux = Mux::new().unwrap();
        let n = mux.wait(10);
        assert_eq!(n, 0);
    }
}
