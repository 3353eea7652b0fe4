//! macOS / BSD kqueue backend
//!
//! Same contract as the epoll backend. Read and write interests are
//! separate kevent filters; the wake channel is a non-blocking self-pipe
//! whose read end is registered like any other fd.

use super::{FdSlot, IoKind, MuxEvent};
use crate::timer::WAIT_FOREVER;
use costack_core::error::{SchedError, SchedResult};
use costack_core::id::CoroId;
use std::collections::HashMap;
use std::os::unix::io::RawFd;

/// Event buffer capacity per wait.
const EVENT_CAPACITY: usize = 1024;

/// Thread-safe handle that interrupts a blocked `wait`.
#[derive(Debug, Clone, Copy)]
pub struct WakeHandle {
    pipe_wr: RawFd,
}

impl WakeHandle {
    /// Wake the owning scheduler's `wait` promptly.
    pub fn signal(&self) {
        unsafe {
            libc::write(self.pipe_wr, b"w".as_ptr() as *const libc::c_void, 1);
        }
    }
}

/// kqueue-based readiness multiplexer.
pub struct Mux {
    kq: RawFd,
    pipe_rd: RawFd,
    pipe_wr: RawFd,
    events: Vec<libc::kevent>,
    nevents: usize,
    fds: HashMap<RawFd, FdSlot>,
}

impl Mux {
    pub fn new() -> SchedResult<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(SchedError::Mux(last_errno()));
        }

        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            let err = last_errno();
            unsafe { libc::close(kq) };
            return Err(SchedError::Mux(err));
        }
        let (pipe_rd, pipe_wr) = (fds[0], fds[1]);
        for fd in [pipe_rd, pipe_wr] {
            unsafe {
                libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }

        let mut mux = Mux {
            kq,
            pipe_rd,
            pipe_wr,
            events: Vec::with_capacity(EVENT_CAPACITY),
            nevents: 0,
            fds: HashMap::new(),
        };
        if !mux.kevent_ctl(pipe_rd, libc::EVFILT_READ, libc::EV_ADD) {
            let err = last_errno();
            drop(mux);
            return Err(SchedError::Mux(err));
        }
        Ok(mux)
    }

    pub fn wake_handle(&self) -> WakeHandle {
        WakeHandle {
            pipe_wr: self.pipe_wr,
        }
    }

    /// Register or widen interest on `fd` for `co`.
    pub fn add_event(&mut self, fd: RawFd, kind: IoKind, co: CoroId) -> bool {
        let slot = self.fds.entry(fd).or_default();
        let (filter, side) = match kind {
            IoKind::Read => (libc::EVFILT_READ, &mut slot.reader),
            IoKind::Write => (libc::EVFILT_WRITE, &mut slot.writer),
        };
        match side {
            Some(c) if *c != co => return false,
            Some(_) => return true,
            None => *side = Some(co),
        }

        if !self.kevent_ctl(fd, filter, libc::EV_ADD) {
            costack_core::cowarn!("kevent add on fd {} failed: errno {}", fd, last_errno());
            let slot = self.fds.get_mut(&fd).unwrap();
            match kind {
                IoKind::Read => slot.reader = None,
                IoKind::Write => slot.writer = None,
            }
            if slot.is_empty() {
                self.fds.remove(&fd);
            }
            return false;
        }
        true
    }

    /// Narrow interest on `fd`, or drop it entirely when `kind` is `None`.
    pub fn del_event(&mut self, fd: RawFd, kind: Option<IoKind>) {
        let Some(slot) = self.fds.get_mut(&fd) else {
            return;
        };
        let (drop_read, drop_write) = match kind {
            Some(IoKind::Read) => (slot.reader.take().is_some(), false),
            Some(IoKind::Write) => (false, slot.writer.take().is_some()),
            None => (slot.reader.take().is_some(), slot.writer.take().is_some()),
        };
        if self.fds.get(&fd).map(|s| s.is_empty()).unwrap_or(false) {
            self.fds.remove(&fd);
        }
        if drop_read {
            self.kevent_ctl(fd, libc::EVFILT_READ, libc::EV_DELETE);
        }
        if drop_write {
            self.kevent_ctl(fd, libc::EVFILT_WRITE, libc::EV_DELETE);
        }
    }

    /// Block up to `ms` milliseconds. Same return contract as the epoll
    /// backend.
    pub fn wait(&mut self, ms: u32) -> i32 {
        let ts;
        let ts_ptr = if ms == WAIT_FOREVER {
            core::ptr::null()
        } else {
            ts = libc::timespec {
                tv_sec: (ms / 1000) as libc::time_t,
                tv_nsec: ((ms % 1000) * 1_000_000) as libc::c_long,
            };
            &ts as *const libc::timespec
        };

        unsafe {
            self.events.set_len(0);
        }
        let n = unsafe {
            libc::kevent(
                self.kq,
                core::ptr::null(),
                0,
                self.events.as_mut_ptr(),
                EVENT_CAPACITY as i32,
                ts_ptr,
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

    /// Resolve the `i`-th event of the last `wait` batch. An errored entry
    /// wakes both sides of its fd.
    pub fn event_at(&self, i: usize) -> MuxEvent {
        let ev = self.events[i];
        let fd = ev.ident as RawFd;
        if fd == self.pipe_rd {
            return MuxEvent {
                wake: true,
                ..MuxEvent::default()
            };
        }

        let slot = self.fds.get(&fd).copied().unwrap_or_default();
        if ev.flags & libc::EV_ERROR != 0 {
            return MuxEvent {
                wake: false,
                reader: slot.reader,
                writer: slot.writer,
            };
        }
        match ev.filter {
            libc::EVFILT_READ => MuxEvent {
                wake: false,
                reader: slot.reader,
                writer: None,
            },
            libc::EVFILT_WRITE => MuxEvent {
                wake: false,
                reader: None,
                writer: slot.writer,
            },
            _ => MuxEvent::default(),
        }
    }

    /// Drain the wake pipe after a wake event surfaced.
    pub fn drain_wake(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(self.pipe_rd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if n < buf.len() as isize {
                break;
            }
        }
    }

    pub fn registered_fds(&self) -> usize {
        self.fds.len()
    }

    fn kevent_ctl(&self, fd: RawFd, filter: i16, flags: u16) -> bool {
        let ev = libc::kevent {
            ident: fd as libc::uintptr_t,
            filter,
            flags,
            fflags: 0,
            data: 0,
            udata: core::ptr::null_mut(),
        };
        let rc = unsafe {
            libc::kevent(
                self.kq,
                &ev,
                1,
                core::ptr::null_mut(),
                0,
                core::ptr::null(),
            )
        };
        rc >= 0
    }
}

impl Drop for Mux {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.pipe_rd);
            libc::close(self.pipe_wr);
            libc::close(self.kq);
        }
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_wakes_wait() {
        let mut mux = Mux::new().unwrap();
        mux.wake_handle().signal();
        let n = mux.wait(1000);
        assert_eq!(n, 1);
        assert!(mux.event_at(0).wake);
        mux.drain_wake();
    }

    #[test]
    fn test_read_readiness_resolves_waiter() {
        let mut mux = Mux::new().unwrap();
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (rd, wr) = (fds[0], fds[1]);

        let co = CoroId::new(5);
        assert!(mux.add_event(rd, IoKind::Read, co));
        unsafe { libc::write(wr, b"x".as_ptr() as *const libc::c_void, 1) };

        let n = mux.wait(1000);
        assert_eq!(n, 1);
        assert_eq!(mux.event_at(0).reader, Some(co));

        mux.del_event(rd, None);
        assert_eq!(mux.registered_fds(), 0);
        unsafe {
            libc::close(rd);
            libc::close(wr);
        }
    }

    #[test]
    fn test_wait_timeout_returns_zero() {
        let mut mux = Mux::new().unwrap();
        assert_eq!(mux.wait(10), 0);
    }
}
