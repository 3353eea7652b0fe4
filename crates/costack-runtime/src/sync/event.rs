//! Event and WaitGroup
//!
//! `Event` is a multi-waiter signal. Coroutine waiters suspend on their
//! scheduler with a pooled `Waitx`; plain threads fall back to a condvar.
//! A signal is sticky until consumed by a successful wait, so a waiter that
//! arrives just after the signal still passes.

use crate::mgr::scheduler_by_id;
use crate::sched;
use crate::timer::WAIT_FOREVER;
use costack_core::id::CoroId;
use costack_core::state::WaitState;
use costack_core::waitx::{waitx_pool, Waitx};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

struct CoWaiter {
    owner: u32,
    id: CoroId,
    w: Arc<Waitx>,
}

struct EventState {
    signaled: bool,
    thread_waiters: u32,
    co_waiters: Vec<CoWaiter>,
}

struct EventInner {
    st: Mutex<EventState>,
    cond: Condvar,
}

/// Multi-waiter signal usable from coroutines and plain threads.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub fn new() -> Self {
        Event {
            inner: Arc::new(EventInner {
                st: Mutex::new(EventState {
                    signaled: false,
                    thread_waiters: 0,
                    co_waiters: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Wait until signaled.
    pub fn wait(&self) {
        self.wait_timeout(WAIT_FOREVER);
    }

    /// Wait until signaled or until `ms` elapse. Returns false on timeout.
    pub fn wait_timeout(&self, ms: u32) -> bool {
        match sched::current() {
            Some(s) if s.running_id().is_some() => self.wait_in_coroutine(s, ms),
            _ => self.wait_in_thread(ms),
        }
    }

    fn wait_in_coroutine(&self, s: &sched::Scheduler, ms: u32) -> bool {
        let id = s.running_id().unwrap();
        {
            let mut st = self.inner.st.lock().unwrap();
            if st.signaled {
                if st.thread_waiters == 0 {
                    st.signaled = false;
                }
                return true;
            }
            let w = waitx_pool().take();
            st.co_waiters.push(CoWaiter {
                owner: s.id(),
                id,
                w: Arc::clone(&w),
            });
            s.bind_waitx(w);
        }

        if ms != WAIT_FOREVER {
            s.add_timer(ms);
        }
        s.suspend();

        let timed_out = s.timeout();
        if timed_out {
            // Nobody signaled us; withdraw from the waiter list (unless a
            // late signal already drained it and lost the CAS).
            let mut st = self.inner.st.lock().unwrap();
            st.co_waiters.retain(|cw| !(cw.id == id && cw.owner == s.id()));
        }
        if let Some(w) = s.clear_waitx() {
            debug_assert!(w.state() != WaitState::Init);
            waitx_pool().put(w);
        }
        !timed_out
    }

    fn wait_in_thread(&self, ms: u32) -> bool {
        let mut st = self.inner.st.lock().unwrap();
        if !st.signaled {
            st.thread_waiters += 1;
            if ms == WAIT_FOREVER {
                while !st.signaled {
                    st = self.inner.cond.wait(st).unwrap();
                }
            } else {
                let deadline = std::time::Instant::now() + Duration::from_millis(ms as u64);
                while !st.signaled {
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _) = self
                        .inner
                        .cond
                        .wait_timeout(st, deadline - now)
                        .unwrap();
                    st = guard;
                }
            }
            st.thread_waiters -= 1;
            if !st.signaled {
                return false;
            }
        }
        if st.thread_waiters == 0 {
            st.signaled = false;
        }
        true
    }

    /// Wake every current waiter and leave the event signaled for the next
    /// one to consume.
    pub fn signal(&self) {
        let waiters = {
            let mut st = self.inner.st.lock().unwrap();
            st.signaled = true;
            if st.thread_waiters > 0 {
                self.inner.cond.notify_all();
            }
            core::mem::take(&mut st.co_waiters)
        };

        for cw in waiters {
            // The timer may have won this race; then the waiter already
            // resumed and will withdraw itself. The loser only drops its
            // reference so the record can recycle.
            if cw.w.commit(WaitState::Ready) {
                if let Some(s) = scheduler_by_id(cw.owner) {
                    s.post_ready(cw.id);
                }
            }
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Event::new()
    }
}

/// Counter that releases waiters when it reaches zero.
#[derive(Clone)]
pub struct WaitGroup {
    inner: Arc<WgInner>,
}

struct WgInner {
    count: std::sync::atomic::AtomicU32,
    ev: Event,
}

impl WaitGroup {
    pub fn new() -> Self {
        WaitGroup {
            inner: Arc::new(WgInner {
                count: std::sync::atomic::AtomicU32::new(0),
                ev: Event::new(),
            }),
        }
    }

    /// Add `n` to the counter.
    pub fn add(&self, n: u32) {
        self.inner
            .count
            .fetch_add(n, std::sync::atomic::Ordering::AcqRel);
    }

    /// Decrement the counter; the transition to zero signals the waiters.
    pub fn done(&self) {
        let prev = self
            .inner
            .count
            .fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
        assert!(prev > 0, "WaitGroup::done without a matching add");
        if prev == 1 {
            self.inner.ev.signal();
        }
    }

    /// Block until the counter reaches zero.
    pub fn wait(&self) {
        if self.inner.count.load(std::sync::atomic::Ordering::Acquire) == 0 {
            return;
        }
        self.inner.ev.wait();
    }

    pub fn count(&self) -> u32 {
        self.inner.count.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        WaitGroup::new()
    }
}
