//! Per-thread scheduler
//!
//! Each scheduler owns a coroutine pool, the shared stack slots, a timer
//! wheel, a readiness mux and a task inbox, and runs a cooperative event
//! loop over them. Per tick, strictly in this order: surfaced I/O events,
//! then drained inbox tasks, then expired timers. The fixed order makes a
//! single scheduler's interleaving deterministic.
//!
//! All of `SchedInner` is owned by the scheduler's thread. Peers only touch
//! the inbox, the stop flag, the wake handle and the atomic coroutine
//! states, so the interior is an `UnsafeCell` with owner-thread accessors
//! rather than a lock.

use crate::config::Config;
use crate::context::{self, RawCtx};
use crate::copool::{CoroPool, TaskFn};
use crate::inbox::TaskInbox;
use crate::mux::{IoKind, Mux, MuxEvent, WakeHandle};
use crate::stack::StackSlot;
use crate::timer::{now_ms, TimerHandle, TimerWheel, WAIT_FOREVER};
use costack_core::id::CoroId;
use costack_core::state::{CoState, WaitState};
use costack_core::waitx::Waitx;
use costack_core::{codebug, coerror, cotrace};
use std::cell::{Cell, UnsafeCell};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

thread_local! {
    /// The scheduler driving this thread, set on loop entry and cleared on
    /// exit. Null on every non-scheduler thread.
    static CURRENT_SCHED: Cell<*const Scheduler> = const { Cell::new(core::ptr::null()) };
}

/// The scheduler running the current thread, if any.
///
/// The returned reference is valid for the fleet's lifetime; schedulers are
/// created at fleet init and never destroyed before process exit.
#[inline]
pub fn current() -> Option<&'static Scheduler> {
    let p = CURRENT_SCHED.with(|c| c.get());
    if p.is_null() {
        None
    } else {
        Some(unsafe { &*p })
    }
}

/// State owned exclusively by the scheduler's thread.
struct SchedInner {
    pool: CoroPool,
    slots: Vec<StackSlot>,
    wheel: TimerWheel,
    mux: Mux,
    /// Currently executing coroutine, None between resumes.
    running: Option<CoroId>,
    /// Wait budget for the next mux wait.
    wait_ms: u32,
    /// Set only while resuming timed-out coroutines.
    timeout: bool,
    /// Round-robin cursor for slot pinning.
    next_sid: usize,
}

/// One scheduler: an OS thread running a cooperative event loop.
pub struct Scheduler {
    id: u32,
    stack_size: usize,
    inbox: TaskInbox,
    wake: WakeHandle,
    stop: AtomicBool,
    inner: UnsafeCell<SchedInner>,
}

// Safety: SchedInner is only touched from the owning thread (enforced by
// every accessor going through owner-thread entry points); the shared
// surface (inbox, wake, stop, atomic states) is thread-safe on its own.
unsafe impl Send for Scheduler {}
unsafe impl Sync for Scheduler {}

impl Scheduler {
    pub(crate) fn new(id: u32, cfg: &Config) -> costack_core::SchedResult<Self> {
        let mux = Mux::new()?;
        let wake = mux.wake_handle();
        let mut slots = Vec::with_capacity(cfg.stack_slots);
        for _ in 0..cfg.stack_slots {
            slots.push(StackSlot::new());
        }
        Ok(Scheduler {
            id,
            stack_size: cfg.stack_size,
            inbox: TaskInbox::new(),
            wake,
            stop: AtomicBool::new(false),
            inner: UnsafeCell::new(SchedInner {
                pool: CoroPool::new(id),
                slots,
                wheel: TimerWheel::new(),
                mux,
                running: None,
                wait_ms: WAIT_FOREVER,
                timeout: false,
                next_sid: 0,
            }),
        })
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Owner-thread access to the interior.
    ///
    /// # Safety
    ///
    /// Must only be called from this scheduler's thread (loop, coroutine
    /// code, or before the thread is spawned). Callers must not let the
    /// borrow live across a context switch.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    unsafe fn inner(&self) -> &mut SchedInner {
        &mut *self.inner.get()
    }

    // ------------------------------------------------------------------
    // Cross-thread surface
    // ------------------------------------------------------------------

    /// Hand a new closure to this scheduler. Safe from any thread; silently
    /// dropped when the fleet is shutting down.
    pub fn post_task(&self, cb: TaskFn) {
        if self.is_stopped() {
            return;
        }
        self.inbox.push_new(cb);
        self.wake.signal();
    }

    /// Queue an already-created coroutine of this scheduler for resume.
    /// Safe from any thread.
    pub fn post_ready(&self, co: CoroId) {
        if self.is_stopped() {
            return;
        }
        self.inbox.push_ready(co);
        self.wake.signal();
    }

    /// Ask the loop to terminate and interrupt a blocked wait.
    pub fn stop(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            self.wake.signal();
        }
    }

    // ------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------

    /// Run the event loop until stopped. Called once, on the scheduler's
    /// dedicated thread.
    pub fn run(&self) {
        CURRENT_SCHED.with(|c| c.set(self as *const Scheduler));
        codebug!("sched-{} loop running", self.id);

        let mut new_tasks: Vec<TaskFn> = Vec::new();
        let mut ready_tasks: Vec<CoroId> = Vec::new();
        let mut expired: Vec<(TimerHandle, CoroId)> = Vec::new();
        let mut timed_out: Vec<CoroId> = Vec::new();
        let mut events: Vec<MuxEvent> = Vec::new();

        while !self.is_stopped() {
            let n = {
                let inner = unsafe { self.inner() };
                let ms = inner.wait_ms;
                inner.mux.wait(ms)
            };
            if self.is_stopped() {
                break;
            }
            if n < 0 {
                coerror!(
                    "sched-{} mux wait error: {}",
                    self.id,
                    std::io::Error::last_os_error()
                );
                continue;
            }

            // 1. I/O readiness, in the order the mux surfaced it.
            events.clear();
            {
                let inner = unsafe { self.inner() };
                for i in 0..n as usize {
                    events.push(inner.mux.event_at(i));
                }
            }
            for ev in &events {
                if ev.wake {
                    unsafe { self.inner() }.mux.drain_wake();
                    continue;
                }
                if let Some(co) = ev.reader {
                    self.resume(co);
                }
                if let Some(co) = ev.writer {
                    self.resume(co);
                }
            }

            // 2. Task intake: new closures become coroutines, ready ones
            // resume where they left off.
            self.inbox.drain(&mut new_tasks, &mut ready_tasks);
            if !new_tasks.is_empty() {
                cotrace!("sched-{} intake: {} new tasks", self.id, new_tasks.len());
            }
            for cb in new_tasks.drain(..) {
                let id = self.new_coroutine(cb);
                self.resume(id);
            }
            for id in ready_tasks.drain(..) {
                self.resume(id);
            }

            // 3. Timers, with the timeout flag visible to the coroutines
            // being woken.
            let next_wait = self.check_timeout(&mut expired, &mut timed_out);
            unsafe { self.inner() }.wait_ms = next_wait;
            if !timed_out.is_empty() {
                cotrace!("sched-{} resuming {} timed out", self.id, timed_out.len());
                unsafe { self.inner() }.timeout = true;
                for id in timed_out.drain(..) {
                    self.resume(id);
                }
                unsafe { self.inner() }.timeout = false;
            }

            unsafe { self.inner() }.running = None;
        }

        // Teardown: nothing resumes after this point, release the stack
        // buffers with the loop.
        unsafe { self.inner() }.slots.clear();
        codebug!("sched-{} loop stopped", self.id);
        CURRENT_SCHED.with(|c| c.set(core::ptr::null()));
    }

    fn new_coroutine(&self, cb: TaskFn) -> CoroId {
        let inner = unsafe { self.inner() };
        let sid = inner.next_sid;
        inner.next_sid = (inner.next_sid + 1) % inner.slots.len();
        inner.pool.alloc(cb, sid as u8, self.id)
    }

    /// Resume `id`: first resume builds a fresh context on its slot,
    /// continuation restores the saved stack bytes if the slot is held by
    /// someone else. Returns when the coroutine yields or terminates.
    fn resume(&self, id: CoroId) {
        let (target_ctx, main_marker) = {
            let inner = unsafe { self.inner() };
            let SchedInner {
                ref mut pool,
                ref mut slots,
                ref mut wheel,
                ref mut running,
                ..
            } = *inner;

            let (first, sid) = match pool.get(id) {
                Some(co) if co.state.load() != CoState::Done => {
                    debug_assert_eq!(co.owner, self.id, "coroutines never migrate");
                    (co.ctx.is_null(), co.sid as usize)
                }
                // Recycled or unknown: a stale hand-off, nothing to do.
                _ => return,
            };
            *running = Some(id);

            if !first {
                // Remove the timer before the coroutine runs again.
                if let Some(h) = pool.get_mut(id).unwrap().timer.take() {
                    wheel.cancel(h);
                }
            }

            let slot = &mut slots[sid];
            slot.ensure(self.stack_size);

            if slot.holder != Some(id) {
                if let Some(holder) = slot.holder {
                    // A recycled holder id may have been reused on another
                    // slot; only a record still pinned here has live bytes
                    // worth saving.
                    if let Some(incumbent) = pool.get_mut(holder) {
                        if incumbent.sid as usize == sid {
                            slot.save(incumbent);
                        }
                    }
                }
                if !first {
                    slot.restore(pool.get(id).unwrap());
                }
                slot.holder = Some(id);
            }

            let ctx = if first {
                cotrace!("sched-{} first resume of co {} on slot {}", self.id, id, sid);
                let ctx = unsafe { context::init_stack(slot.base(), slot.size(), co_main) };
                pool.get_mut(id).unwrap().ctx = ctx;
                ctx
            } else {
                cotrace!("sched-{} resume co {} on slot {}", self.id, id, sid);
                pool.get(id).unwrap().ctx
            };
            (ctx, pool.record_ptr(CoroId::MAIN) as *mut u8)
        };

        // No interior borrows may live across the switch; coroutine code on
        // the other side re-enters this scheduler's accessors.
        let t = unsafe { context::switch_ctx(target_ctx, main_marker) };

        let inner = unsafe { self.inner() };
        if t.data.is_null() {
            // Terminated. The slot keeps it as incumbent; its bytes stay
            // live on the buffer until another coroutine claims it.
            cotrace!("sched-{} co {} done", self.id, id);
            inner.pool.recycle(id);
        } else {
            debug_assert_eq!(t.data as *const _, inner.pool.record_ptr(id) as *const _);
            inner.pool.get_mut(id).unwrap().ctx = t.ctx;
            cotrace!("sched-{} co {} yielded", self.id, id);
        }
    }

    /// Expire due timers and apply the wake-eligibility policy. Returns the
    /// next wait budget.
    fn check_timeout(
        &self,
        expired: &mut Vec<(TimerHandle, CoroId)>,
        out: &mut Vec<CoroId>,
    ) -> u32 {
        let inner = unsafe { self.inner() };
        let SchedInner {
            ref mut pool,
            ref mut wheel,
            ..
        } = *inner;

        let next = wheel.expire(now_ms(), expired);
        for (h, id) in expired.drain(..) {
            let Some(co) = pool.get_mut(id) else { continue };
            if co.timer == Some(h) {
                co.timer = None;
            }
            match &co.waitx {
                // External wait: the timeout must win the coordinator race
                // to own the resume.
                Some(w) => {
                    if w.commit(WaitState::Timeout) {
                        out.push(id);
                    }
                }
                // Internal sleep or bare timed suspension: eligible unless
                // a completion path already claimed the coroutine.
                None => {
                    if co.state.load() == CoState::Init
                        || co.state.swap_init() == CoState::Wait
                    {
                        out.push(id);
                    }
                }
            }
        }
        next
    }

    // ------------------------------------------------------------------
    // Coroutine-side primitives (owner thread, inside a coroutine)
    // ------------------------------------------------------------------

    /// The currently executing coroutine.
    #[inline]
    pub fn running_id(&self) -> Option<CoroId> {
        unsafe { self.inner() }.running
    }

    /// Suspend the running coroutine and requeue it behind everything
    /// already in the inbox, so every other pending task gets a turn first.
    pub fn yield_now(&self) {
        let id = {
            let inner = unsafe { self.inner() };
            inner.running.expect("yield_now must be called in a coroutine")
        };
        // Queue the resume before suspending. Safe on this single thread:
        // the loop cannot drain the inbox until the switch below hands
        // control back to it, by which point the context is saved.
        self.post_ready(id);
        self.suspend();
    }

    /// Suspend the running coroutine without requeueing it. The caller must
    /// have armed a wake source (timer, fd interest, wait coordinator)
    /// first, or the coroutine never runs again. Returns when the scheduler
    /// resumes the coroutine.
    pub(crate) fn suspend(&self) {
        let (main_ctx, self_marker) = {
            let inner = unsafe { self.inner() };
            let id = inner.running.expect("suspend must be called in a coroutine");
            let marker = inner.pool.record_ptr(id) as *mut u8;
            (inner.pool.get(CoroId::MAIN).unwrap().ctx, marker)
        };

        let t = unsafe { context::switch_ctx(main_ctx, self_marker) };

        // Back from suspension: re-publish the scheduler's fresh context
        // for the next yield before user code continues.
        let inner = unsafe { self.inner() };
        debug_assert_eq!(
            t.data as *const _,
            inner.pool.record_ptr(CoroId::MAIN) as *const _
        );
        inner.pool.get_mut(CoroId::MAIN).unwrap().ctx = t.ctx;
    }

    /// Arm a timer for the running coroutine. The handle is cleared by
    /// whoever resolves the wait: the resumer on wake, expiry on timeout.
    pub fn add_timer(&self, ms: u32) {
        let inner = unsafe { self.inner() };
        let id = inner.running.expect("add_timer must be called in a coroutine");
        let h = inner.wheel.add(now_ms() + ms as u64, id);
        let co = inner.pool.get_mut(id).unwrap();
        debug_assert!(co.timer.is_none(), "coroutine already has a live timer");
        co.timer = Some(h);
        co.state.set_wait();
        // Timers armed after this tick's expiry pass would otherwise be
        // invisible to the next wait budget.
        if inner.wait_ms > ms {
            inner.wait_ms = ms;
        }
        cotrace!("sched-{} co {} armed timer for {} ms", self.id, id, ms);
    }

    /// Suspend the running coroutine for at least `ms` milliseconds (or
    /// until something else readies it first; check [`Scheduler::timeout`]).
    pub fn sleep(&self, ms: u32) {
        self.add_timer(ms);
        self.suspend();
        let inner = unsafe { self.inner() };
        let id = inner.running.expect("woke without a running coroutine");
        inner.pool.get(id).unwrap().state.set_init();
    }

    /// Register I/O interest for the running coroutine.
    pub fn add_io_event(&self, fd: RawFd, kind: IoKind) -> bool {
        let inner = unsafe { self.inner() };
        let id = inner
            .running
            .expect("add_io_event must be called in a coroutine");
        inner.mux.add_event(fd, kind, id)
    }

    /// Drop I/O interest; `kind = None` drops both directions.
    pub fn del_io_event(&self, fd: RawFd, kind: Option<IoKind>) {
        let inner = unsafe { self.inner() };
        inner.mux.del_event(fd, kind);
    }

    /// Whether the current resume was caused by timer expiry. Valid only
    /// immediately after returning from a suspending call.
    #[inline]
    pub fn timeout(&self) -> bool {
        unsafe { self.inner() }.timeout
    }

    /// Whether `p` points into the running coroutine's shared-stack buffer.
    pub fn on_stack(&self, p: *const u8) -> bool {
        let inner = unsafe { self.inner() };
        let id = inner.running.expect("on_stack must be called in a coroutine");
        let sid = inner.pool.get(id).unwrap().sid as usize;
        inner.slots[sid].contains(p)
    }

    /// Attach a wait coordinator to the running coroutine before a yield.
    pub(crate) fn bind_waitx(&self, w: Arc<Waitx>) {
        let inner = unsafe { self.inner() };
        let id = inner.running.expect("bind_waitx must be called in a coroutine");
        let co = inner.pool.get_mut(id).unwrap();
        debug_assert!(co.waitx.is_none());
        co.waitx = Some(w);
    }

    /// Detach the running coroutine's wait coordinator after the wait
    /// resolved, and reset its state to runnable.
    pub(crate) fn clear_waitx(&self) -> Option<Arc<Waitx>> {
        let inner = unsafe { self.inner() };
        let id = inner.running.expect("clear_waitx must be called in a coroutine");
        let co = inner.pool.get_mut(id).unwrap();
        co.state.set_init();
        co.waitx.take()
    }

    /// Live coroutine count, for introspection and tests.
    pub fn live_coroutines(&self) -> usize {
        unsafe { self.inner() }.pool.live_count()
    }
}

/// Trampoline every coroutine starts in: publish the scheduler's context,
/// run the user closure, then jump back with a null payload so the
/// scheduler recycles the record.
extern "C" fn co_main(from: RawCtx, _main_marker: *mut u8) {
    let sched = current().expect("coroutine entry without a scheduler thread");

    let cb = {
        let inner = unsafe { sched.inner() };
        inner.pool.get_mut(CoroId::MAIN).unwrap().ctx = from;
        let id = inner.running.expect("coroutine entry without a running id");
        inner
            .pool
            .get_mut(id)
            .unwrap()
            .cb
            .take()
            .expect("first resume without a closure")
    };

    cb();

    let main_ctx = {
        let inner = unsafe { sched.inner() };
        inner.pool.get(CoroId::MAIN).unwrap().ctx
    };
    unsafe {
        context::switch_ctx(main_ctx, core::ptr::null_mut());
    }
    unreachable!("terminated coroutine was resumed");
}
