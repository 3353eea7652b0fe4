//! # costack - shared-stack coroutines
//!
//! An M:N coroutine runtime: a small fleet of scheduler threads, each
//! driving many stackful coroutines over a readiness multiplexer (epoll /
//! kqueue) with an ordered timer wheel.
//!
//! Coroutines are cheap at high fan-out because schedulers share a handful
//! of fixed stack buffers: each coroutine is pinned to one *slot* and only
//! the slot's incumbent keeps its frames live; everyone else holds a
//! byte-exact copy of just its used span.
//!
//! ## Quick start
//!
//! ```no_run
//! use costack::{go, sleep, yield_now, WaitGroup};
//!
//! fn main() {
//!     costack::init();
//!
//!     let wg = WaitGroup::new();
//!     wg.add(2);
//!
//!     let wg2 = wg.clone();
//!     go(move || {
//!         println!("hello from coroutine {}", costack::coroutine_id());
//!         yield_now();
//!         sleep(10);
//!         wg2.done();
//!     });
//!
//!     let wg2 = wg.clone();
//!     go(move || {
//!         sleep(50);
//!         wg2.done();
//!     });
//!
//!     wg.wait();
//!     costack::exit();
//! }
//! ```
//!
//! ## Threading model
//!
//! Every coroutine runs only on the scheduler thread that created it, so
//! coroutine-local state needs no locking. Between suspension points
//! (`yield_now`, `sleep`, `IoEvent::wait`, the sync primitives) a coroutine
//! runs to completion on its thread. Cross-scheduler communication goes
//! through per-scheduler inboxes with release/acquire hand-off.

// Re-export core types
pub use costack_core::{CoroId, SchedError, SchedResult};

// Re-export the logging macros and env helpers
pub use costack_core::log::{self, Level};
pub use costack_core::{codebug, coerror, coinfo, cotrace, cowarn};
pub use costack_core::{env_get, env_get_bool};

// Re-export runtime types
pub use costack_runtime::{
    all_schedulers, initialized, is_stopped, scheduler_num, CoMutex, CoMutexGuard, Config, Event,
    IoEvent, IoKind, Scheduler, WaitGroup,
};

use costack_runtime::{mgr, sched, timer};
use std::os::unix::io::RawFd;

/// Block-forever sentinel accepted by every timed wait.
pub const WAIT_FOREVER: u32 = timer::WAIT_FOREVER;

/// Initialize the fleet from library defaults plus `CO_*` environment
/// overrides. Idempotent; implied by the first `go` if never called.
pub fn init() {
    mgr::init();
}

/// Initialize the fleet with an explicit configuration. Must run before any
/// `go`; fails once a fleet exists.
pub fn init_with(cfg: Config) -> SchedResult<()> {
    mgr::init_with(cfg)
}

/// Gracefully stop the fleet: every scheduler finishes its tick, joins, and
/// no coroutine runs afterwards. Idempotent; a no-op when the
/// `disable_exit` config flag is set.
pub fn exit() {
    mgr::exit();
}

/// Dispatch `f` as a new coroutine on the next scheduler in the fleet's
/// round-robin. Safe from any thread, including inside coroutines.
pub fn go<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    mgr::go(Box::new(f));
}

/// The scheduler driving the current thread, if any.
pub fn scheduler() -> Option<&'static Scheduler> {
    sched::current()
}

fn current_sched(what: &str) -> &'static Scheduler {
    sched::current()
        .unwrap_or_else(|| panic!("{} must be called from a coroutine", what))
}

/// Suspend the current coroutine and let the scheduler run others.
///
/// Panics when called outside a coroutine.
pub fn yield_now() {
    current_sched("yield_now").yield_now();
}

/// Suspend the current coroutine for at least `ms` milliseconds. Outside a
/// coroutine this degrades to a plain thread sleep.
pub fn sleep(ms: u32) {
    match sched::current() {
        Some(s) if s.running_id().is_some() => s.sleep(ms),
        _ => std::thread::sleep(std::time::Duration::from_millis(ms as u64)),
    }
}

/// Arm a timer for the current coroutine without suspending yet; the
/// following suspension wakes after `ms` at the latest.
///
/// Panics when called outside a coroutine.
pub fn add_timer(ms: u32) {
    current_sched("add_timer").add_timer(ms);
}

/// Register I/O interest on `fd` for the current coroutine. Prefer
/// [`IoEvent`] which deregisters itself.
///
/// Panics when called outside a coroutine.
pub fn add_io_event(fd: RawFd, kind: IoKind) -> bool {
    current_sched("add_io_event").add_io_event(fd, kind)
}

/// Drop one direction of interest on `fd`.
///
/// Panics when called outside a coroutine.
pub fn del_io_event(fd: RawFd, kind: IoKind) {
    current_sched("del_io_event").del_io_event(fd, Some(kind));
}

/// Drop all interest on `fd`.
///
/// Panics when called outside a coroutine.
pub fn del_io_event_all(fd: RawFd) {
    current_sched("del_io_event_all").del_io_event(fd, None);
}

/// Whether the current coroutine's latest resume was caused by timer
/// expiry rather than readiness or a signal. Valid only immediately after
/// returning from a suspending call.
pub fn timeout() -> bool {
    sched::current().map(|s| s.timeout()).unwrap_or(false)
}

/// Whether `p` points into the current coroutine's shared-stack buffer.
///
/// Panics when called outside a coroutine.
pub fn on_stack<T>(p: *const T) -> bool {
    current_sched("on_stack").on_stack(p as *const u8)
}

/// Id of the scheduler driving the current thread, or -1.
pub fn scheduler_id() -> i32 {
    sched::current().map(|s| s.id() as i32).unwrap_or(-1)
}

/// Id of the current coroutine, or -1 outside one.
pub fn coroutine_id() -> i32 {
    sched::current()
        .and_then(|s| s.running_id())
        .map(|id| id.as_u32() as i32)
        .unwrap_or(-1)
}

/// Id of the scheduler the next `go` would dispatch to, or -1 before init.
pub fn next_scheduler_id() -> i32 {
    mgr::next_scheduler().map(|s| s.id() as i32).unwrap_or(-1)
}
