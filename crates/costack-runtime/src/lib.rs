//! # costack-runtime
//!
//! The M:N coroutine runtime behind the `costack` facade:
//!
//! - a fleet of scheduler threads, each driving many stackful coroutines
//!   over a non-blocking readiness multiplexer (epoll / kqueue)
//! - shared-stack memory model: coroutines pinned to the same slot share one
//!   buffer, suspended ones hold byte-exact copies of their live frames
//! - an ordered timer wheel with cancellation and wake-on-resume
//! - an MPSC task inbox for hand-off from external threads and peer
//!   schedulers
//!
//! Context switching is hand-written assembly per architecture, symmetric
//! transfer style: a jump suspends the current execution, enters the target
//! context and carries a one-word payload.

pub mod config;
pub mod context;
pub mod copool;
pub mod inbox;
pub mod io;
pub mod mgr;
pub mod mux;
pub mod sched;
pub mod stack;
pub mod sync;
pub mod timer;

mod arch;

// Re-exports
pub use config::Config;
pub use io::{IoEvent, IoKind};
pub use mgr::{all_schedulers, exit, go, init, init_with, initialized, is_stopped, scheduler_num};
pub use sched::Scheduler;
pub use sync::{CoMutex, CoMutexGuard, Event, WaitGroup};

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub(crate) use arch::x86_64 as current_arch;
    } else if #[cfg(target_arch = "aarch64")] {
        pub(crate) use arch::aarch64 as current_arch;
    } else {
        compile_error!("Unsupported architecture: costack needs x86_64 or aarch64");
    }
}

#[cfg(not(unix))]
compile_error!("Unsupported platform: costack needs epoll (Linux) or kqueue (BSD/macOS)");
