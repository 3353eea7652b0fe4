//! # costack-core
//!
//! Platform-agnostic types for the costack coroutine runtime.
//!
//! This crate contains no OS-specific code. The scheduler fleet, the context
//! switch and the readiness multiplexer live in `costack-runtime`.
//!
//! ## Modules
//!
//! - `id` - coroutine identifier type
//! - `state` - coroutine and wait-coordinator state enums
//! - `waitx` - wait coordinator records and their recycling pool
//! - `error` - error types
//! - `env` - environment variable utilities
//! - `log` - leveled debug logging macros
//! - `spinlock` - internal spinlock primitive

pub mod env;
pub mod error;
pub mod id;
pub mod log;
pub mod spinlock;
pub mod state;
pub mod waitx;

// Re-exports for convenience
pub use env::{env_get, env_get_bool};
pub use error::{SchedError, SchedResult};
pub use id::CoroId;
pub use spinlock::SpinLock;
pub use state::{AtomicCoState, CoState, WaitState};
pub use waitx::{waitx_pool, Waitx, WaitxPool};
