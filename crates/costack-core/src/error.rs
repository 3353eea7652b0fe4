//! Error types for the coroutine runtime

use core::fmt;

/// Result type for runtime operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors surfaced by the runtime.
///
/// Everything else the scheduler hits is either fatal (misuse of a
/// coroutine-only primitive, stack geometry corruption) or absorbed and
/// retried inside the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// The fleet was already initialized
    AlreadyInitialized,

    /// The fleet was never initialized
    NotInitialized,

    /// The fleet has been stopped
    Stopped,

    /// Invalid configuration value
    InvalidConfig(&'static str),

    /// OS error (raw errno) from the readiness multiplexer
    Mux(i32),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::AlreadyInitialized => write!(f, "scheduler fleet already initialized"),
            SchedError::NotInitialized => write!(f, "scheduler fleet not initialized"),
            SchedError::Stopped => write!(f, "scheduler fleet stopped"),
            SchedError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            SchedError::Mux(errno) => write!(f, "readiness mux error: errno {}", errno),
        }
    }
}

impl std::error::Error for SchedError {}
