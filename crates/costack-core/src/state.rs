//! Coroutine and wait-coordinator states
//!
//! Both state machines are observed across threads (timer expiry on the
//! owner thread races completion paths on peer threads), so the cells are
//! atomic and the only multi-step transitions are CAS/swap based.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoState {
    /// Runnable or running; the default state between suspensions.
    Init = 0,

    /// Suspended with a pending timeout or completion.
    Wait = 1,

    /// A completion path claimed it and queued it for resume.
    Ready = 2,

    /// Terminated, record awaiting reuse.
    Done = 3,
}

impl From<u8> for CoState {
    fn from(v: u8) -> Self {
        match v {
            0 => CoState::Init,
            1 => CoState::Wait,
            2 => CoState::Ready,
            _ => CoState::Done,
        }
    }
}

impl fmt::Display for CoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoState::Init => write!(f, "init"),
            CoState::Wait => write!(f, "wait"),
            CoState::Ready => write!(f, "ready"),
            CoState::Done => write!(f, "done"),
        }
    }
}

/// State of a wait coordinator (`Waitx`).
///
/// Starts at `Init`; exactly one of `Ready` (completion won) or `Timeout`
/// (timer expiry won) ever commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WaitState {
    Init = 0,
    Ready = 1,
    Timeout = 2,
}

impl From<u8> for WaitState {
    fn from(v: u8) -> Self {
        match v {
            0 => WaitState::Init,
            1 => WaitState::Ready,
            _ => WaitState::Timeout,
        }
    }
}

/// Atomic cell holding a [`CoState`].
///
/// The exposed operations are exactly the transitions the scheduler and the
/// synchronization primitives perform; arbitrary stores of `Ready` are not
/// provided because `Ready` may only be claimed through the CAS.
pub struct AtomicCoState(AtomicU8);

impl AtomicCoState {
    #[inline]
    pub const fn new(s: CoState) -> Self {
        AtomicCoState(AtomicU8::new(s as u8))
    }

    #[inline]
    pub fn load(&self) -> CoState {
        self.0.load(Ordering::Acquire).into()
    }

    /// Enter the `Wait` state before suspending.
    #[inline]
    pub fn set_wait(&self) {
        self.0.store(CoState::Wait as u8, Ordering::Release);
    }

    /// Reset to `Init` after a resume, or when a record is recycled back
    /// into use.
    #[inline]
    pub fn set_init(&self) {
        self.0.store(CoState::Init as u8, Ordering::Release);
    }

    /// Mark the record terminated.
    #[inline]
    pub fn set_done(&self) {
        self.0.store(CoState::Done as u8, Ordering::Release);
    }

    /// Timer-expiry claim: swap to `Init`, reporting the previous state.
    ///
    /// The coroutine is eligible for a timed-out resume iff the previous
    /// state was `Wait` (nobody else resolved the wait first) or already
    /// `Init` (a bare timed suspension with no completion path).
    #[inline]
    pub fn swap_init(&self) -> CoState {
        self.0.swap(CoState::Init as u8, Ordering::AcqRel).into()
    }

    /// Completion claim: CAS `Wait -> Ready`. Returns whether this caller
    /// won and therefore owns queueing the coroutine for resume.
    #[inline]
    pub fn wait_to_ready(&self) -> bool {
        self.0
            .compare_exchange(
                CoState::Wait as u8,
                CoState::Ready as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl fmt::Debug for AtomicCoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtomicCoState({})", self.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_init_reports_previous() {
        let s = AtomicCoState::new(CoState::Init);
        assert_eq!(s.swap_init(), CoState::Init);

        s.set_wait();
        assert_eq!(s.swap_init(), CoState::Wait);
        assert_eq!(s.load(), CoState::Init);
    }

    #[test]
    fn test_wait_to_ready_single_winner() {
        let s = AtomicCoState::new(CoState::Init);
        // Not waiting: nobody can claim it.
        assert!(!s.wait_to_ready());

        s.set_wait();
        assert!(s.wait_to_ready());
        // Second claim loses.
        assert!(!s.wait_to_ready());
        assert_eq!(s.load(), CoState::Ready);
    }

    #[test]
    fn test_ready_blocks_timeout_claim() {
        let s = AtomicCoState::new(CoState::Init);
        s.set_wait();
        assert!(s.wait_to_ready());
        // Expiry after a completion must not report Wait.
        assert_eq!(s.swap_init(), CoState::Ready);
    }
}
