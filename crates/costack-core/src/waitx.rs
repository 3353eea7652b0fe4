//! Wait coordinator records
//!
//! A `Waitx` is the small atomic cell a suspended coroutine shares with
//! whichever path may wake it: a completion (event signal, lock hand-off)
//! races the scheduler's timer expiry, and exactly one of them commits.
//!
//! Records are recycled through a fixed-capacity lock-free pool. The reuse
//! contract is strict: a record must not return to the pool while its state
//! CAS is unresolved. This is enforced structurally — records are handed out
//! as `Arc`s and only a uniquely-owned record (every racer has dropped its
//! reference, so the CAS is long decided) is accepted back.

use crate::state::WaitState;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

/// Number of idle records the global pool retains.
const POOL_CAPACITY: usize = 1024;

/// A one-shot wait coordinator.
pub struct Waitx {
    state: AtomicU8,
}

impl Waitx {
    pub fn new() -> Self {
        Waitx {
            state: AtomicU8::new(WaitState::Init as u8),
        }
    }

    #[inline]
    pub fn state(&self) -> WaitState {
        self.state.load(Ordering::Acquire).into()
    }

    /// Try to commit the outcome of the wait.
    ///
    /// Only the transition out of `Init` can succeed, so at most one of
    /// `Ready` / `Timeout` ever commits. Returns whether this caller won.
    #[inline]
    pub fn commit(&self, outcome: WaitState) -> bool {
        debug_assert!(outcome != WaitState::Init);
        self.state
            .compare_exchange(
                WaitState::Init as u8,
                outcome as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn reset(&self) {
        self.state.store(WaitState::Init as u8, Ordering::Release);
    }
}

impl Default for Waitx {
    fn default() -> Self {
        Waitx::new()
    }
}

/// Fixed-capacity recycling pool of wait coordinator records.
pub struct WaitxPool {
    idle: ArrayQueue<Arc<Waitx>>,
}

impl WaitxPool {
    pub fn new(capacity: usize) -> Self {
        WaitxPool {
            idle: ArrayQueue::new(capacity),
        }
    }

    /// Take a record in the `Init` state, reusing an idle one if available.
    pub fn take(&self) -> Arc<Waitx> {
        match self.idle.pop() {
            Some(w) => {
                w.reset();
                w
            }
            None => Arc::new(Waitx::new()),
        }
    }

    /// Return a record to the pool.
    ///
    /// Accepted only when `w` is the last reference; otherwise some racer
    /// still holds the record and it is simply dropped once they finish.
    pub fn put(&self, w: Arc<Waitx>) {
        if let Ok(w) = Arc::try_unwrap(w) {
            // Full pool: let the allocator have it.
            let _ = self.idle.push(Arc::new(w));
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }
}

/// Process-wide record pool shared by all synchronization primitives.
pub fn waitx_pool() -> &'static WaitxPool {
    static POOL: OnceLock<WaitxPool> = OnceLock::new();
    POOL.get_or_init(|| WaitxPool::new(POOL_CAPACITY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_single_outcome() {
        let w = Waitx::new();
        assert_eq!(w.state(), WaitState::Init);

        assert!(w.commit(WaitState::Ready));
        assert!(!w.commit(WaitState::Timeout));
        assert_eq!(w.state(), WaitState::Ready);
    }

    #[test]
    fn test_commit_timeout_blocks_ready() {
        let w = Waitx::new();
        assert!(w.commit(WaitState::Timeout));
        assert!(!w.commit(WaitState::Ready));
        assert_eq!(w.state(), WaitState::Timeout);
    }

    #[test]
    fn test_pool_reuse_resets_state() {
        let pool = WaitxPool::new(4);
        let w = pool.take();
        assert!(w.commit(WaitState::Ready));
        pool.put(w);
        assert_eq!(pool.idle_count(), 1);

        let w = pool.take();
        assert_eq!(w.state(), WaitState::Init);
    }

    #[test]
    fn test_pool_rejects_shared_record() {
        let pool = WaitxPool::new(4);
        let w = pool.take();
        let racer = Arc::clone(&w);
        pool.put(w);
        // The racer still holds it, so nothing was recycled.
        assert_eq!(pool.idle_count(), 0);
        drop(racer);
    }

    #[test]
    fn test_concurrent_commit_exactly_one_winner() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::thread;

        for _ in 0..100 {
            let w = Arc::new(Waitx::new());
            let wins = Arc::new(AtomicUsize::new(0));

            let mut handles = vec![];
            for outcome in [WaitState::Ready, WaitState::Timeout] {
                let w = Arc::clone(&w);
                let wins = Arc::clone(&wins);
                handles.push(thread::spawn(move || {
                    if w.commit(outcome) {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                }));
            }
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(wins.load(Ordering::Relaxed), 1);
        }
    }
}
