//! Ordered timer wheel
//!
//! Absolute millisecond deadlines mapped to coroutines. Equal deadlines are
//! serviced in insertion order via a monotonically increasing sequence
//! tiebreaker, which also makes every entry's key unique — that key is the
//! cancellation handle, so nothing holds iterators or references into the
//! map and there is no ownership cycle between a coroutine and its timer.
//!
//! The wheel itself is a pure container; the expiry eligibility policy
//! (state and waitx races) belongs to the scheduler.

use costack_core::id::CoroId;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Instant;

/// Sentinel for "no deadline": block indefinitely.
pub const WAIT_FOREVER: u32 = u32::MAX;

/// Milliseconds since the process-wide monotonic epoch.
pub fn now_ms() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// Opaque handle of one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    deadline_ms: u64,
    seq: u64,
}

/// Deadline-ordered multimap of pending timers.
pub struct TimerWheel {
    entries: BTreeMap<(u64, u64), CoroId>,
    seq: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        TimerWheel {
            entries: BTreeMap::new(),
            seq: 0,
        }
    }

    /// Arm a timer for `co` at the absolute deadline. O(log n).
    pub fn add(&mut self, deadline_ms: u64, co: CoroId) -> TimerHandle {
        self.seq += 1;
        let h = TimerHandle {
            deadline_ms,
            seq: self.seq,
        };
        self.entries.insert((h.deadline_ms, h.seq), co);
        h
    }

    /// Disarm a timer. Returns whether the entry was still pending.
    pub fn cancel(&mut self, h: TimerHandle) -> bool {
        self.entries.remove(&(h.deadline_ms, h.seq)).is_some()
    }

    /// Pop every entry with `deadline <= now` into `expired`, in deadline
    /// then insertion order. Returns the delta to the next deadline as the
    /// scheduler's new wait budget, or [`WAIT_FOREVER`] if the wheel is
    /// empty.
    pub fn expire(&mut self, now_ms: u64, expired: &mut Vec<(TimerHandle, CoroId)>) -> u32 {
        while let Some((&(deadline_ms, seq), &co)) = self.entries.iter().next() {
            if deadline_ms > now_ms {
                break;
            }
            self.entries.remove(&(deadline_ms, seq));
            expired.push((TimerHandle { deadline_ms, seq }, co));
        }

        match self.entries.keys().next() {
            Some(&(deadline_ms, _)) => (deadline_ms - now_ms).min(u32::MAX as u64 - 1) as u32,
            None => WAIT_FOREVER,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        TimerWheel::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expire_in_deadline_order() {
        let mut w = TimerWheel::new();
        w.add(30, CoroId::new(3));
        w.add(10, CoroId::new(1));
        w.add(20, CoroId::new(2));

        let mut out = Vec::new();
        let next = w.expire(25, &mut out);
        let ids: Vec<u32> = out.iter().map(|(_, c)| c.as_u32()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(next, 5);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn test_equal_deadlines_fifo() {
        let mut w = TimerWheel::new();
        for i in 1..=5u32 {
            w.add(100, CoroId::new(i));
        }
        let mut out = Vec::new();
        assert_eq!(w.expire(100, &mut out), WAIT_FOREVER);
        let ids: Vec<u32> = out.iter().map(|(_, c)| c.as_u32()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_cancel() {
        let mut w = TimerWheel::new();
        let h = w.add(50, CoroId::new(1));
        assert!(w.cancel(h));
        // Already gone.
        assert!(!w.cancel(h));

        let mut out = Vec::new();
        assert_eq!(w.expire(1000, &mut out), WAIT_FOREVER);
        assert!(out.is_empty());
    }

    #[test]
    fn test_empty_wheel_waits_forever() {
        let mut w = TimerWheel::new();
        let mut out = Vec::new();
        assert_eq!(w.expire(0, &mut out), WAIT_FOREVER);
        assert!(w.is_empty());
    }

    #[test]
    fn test_nothing_due_returns_delta() {
        let mut w = TimerWheel::new();
        w.add(500, CoroId::new(1));
        let mut out = Vec::new();
        assert_eq!(w.expire(100, &mut out), 400);
        assert!(out.is_empty());
    }
}
