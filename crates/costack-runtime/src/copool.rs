//! Coroutine records and their index-allocated pool

use crate::context::RawCtx;
use crate::timer::TimerHandle;
use costack_core::id::CoroId;
use costack_core::state::{AtomicCoState, CoState};
use costack_core::waitx::Waitx;
use std::sync::Arc;

/// A queued unit of work: the user closure a new coroutine will run.
pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// One cooperative execution unit.
///
/// Owned by the scheduler that created it and touched only from that
/// scheduler's thread, except for `state` (raced by completion paths on
/// peer threads) and the `Waitx` behind `waitx` (raced by design).
pub struct Coroutine {
    /// Dense id; 0 is the scheduler's main context.
    pub id: CoroId,

    /// Shared-stack slot this coroutine is pinned to, fixed at creation.
    pub sid: u8,

    /// Id of the owning scheduler. A coroutine never migrates.
    pub owner: u32,

    /// Saved execution context; null iff the coroutine has never run.
    pub ctx: RawCtx,

    /// User closure, consumed on first resume.
    pub cb: Option<TaskFn>,

    /// This coroutine's portion of its shared stack while another coroutine
    /// occupies the slot. Empty before the first suspension.
    pub saved: Vec<u8>,

    /// Live timer, present iff the coroutine is blocked on a timeout.
    pub timer: Option<TimerHandle>,

    /// Lifecycle state; atomic because peers and expiry observe it.
    pub state: AtomicCoState,

    /// Wait coordinator for the current external wait, if any.
    pub waitx: Option<Arc<Waitx>>,
}

impl Coroutine {
    fn new(id: CoroId, owner: u32) -> Self {
        Coroutine {
            id,
            sid: 0,
            owner,
            ctx: RawCtx::NULL,
            cb: None,
            saved: Vec::new(),
            timer: None,
            state: AtomicCoState::new(CoState::Init),
            waitx: None,
        }
    }
}

/// Dense pool of coroutine records with free-list reuse.
///
/// Index 0 is permanently reserved for the scheduler's main context. The
/// pool lives on the owning scheduler's thread only.
pub struct CoroPool {
    records: Vec<Box<Coroutine>>,
    free: Vec<u32>,
}

impl CoroPool {
    /// Create a pool holding only the main-context record.
    pub fn new(owner: u32) -> Self {
        CoroPool {
            records: vec![Box::new(Coroutine::new(CoroId::MAIN, owner))],
            free: Vec::new(),
        }
    }

    /// Allocate a record for a fresh coroutine. O(1).
    pub fn alloc(&mut self, cb: TaskFn, sid: u8, owner: u32) -> CoroId {
        match self.free.pop() {
            Some(idx) => {
                let co = &mut self.records[idx as usize];
                co.sid = sid;
                co.owner = owner;
                co.ctx = RawCtx::NULL;
                co.cb = Some(cb);
                co.saved.clear();
                co.timer = None;
                co.state.set_init();
                co.waitx = None;
                co.id
            }
            None => {
                let id = CoroId::new(self.records.len() as u32);
                let mut co = Box::new(Coroutine::new(id, owner));
                co.sid = sid;
                co.cb = Some(cb);
                self.records.push(co);
                id
            }
        }
    }

    /// Return a terminated coroutine's id for reuse.
    pub fn recycle(&mut self, id: CoroId) {
        debug_assert!(!id.is_main());
        let Some(co) = self.records.get_mut(id.as_usize()) else {
            return;
        };
        co.state.set_done();
        co.cb = None;
        co.ctx = RawCtx::NULL;
        co.saved.clear();
        co.timer = None;
        co.waitx = None;
        self.free.push(id.as_u32());
    }

    #[inline]
    pub fn get(&self, id: CoroId) -> Option<&Coroutine> {
        self.records.get(id.as_usize()).map(|b| &**b)
    }

    #[inline]
    pub fn get_mut(&mut self, id: CoroId) -> Option<&mut Coroutine> {
        self.records.get_mut(id.as_usize()).map(|b| &mut **b)
    }

    /// Stable address of a record, used as a switch payload marker.
    #[inline]
    pub fn record_ptr(&mut self, id: CoroId) -> *mut Coroutine {
        match self.records.get_mut(id.as_usize()) {
            Some(b) => &mut **b as *mut Coroutine,
            None => core::ptr::null_mut(),
        }
    }

    /// Number of live (non-recycled) coroutines, main context excluded.
    pub fn live_count(&self) -> usize {
        self.records.len() - 1 - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> TaskFn {
        Box::new(|| {})
    }

    #[test]
    fn test_main_reserved() {
        let pool = CoroPool::new(0);
        let main = pool.get(CoroId::MAIN).unwrap();
        assert!(main.id.is_main());
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn test_alloc_sequential_ids() {
        let mut pool = CoroPool::new(0);
        let a = pool.alloc(noop(), 0, 0);
        let b = pool.alloc(noop(), 1, 0);
        assert_eq!(a.as_u32(), 1);
        assert_eq!(b.as_u32(), 2);
        assert_eq!(pool.get(b).unwrap().sid, 1);
        assert_eq!(pool.live_count(), 2);
    }

    #[test]
    fn test_recycle_reuses_id() {
        let mut pool = CoroPool::new(0);
        let a = pool.alloc(noop(), 0, 0);
        let _b = pool.alloc(noop(), 1, 0);

        pool.recycle(a);
        assert_eq!(pool.get(a).unwrap().state.load(), CoState::Done);

        let c = pool.alloc(noop(), 3, 0);
        assert_eq!(c, a);
        let co = pool.get(c).unwrap();
        assert_eq!(co.state.load(), CoState::Init);
        assert!(co.ctx.is_null());
        assert!(co.saved.is_empty());
        assert_eq!(co.sid, 3);
    }

    #[test]
    fn test_lookup_bounds_checked() {
        let pool = CoroPool::new(0);
        assert!(pool.get(CoroId::new(99)).is_none());
    }
}
