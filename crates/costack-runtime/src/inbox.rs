//! Task inbox
//!
//! The MPSC hand-off queue of a scheduler: external threads and peer
//! schedulers push new closures and already-created ready coroutines; only
//! the owning scheduler drains. Pushers are responsible for signalling the
//! owner's mux afterwards, since it may be blocked in `wait`.

use crate::copool::TaskFn;
use costack_core::id::CoroId;
use costack_core::spinlock::SpinLock;

#[derive(Default)]
struct Lists {
    new_tasks: Vec<TaskFn>,
    ready_tasks: Vec<CoroId>,
}

/// MPSC inbox of new closures and ready coroutines.
pub struct TaskInbox {
    lists: SpinLock<Lists>,
}

impl TaskInbox {
    pub fn new() -> Self {
        TaskInbox {
            lists: SpinLock::new(Lists::default()),
        }
    }

    /// Queue a closure for coroutine creation. Thread-safe.
    pub fn push_new(&self, cb: TaskFn) {
        self.lists.lock().new_tasks.push(cb);
    }

    /// Queue an existing coroutine for resume. Thread-safe.
    pub fn push_ready(&self, co: CoroId) {
        self.lists.lock().ready_tasks.push(co);
    }

    /// Move everything queued so far into the output vectors, preserving
    /// push order. Called only by the owning scheduler; `out_new` and
    /// `out_ready` must be empty so their capacity is recycled across
    /// ticks.
    pub fn drain(&self, out_new: &mut Vec<TaskFn>, out_ready: &mut Vec<CoroId>) {
        debug_assert!(out_new.is_empty() && out_ready.is_empty());
        let mut lists = self.lists.lock();
        core::mem::swap(&mut lists.new_tasks, out_new);
        core::mem::swap(&mut lists.ready_tasks, out_ready);
    }

    /// Whether anything is pending. Racy by nature; used for introspection
    /// only.
    pub fn is_empty(&self) -> bool {
        let lists = self.lists.lock();
        lists.new_tasks.is_empty() && lists.ready_tasks.is_empty()
    }
}

impl Default for TaskInbox {
    fn default() -> Self {
        TaskInbox::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_drain_preserves_order() {
        let inbox = TaskInbox::new();
        for i in 1..=4 {
            inbox.push_ready(CoroId::new(i));
        }
        let mut new_tasks = Vec::new();
        let mut ready = Vec::new();
        inbox.drain(&mut new_tasks, &mut ready);
        let ids: Vec<u32> = ready.iter().map(|c| c.as_u32()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_drain_swaps_capacity_back() {
        let inbox = TaskInbox::new();
        inbox.push_ready(CoroId::new(1));
        let mut new_tasks = Vec::with_capacity(64);
        let mut ready = Vec::with_capacity(64);
        inbox.drain(&mut new_tasks, &mut ready);
        assert_eq!(ready.len(), 1);
        // The inbox now holds the pre-sized vectors.
        ready.clear();
        inbox.drain(&mut new_tasks, &mut ready);
        assert!(ready.is_empty());
    }

    #[test]
    fn test_concurrent_pushes_all_arrive() {
        let inbox = Arc::new(TaskInbox::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for t in 0..4u32 {
            let inbox = Arc::clone(&inbox);
            let ran = Arc::clone(&ran);
            handles.push(thread::spawn(move || {
                for i in 0..100u32 {
                    let ran = Arc::clone(&ran);
                    inbox.push_new(Box::new(move || {
                        ran.fetch_add(1, Ordering::Relaxed);
                    }));
                    inbox.push_ready(CoroId::new(t * 100 + i + 1));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let mut new_tasks = Vec::new();
        let mut ready = Vec::new();
        inbox.drain(&mut new_tasks, &mut ready);
        assert_eq!(new_tasks.len(), 400);
        assert_eq!(ready.len(), 400);
        for cb in new_tasks {
            cb();
        }
        assert_eq!(ran.load(Ordering::Relaxed), 400);
    }
}
