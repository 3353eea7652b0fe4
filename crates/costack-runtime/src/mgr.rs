//! Scheduler fleet
//!
//! Process-wide manager: N schedulers on N named OS threads, a lock-free
//! round-robin dispatch for new tasks, and a strict once-lifecycle — init
//! once, stop once, re-init unsupported.

use crate::config::{cpu_count, Config};
use crate::copool::TaskFn;
use crate::sched::Scheduler;
use costack_core::error::{SchedError, SchedResult};
use costack_core::spinlock::SpinLock;
use costack_core::{codebug, coinfo};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

static MGR: OnceLock<SchedulerManager> = OnceLock::new();
static INITIALIZED: AtomicBool = AtomicBool::new(false);
static STOPPED: AtomicBool = AtomicBool::new(true);

/// Lock-free uniform round-robin over `n` targets.
///
/// A plain 32-bit counter modulo `n` is biased when `2^32 % n != 0`: the
/// last, partial pass before the counter wraps favors low indices. The
/// wrap remainder is precomputed at init and folded into a skew that grows
/// by that remainder on every wrap, which keeps the sequence of indices
/// consecutive modulo `n` across the wrap and the long-run distribution
/// exactly uniform.
struct RoundRobin {
    seq: AtomicU32,
    skew: AtomicU32,
    wrap_rem: u32,
    n: u32,
}

impl RoundRobin {
    fn new(n: u32) -> Self {
        RoundRobin {
            seq: AtomicU32::new(0),
            skew: AtomicU32::new(0),
            wrap_rem: ((1u64 << 32) % n as u64) as u32,
            n,
        }
    }

    #[cfg(test)]
    fn with_seq(n: u32, seq: u32) -> Self {
        let rr = RoundRobin::new(n);
        rr.seq.store(seq, Ordering::Relaxed);
        rr
    }

    fn next_index(&self) -> usize {
        let c = self.seq.fetch_add(1, Ordering::Relaxed);
        if c == u32::MAX {
            self.skew.fetch_add(self.wrap_rem, Ordering::Relaxed);
        }
        let skew = self.skew.load(Ordering::Relaxed);
        (c.wrapping_add(skew) % self.n) as usize
    }
}

/// The process-wide fleet of schedulers.
pub struct SchedulerManager {
    scheds: Vec<Arc<Scheduler>>,
    handles: SpinLock<Vec<JoinHandle<()>>>,
    rr: RoundRobin,
    disable_exit: bool,
}

impl SchedulerManager {
    fn build(cfg: Config) -> SchedResult<Self> {
        let cfg = cfg.normalized();
        cfg.validate()?;
        if cfg.debug_log {
            costack_core::log::enable_trace();
        }

        let mut scheds = Vec::with_capacity(cfg.sched_num);
        let mut handles = Vec::with_capacity(cfg.sched_num);
        for i in 0..cfg.sched_num {
            scheds.push(Arc::new(Scheduler::new(i as u32, &cfg)?));
        }
        for (i, sched) in scheds.iter().enumerate() {
            let sched = Arc::clone(sched);
            let handle = std::thread::Builder::new()
                .name(format!("costack-sched-{}", i))
                .spawn(move || sched.run())
                .expect("failed to spawn scheduler thread");
            handles.push(handle);
        }

        coinfo!(
            "costack fleet up: {} schedulers, {} KB shared stack x {} slots",
            cfg.sched_num,
            cfg.stack_size / 1024,
            cfg.stack_slots
        );
        Ok(SchedulerManager {
            rr: RoundRobin::new(cfg.sched_num as u32),
            scheds,
            handles: SpinLock::new(handles),
            disable_exit: cfg.disable_exit,
        })
    }

    /// Pick the dispatch target for the next new task.
    pub fn next_scheduler(&self) -> &Arc<Scheduler> {
        &self.scheds[self.rr.next_index()]
    }

    /// Read-only view of the fleet; stable after init.
    pub fn schedulers(&self) -> &[Arc<Scheduler>] {
        &self.scheds
    }

    fn stop_fleet(&self) {
        for s in &self.scheds {
            s.stop();
        }
        let handles = {
            let mut guard = self.handles.lock();
            core::mem::take(&mut *guard)
        };
        for h in handles {
            let _ = h.join();
        }
        codebug!("costack fleet stopped");
    }
}

fn manager() -> &'static SchedulerManager {
    MGR.get_or_init(|| {
        let mgr = SchedulerManager::build(Config::from_env())
            .expect("costack fleet init failed");
        INITIALIZED.store(true, Ordering::Release);
        STOPPED.store(false, Ordering::Release);
        mgr
    })
}

/// Initialize the fleet from library defaults plus environment overrides.
/// Idempotent: a second call is a no-op.
pub fn init() {
    let _ = manager();
}

/// Initialize the fleet with an explicit configuration. Fails if the fleet
/// already exists (including by lazy init) or the config is invalid.
pub fn init_with(cfg: Config) -> SchedResult<()> {
    let mut created = false;
    let result: SchedResult<&SchedulerManager> = {
        let mut err = None;
        let mgr = MGR.get_or_init(|| {
            created = true;
            match SchedulerManager::build(cfg) {
                Ok(m) => m,
                Err(e) => {
                    err = Some(e);
                    // Unreachable manager: build failed, leave a husk that
                    // refuses all dispatch.
                    SchedulerManager {
                        scheds: Vec::new(),
                        handles: SpinLock::new(Vec::new()),
                        rr: RoundRobin::new(1),
                        disable_exit: false,
                    }
                }
            }
        });
        match err {
            Some(e) => Err(e),
            None => Ok(mgr),
        }
    };

    match result {
        Err(e) => Err(e),
        Ok(_) if !created => Err(SchedError::AlreadyInitialized),
        Ok(mgr) => {
            if mgr.scheds.is_empty() {
                // A husk left by an earlier failed init.
                return Err(SchedError::NotInitialized);
            }
            INITIALIZED.store(true, Ordering::Release);
            STOPPED.store(false, Ordering::Release);
            Ok(())
        }
    }
}

/// Graceful fleet stop: flag every scheduler, wake every mux, join every
/// thread. Idempotent; a no-op when `disable_exit` is configured.
pub fn exit() {
    let Some(mgr) = MGR.get() else {
        return;
    };
    if mgr.disable_exit {
        return;
    }
    if !STOPPED.swap(true, Ordering::AcqRel) {
        mgr.stop_fleet();
    }
}

/// Dispatch a closure as a new coroutine on the next scheduler in the
/// round-robin. Safe from any thread; silently dropped while stopping.
pub fn go(cb: TaskFn) {
    if is_stopped() && INITIALIZED.load(Ordering::Acquire) {
        return;
    }
    let mgr = manager();
    if mgr.schedulers().is_empty() {
        // Husk left by a failed explicit init.
        return;
    }
    mgr.next_scheduler().post_task(cb);
}

/// Whether the fleet has been initialized.
pub fn initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Whether the fleet is stopped (also true before init).
pub fn is_stopped() -> bool {
    STOPPED.load(Ordering::Acquire)
}

/// Number of schedulers in the fleet, or the CPU count before init.
pub fn scheduler_num() -> usize {
    match MGR.get() {
        Some(mgr) if initialized() => mgr.schedulers().len(),
        _ => cpu_count(),
    }
}

/// Read-only fleet view; empty before init.
pub fn all_schedulers() -> &'static [Arc<Scheduler>] {
    match MGR.get() {
        Some(mgr) => mgr.schedulers(),
        None => &[],
    }
}

/// The dispatch target the next `go` would pick.
pub fn next_scheduler() -> Option<&'static Arc<Scheduler>> {
    MGR.get().map(|m| m.next_scheduler())
}

/// Look up a scheduler by id; used to route ready hand-offs to a
/// coroutine's owner.
pub(crate) fn scheduler_by_id(id: u32) -> Option<&'static Arc<Scheduler>> {
    MGR.get().and_then(|m| m.schedulers().get(id as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_covers_uniformly() {
        let rr = RoundRobin::new(3);
        let mut counts = [0usize; 3];
        for _ in 0..3000 {
            counts[rr.next_index()] += 1;
        }
        assert_eq!(counts, [1000, 1000, 1000]);
    }

    #[test]
    fn test_round_robin_wrap_stays_consecutive() {
        // n = 3 does not divide 2^32; without the skew the sequence would
        // jump at the wrap.
        let rr = RoundRobin::with_seq(3, u32::MAX - 1);
        let a = rr.next_index(); // c = MAX-1
        let b = rr.next_index(); // c = MAX, skew += 2^32 % 3
        let c = rr.next_index(); // c = 0 (wrapped)
        let d = rr.next_index();
        assert_eq!(b, (a + 1) % 3);
        assert_eq!(c, (b + 1) % 3);
        assert_eq!(d, (c + 1) % 3);
    }

    #[test]
    fn test_wrap_remainder_precomputed() {
        assert_eq!(RoundRobin::new(1).wrap_rem, 0);
        assert_eq!(RoundRobin::new(2).wrap_rem, 0);
        assert_eq!(RoundRobin::new(3).wrap_rem, 1);
        assert_eq!(RoundRobin::new(6).wrap_rem, 4);
    }
}
