//! Graceful stop under load.
//!
//! Own process: `exit()` ends the fleet for good.

use costack::{go, sleep, Config};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn exit_under_load_stops_promptly_and_for_good() {
    costack::init_with(Config::new().sched_num(4)).unwrap();

    // Plenty of coroutines sleeping in a loop across all schedulers.
    let resumes = Arc::new(AtomicUsize::new(0));
    for _ in 0..2000 {
        let resumes = Arc::clone(&resumes);
        go(move || loop {
            sleep(10);
            resumes.fetch_add(1, Ordering::Relaxed);
        });
    }

    // Let the fleet churn for a moment.
    std::thread::sleep(Duration::from_millis(100));
    assert!(resumes.load(Ordering::Relaxed) > 0, "fleet never ran anything");

    let start = Instant::now();
    costack::exit();
    let stop_latency = start.elapsed();

    // Every scheduler joined: exit() returns within a small multiple of the
    // 10ms wait budget the sleepers impose, not after draining them.
    assert!(
        stop_latency < Duration::from_secs(2),
        "exit took {:?}",
        stop_latency
    );
    assert!(costack::is_stopped());

    // No coroutine resumes after exit() returned.
    let settled = resumes.load(Ordering::Relaxed);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(resumes.load(Ordering::Relaxed), settled);

    // Dispatch on a stopped fleet is silently dropped.
    let late = Arc::new(AtomicUsize::new(0));
    let late2 = Arc::clone(&late);
    go(move || {
        late2.fetch_add(1, Ordering::Relaxed);
    });
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(late.load(Ordering::Relaxed), 0);

    // Double exit is a no-op.
    let start = Instant::now();
    costack::exit();
    assert!(start.elapsed() < Duration::from_millis(50));
    assert!(costack::is_stopped());
}
