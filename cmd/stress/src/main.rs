//! costack stress demo
//!
//! Spawns a large number of looping sleepers on the full fleet, reports
//! resume throughput for a few seconds, then exits cleanly. The shared
//! stacks are the point: 10k coroutines never allocate 10k stacks.
//!
//! Usage: stress [coroutines] [seconds]

use costack::{env_get, go, sleep};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    let mut args = std::env::args().skip(1);
    let n: u64 = args
        .next()
        .and_then(|a| a.parse().ok())
        .unwrap_or_else(|| env_get("STRESS_COS", 10_000));
    let secs: u64 = args.next().and_then(|a| a.parse().ok()).unwrap_or(3);

    costack::init();
    println!(
        "spawning {} sleepers on {} schedulers for {}s",
        n,
        costack::scheduler_num(),
        secs
    );

    let resumes = Arc::new(AtomicU64::new(0));
    for _ in 0..n {
        let resumes = Arc::clone(&resumes);
        go(move || loop {
            sleep(10);
            resumes.fetch_add(1, Ordering::Relaxed);
        });
    }

    let start = Instant::now();
    let mut last = 0u64;
    for _ in 0..secs {
        std::thread::sleep(Duration::from_secs(1));
        let total = resumes.load(Ordering::Relaxed);
        println!("{:>8} resumes/s", total - last);
        last = total;
    }

    let stop = Instant::now();
    costack::exit();
    println!(
        "done: {} resumes in {:?}, shutdown took {:?}",
        resumes.load(Ordering::Relaxed),
        start.elapsed(),
        stop.elapsed()
    );
}
