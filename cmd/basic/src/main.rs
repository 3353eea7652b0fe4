//! Basic costack example
//!
//! Spawns a few coroutines that yield and sleep, then stops the fleet.

use costack::{go, sleep, yield_now, Config, WaitGroup};

fn main() {
    println!("=== costack basic example ===\n");

    costack::init_with(Config::new().sched_num(2)).expect("fleet init failed");
    println!("fleet: {} schedulers\n", costack::scheduler_num());

    let wg = WaitGroup::new();
    wg.add(3);

    let w = wg.clone();
    go(move || {
        println!(
            "[co {} on sched {}] started",
            costack::coroutine_id(),
            costack::scheduler_id()
        );
        for i in 0..3 {
            println!("[co {}] iteration {}", costack::coroutine_id(), i);
            yield_now();
        }
        println!("[co {}] finished", costack::coroutine_id());
        w.done();
    });

    let w = wg.clone();
    go(move || {
        println!("[co {}] sleeping 50 ms", costack::coroutine_id());
        sleep(50);
        println!(
            "[co {}] woke, timer expiry: {}",
            costack::coroutine_id(),
            costack::timeout()
        );
        w.done();
    });

    let w = wg.clone();
    go(move || {
        // Coroutines can spawn coroutines; the child lands on the next
        // scheduler in the round-robin.
        go(|| println!("[child co {}] hello", costack::coroutine_id()));
        w.done();
    });

    wg.wait();
    std::thread::sleep(std::time::Duration::from_millis(50));
    costack::exit();
    println!("\nfleet stopped");
}
