//! Single-scheduler FIFO ordering.
//!
//! Own process: this fleet pins everything to one scheduler so the inbox
//! hand-off order is the whole story.

use costack::{go, yield_now, Config, WaitGroup};
use std::sync::{Arc, Mutex};

const N: usize = 1000;

#[test]
fn fan_out_keeps_inbox_fifo_order() {
    costack::init_with(Config::new().sched_num(1)).unwrap();

    let log: Arc<Mutex<Vec<(usize, u8)>>> = Arc::new(Mutex::new(Vec::with_capacity(2 * N)));
    let wg = WaitGroup::new();
    wg.add(N as u32);

    for i in 0..N {
        let log = Arc::clone(&log);
        let wg = wg.clone();
        go(move || {
            log.lock().unwrap().push((i, 0));
            yield_now();
            log.lock().unwrap().push((i, 1));
            wg.done();
        });
    }
    wg.wait();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2 * N);

    // Each second append strictly follows its first.
    let mut first_pos = vec![usize::MAX; N];
    let mut second_pos = vec![usize::MAX; N];
    for (pos, &(i, phase)) in log.iter().enumerate() {
        match phase {
            0 => first_pos[i] = pos,
            _ => second_pos[i] = pos,
        }
    }
    for i in 0..N {
        assert!(first_pos[i] < second_pos[i], "coroutine {} ran out of order", i);
    }

    // First runs happen in submission order, and the requeued second runs
    // keep that relative order too: the single scheduler drains its inbox
    // FIFO, whatever the batch boundaries were.
    for i in 1..N {
        assert!(
            first_pos[i - 1] < first_pos[i],
            "first appends out of FIFO order at {}",
            i
        );
        assert!(
            second_pos[i - 1] < second_pos[i],
            "second appends out of FIFO order at {}",
            i
        );
    }
}
