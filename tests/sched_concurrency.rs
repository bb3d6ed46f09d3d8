// ==============================================
// SCHEDULER CONCURRENCY TESTS (integration)
// ==============================================
//
// Cross-thread registration and removal around a single pass driver, the
// expected deployment shape for ConcurrentScheduler.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use framekit::sched::{ConcurrentScheduler, PassAction, Prioritized};

struct Job {
    priority: i64,
    executed: u64,
}

impl Prioritized for Job {
    fn order(&self) -> i64 {
        self.priority
    }
}

#[test]
fn register_remove_from_many_threads() {
    let sched = Arc::new(ConcurrentScheduler::new());
    let threads = 8;
    let per_thread = 500;
    let barrier = Arc::new(Barrier::new(threads));
    let removed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let sched = Arc::clone(&sched);
            let barrier = Arc::clone(&barrier);
            let removed = Arc::clone(&removed);
            thread::spawn(move || {
                barrier.wait();
                let mut mine = Vec::new();
                for i in 0..per_thread {
                    let id = sched.register(Job {
                        priority: ((t * per_thread + i) % 16) as i64,
                        executed: 0,
                    });
                    mine.push(id);
                    if i % 2 == 1 {
                        // Remove this thread's own previous registration
                        let victim = mine.remove(0);
                        if sched.remove(victim).is_some() {
                            removed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                mine
            })
        })
        .collect();

    let mut survivors = 0;
    for h in handles {
        survivors += h.join().unwrap().len();
    }

    assert_eq!(sched.len(), survivors);
    assert_eq!(
        removed.load(Ordering::Relaxed) + survivors,
        threads * per_thread
    );
}

#[test]
fn double_remove_races_resolve_to_one_winner() {
    let iterations = 300;

    for _ in 0..iterations {
        let sched = Arc::new(ConcurrentScheduler::new());
        let id = sched.register(Job {
            priority: 5,
            executed: 0,
        });

        let barrier = Arc::new(Barrier::new(2));
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let sched = Arc::clone(&sched);
                let barrier = Arc::clone(&barrier);
                let wins = Arc::clone(&wins);
                thread::spawn(move || {
                    barrier.wait();
                    if sched.remove(id).is_some() {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Exactly one racer gets the item; the other observes a miss.
        assert_eq!(wins.load(Ordering::Relaxed), 1);
        assert!(sched.is_empty());
    }
}

#[test]
fn pass_driver_ticks_while_other_threads_churn() {
    let sched = Arc::new(ConcurrentScheduler::new());
    let stop = Arc::new(AtomicBool::new(false));

    for p in 0..8_i64 {
        sched.register(Job {
            priority: p,
            executed: 0,
        });
    }

    let churner = {
        let sched = Arc::clone(&sched);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut ids = Vec::new();
            while !stop.load(Ordering::Relaxed) {
                ids.push(sched.register(Job {
                    priority: 99,
                    executed: 0,
                }));
                if ids.len() > 4 {
                    sched.remove(ids.remove(0));
                }
            }
        })
    };

    // Single pass driver, the host's per-frame tick
    for _ in 0..200 {
        sched.run_pass(|_, job| {
            job.executed += 1;
            if job.priority == 99 && job.executed > 3 {
                PassAction::Remove
            } else {
                PassAction::Keep
            }
        });
    }

    stop.store(true, Ordering::Relaxed);
    churner.join().unwrap();

    // The 8 long-lived jobs were never removed and saw every pass
    let mut long_lived = 0;
    sched.run_pass(|_, job| {
        if job.priority < 99 {
            assert_eq!(job.executed, 200);
            long_lived += 1;
        }
        PassAction::Keep
    });
    assert_eq!(long_lived, 8);
}

#[test]
fn reorder_signalled_from_pass_takes_effect_next_pass() {
    let sched = ConcurrentScheduler::new();
    sched.register(Job {
        priority: 1,
        executed: 0,
    });
    sched.register(Job {
        priority: 2,
        executed: 0,
    });

    // Invert priorities mid-pass; buckets must not change until the pass ends
    sched.run_pass(|_, job| {
        job.priority = -job.priority;
        PassAction::Reorder
    });

    let mut seen = Vec::new();
    sched.run_pass(|_, job| {
        seen.push(job.priority);
        PassAction::Keep
    });
    assert_eq!(seen, vec![-2, -1]);
}
