use std::thread;
use std::time::Duration;

use framekit::batch::{BatchDispatcher, DispatcherConfig};

fn main() {
    env_logger::init(); // RUST_LOG=warn surfaces batch failure diagnostics

    // Up to 4 ids per upstream call, coalesced over a 20ms window.
    let cfg = DispatcherConfig::try_new(4, Duration::from_millis(20)).unwrap();
    let dispatcher = BatchDispatcher::new(cfg, |ids: &[u64]| {
        println!("upstream called with {} ids: {ids:?}", ids.len());
        Ok(ids.iter().map(|id| format!("record-{id}")).collect())
    });

    // Burst of 6 requests from 6 threads: one full batch of 4 goes out on
    // the threshold, the remaining 2 ride the delay window.
    thread::scope(|scope| {
        for id in 0..6_u64 {
            let dispatcher = &dispatcher;
            scope.spawn(move || {
                let ticket = dispatcher.enqueue(id);
                let record = ticket.wait().unwrap();
                assert_eq!(record, format!("record-{id}"));
            });
        }
    });

    let m = dispatcher.metrics();
    println!(
        "{} requests over {} upstream calls ({} fulfilled)",
        m.enqueued, m.batches, m.fulfilled
    );
}

// Expected output (id order varies with thread scheduling):
// upstream called with 4 ids: [0, 1, 2, 3]
// upstream called with 2 ids: [4, 5]
// 6 requests over 2 upstream calls (6 fulfilled)
//
// Explanation: the burst reaches max_batch_size before the 20ms window
// closes, so the first batch dispatches immediately; the stragglers wait out
// their own window and share the second call.
