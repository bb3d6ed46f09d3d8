use std::time::Duration;

use framekit::cache::{Overwrite, RecordKey, SnapshotCache};
use framekit::pool::BufferPool;
use framekit::sched::{PassAction, Prioritized, Scheduler};

#[derive(Debug)]
struct Snapshot {
    revision: u64,
    label: String,
}

impl Overwrite for Snapshot {
    fn can_overwrite(&self, existing: &Self) -> bool {
        self.revision > existing.revision
    }
}

struct Animation {
    layer: i64,
    frames_left: u32,
}

impl Prioritized for Animation {
    fn order(&self) -> i64 {
        self.layer
    }
}

fn main() {
    env_logger::init(); // RUST_LOG=debug surfaces pool/scheduler diagnostics

    let cache = SnapshotCache::new(|key: &RecordKey| {
        Ok(Snapshot {
            revision: 1,
            label: format!("record {}/{}", key.owner, key.item),
        })
    });
    let pool = BufferPool::try_new(4096, 2).unwrap();
    let mut sched = Scheduler::new();

    sched.register(Animation { layer: 0, frames_left: 2 });
    sched.register(Animation { layer: 10, frames_left: 4 });

    for frame in 1..=4_u32 {
        let snapshot = cache
            .get_or_fetch(&RecordKey { owner: 7, item: 1 })
            .unwrap();

        let mut buf = pool.borrow();
        buf[0] = frame as u8;
        pool.record_bytes(buf.len() as u64);
        drop(buf); // back to the free list

        let mut ticked = 0;
        sched.run_pass(|_, anim| {
            anim.frames_left -= 1;
            ticked += 1;
            if anim.frames_left == 0 {
                PassAction::Remove
            } else {
                PassAction::Keep
            }
        });

        println!(
            "frame {frame}: {} | ticked {ticked}, {} still scheduled, {} idle buffers",
            snapshot.label,
            sched.len(),
            pool.idle()
        );
    }

    std::thread::sleep(Duration::from_millis(5));
    let m = cache.metrics();
    println!("cache: {} fetch, {} hits", m.fetches, m.hits);
    println!("pool: {:?}", pool.metrics());
}

// Expected output (pool counters vary with reuse order):
// frame 1: record 7/1 | ticked 2, 2 still scheduled, 2 idle buffers
// frame 2: record 7/1 | ticked 2, 1 still scheduled, 2 idle buffers
// frame 3: record 7/1 | ticked 1, 1 still scheduled, 2 idle buffers
// frame 4: record 7/1 | ticked 1, 0 still scheduled, 2 idle buffers
// cache: 1 fetch, 3 hits
//
// Explanation: the first frame fetches the snapshot, every later frame is a
// cache hit on the same Arc. The layer-0 animation runs out after 2 frames,
// the layer-10 one after 4.
