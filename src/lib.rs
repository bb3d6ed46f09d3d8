//! framekit: concurrency-optimized runtime structures for frame-loop hot paths.
//!
//! Four independent components, each replacing a lock-guarded structure with a
//! design that minimizes or eliminates mutual exclusion on the hot path:
//!
//! - [`cache::SnapshotCache`]: keyed snapshot store with conditional insert
//! - [`pool::BufferPool`]: fixed-size buffer free-list with throughput meter
//! - [`sched::Scheduler`]: priority-bucketed tasks with O(1) deregistration
//! - [`batch::BatchDispatcher`]: coalescing dispatcher with per-request promises
//!
//! See `DESIGN.md` for internal architecture and invariants.

pub mod batch;
pub mod cache;
pub mod ds;
pub mod error;
pub mod pool;
pub mod prelude;
pub mod sched;
