//! Convenience re-exports of the crate's public surface.

pub use crate::batch::{BatchDispatcher, BatchMetrics, BatchTicket, DispatcherConfig};
pub use crate::cache::{CacheMetrics, Overwrite, RecordKey, SnapshotCache};
pub use crate::ds::{HandleArena, TaskId};
pub use crate::error::{BatchError, ConfigError, FetchError, InvariantError};
pub use crate::pool::{BufferPool, PoolMetrics, PooledBuffer, ThroughputMeter};
pub use crate::sched::{
    ConcurrentScheduler, PassAction, Prioritized, SchedMetrics, Scheduler,
};
