//! Buffer pool: lock-free free-list of fixed-size byte buffers, plus a
//! windowed throughput meter.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                            borrow()                                   │
//! │                                                                       │
//! │   pop free-list ──► len == buffer_size? ──yes──► hand out (reused)    │
//! │        ▲                    │                                         │
//! │        │                    no (size changed since it was pooled)     │
//! │        │                    ▼                                         │
//! │        └──────────── drop stale buffer, pop again                     │
//! │                                                                       │
//! │   free-list empty ──► allocate fresh buffer at current size           │
//! │                                                                       │
//! │                          return path                                  │
//! │                                                                       │
//! │   len == buffer_size? ──yes──► push onto free-list                    │
//! │                        ──no───► drop (never pool stale sizes)         │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both paths are lock-free: the free-list is a `SegQueue` (CAS push/pop)
//! and the configured size is a single atomic. The only critical section in
//! this module is the throughput meter's rollover, a compound update of
//! accumulator, published rate and window timestamp that must be consistent;
//! that mutex is never held across a free-list operation.
//!
//! ## Ownership
//!
//! A borrowed buffer belongs to the caller until the [`PooledBuffer`] handle
//! drops (returning it) or is [`detach`](PooledBuffer::detach)ed. Buffers
//! are reused without clearing: callers must not assume zeroed contents
//! beyond the very first allocation.
//!
//! ## Example Usage
//!
//! ```
//! use framekit::pool::BufferPool;
//!
//! let pool = BufferPool::try_new(32 * 1024, 4).unwrap();
//!
//! let mut buf = pool.borrow();
//! assert_eq!(buf.len(), 32 * 1024);
//! buf[0] = 0xAB;
//! drop(buf); // returned to the free-list
//!
//! pool.record_bytes(32 * 1024);
//! let _rate = pool.throughput(); // bytes/sec, 0.0 until the first window closes
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use crossbeam_utils::atomic::AtomicCell;
use log::debug;
use parking_lot::Mutex;

use crate::error::ConfigError;

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Borrows satisfied from the free-list.
    pub reuses: u64,
    /// Borrows that allocated a fresh buffer.
    pub allocations: u64,
    /// Pooled buffers dropped during borrow because their size went stale.
    pub stale_discards: u64,
    /// Returned buffers dropped because their size did not match.
    pub return_discards: u64,
    /// Buffers successfully returned to the free-list.
    pub returns: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    reuses: AtomicU64,
    allocations: AtomicU64,
    stale_discards: AtomicU64,
    return_discards: AtomicU64,
    returns: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            reuses: self.reuses.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            stale_discards: self.stale_discards.load(Ordering::Relaxed),
            return_discards: self.return_discards.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// ThroughputMeter
// ---------------------------------------------------------------------------

/// Windowed byte-rate sampler.
///
/// Accumulates byte counts from any thread; once at least one window has
/// elapsed since the last rollover, publishes `accumulated / elapsed_secs`
/// as the current rate and resets. Reading the rate never takes the mutex.
#[derive(Debug)]
pub struct ThroughputMeter {
    state: Mutex<MeterState>,
    rate: AtomicCell<f64>,
    window: Duration,
}

#[derive(Debug)]
struct MeterState {
    accumulated: u64,
    last_rollover: Instant,
}

impl ThroughputMeter {
    /// Creates a meter with the conventional one-second window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    /// Creates a meter with a custom rollover window.
    pub fn with_window(window: Duration) -> Self {
        Self {
            state: Mutex::new(MeterState {
                accumulated: 0,
                last_rollover: Instant::now(),
            }),
            rate: AtomicCell::new(0.0),
            window,
        }
    }

    /// Accumulates `n` bytes, rolling the window over when due.
    ///
    /// The compound update of accumulator, rate and timestamp happens under
    /// one short mutex so concurrent callers never observe a half-rolled
    /// window.
    pub fn record_bytes(&self, n: u64) {
        let mut state = self.state.lock();
        state.accumulated = state.accumulated.saturating_add(n);
        let elapsed = state.last_rollover.elapsed();
        if elapsed >= self.window {
            self.rate
                .store(state.accumulated as f64 / elapsed.as_secs_f64());
            state.accumulated = 0;
            state.last_rollover = Instant::now();
        }
    }

    /// Last published rate in bytes per second (0.0 before the first window
    /// closes). Lock-free read.
    pub fn rate(&self) -> f64 {
        self.rate.load()
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// BufferPool
// ---------------------------------------------------------------------------

/// Thread-safe free-list of fixed-size byte buffers.
///
/// `borrow` and the return path never block and are safe for unbounded
/// concurrent callers. The buffer size may be changed at runtime; buffers
/// pooled at the old size are lazily discarded on later borrows rather than
/// eagerly drained, so a size change is O(1).
///
/// # Example
///
/// ```
/// use framekit::pool::BufferPool;
///
/// let pool = BufferPool::try_new(4096, 0).unwrap();
///
/// // Empty free-list: borrow allocates
/// let buf = pool.borrow();
/// assert_eq!(buf.len(), 4096);
/// drop(buf);
///
/// // Size change: the 4096-byte buffer in the pool is now stale and will
/// // be discarded, never handed out
/// pool.set_buffer_size(8192).unwrap();
/// assert_eq!(pool.borrow().len(), 8192);
/// ```
#[derive(Debug)]
pub struct BufferPool {
    free: SegQueue<Box<[u8]>>,
    buffer_size: AtomicUsize,
    meter: ThroughputMeter,
    metrics: PoolCounters,
}

impl BufferPool {
    /// Creates a pool handing out `buffer_size`-byte buffers, pre-warmed
    /// with `prewarm` buffers (typically the host's maximum concurrent
    /// operation count).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `buffer_size` is zero.
    pub fn try_new(buffer_size: usize, prewarm: usize) -> Result<Self, ConfigError> {
        if buffer_size == 0 {
            return Err(ConfigError::new("buffer_size must be > 0"));
        }
        let free = SegQueue::new();
        for _ in 0..prewarm {
            free.push(vec![0u8; buffer_size].into_boxed_slice());
        }
        Ok(Self {
            free,
            buffer_size: AtomicUsize::new(buffer_size),
            meter: ThroughputMeter::new(),
            metrics: PoolCounters::default(),
        })
    }

    /// Currently configured buffer size in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size.load(Ordering::Relaxed)
    }

    /// Changes the buffer size for subsequent borrows.
    ///
    /// Buffers pooled at the old size are discarded lazily as later borrows
    /// encounter them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `buffer_size` is zero.
    pub fn set_buffer_size(&self, buffer_size: usize) -> Result<(), ConfigError> {
        if buffer_size == 0 {
            return Err(ConfigError::new("buffer_size must be > 0"));
        }
        self.buffer_size.store(buffer_size, Ordering::Relaxed);
        Ok(())
    }

    /// Borrows a buffer of exactly [`buffer_size`](Self::buffer_size) bytes.
    ///
    /// Pops the free-list, discarding any buffer whose size went stale,
    /// and allocates when the list runs dry. Never blocks.
    pub fn borrow(&self) -> PooledBuffer<'_> {
        let size = self.buffer_size.load(Ordering::Relaxed);
        loop {
            match self.free.pop() {
                Some(buf) if buf.len() == size => {
                    self.metrics.reuses.fetch_add(1, Ordering::Relaxed);
                    return PooledBuffer {
                        pool: self,
                        buf: Some(buf),
                    };
                },
                Some(stale) => {
                    debug!(
                        "discarding pooled buffer of stale size {} (current {})",
                        stale.len(),
                        size
                    );
                    self.metrics.stale_discards.fetch_add(1, Ordering::Relaxed);
                },
                None => {
                    self.metrics.allocations.fetch_add(1, Ordering::Relaxed);
                    return PooledBuffer {
                        pool: self,
                        buf: Some(vec![0u8; size].into_boxed_slice()),
                    };
                },
            }
        }
    }

    /// Returns a detached buffer to the pool.
    ///
    /// Pooled only if its length matches the current buffer size; a
    /// mismatched buffer is silently dropped so stale sizes never
    /// accumulate after a configuration change.
    pub fn give_back(&self, buf: Box<[u8]>) {
        if buf.len() == self.buffer_size.load(Ordering::Relaxed) {
            self.free.push(buf);
            self.metrics.returns.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.return_discards.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Accumulates `n` downloaded bytes into the throughput meter.
    pub fn record_bytes(&self, n: u64) {
        self.meter.record_bytes(n);
    }

    /// Last published throughput in bytes per second.
    pub fn throughput(&self) -> f64 {
        self.meter.rate()
    }

    /// Number of buffers currently idle in the free-list.
    ///
    /// A snapshot; may be stale immediately under concurrency.
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// Returns a snapshot of the pool's counters.
    pub fn metrics(&self) -> PoolMetrics {
        self.metrics.snapshot()
    }
}

// ---------------------------------------------------------------------------
// PooledBuffer
// ---------------------------------------------------------------------------

/// RAII handle to a borrowed buffer.
///
/// Derefs to `[u8]`; dropping the handle returns the buffer to the pool
/// (subject to the size-match policy). Contents are whatever the previous
/// borrower left behind.
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Option<Box<[u8]>>,
}

impl PooledBuffer<'_> {
    /// Takes ownership of the buffer without returning it to the pool.
    ///
    /// Hand it back later with [`BufferPool::give_back`], or keep it.
    pub fn detach(mut self) -> Box<[u8]> {
        self.buf.take().expect("buffer already detached")
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().expect("buffer already detached")
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().expect("buffer already detached")
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}

impl std::fmt::Debug for PooledBuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.as_ref().map(|b| b.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrow_on_empty_pool_allocates_configured_size() {
        let pool = BufferPool::try_new(32 * 1024, 0).unwrap();
        let buf = pool.borrow();
        assert_eq!(buf.len(), 32 * 1024);
        assert_eq!(pool.metrics().allocations, 1);
    }

    #[test]
    fn returned_buffer_is_reused() {
        let pool = BufferPool::try_new(1024, 0).unwrap();
        let buf = pool.borrow();
        let addr = buf.as_ptr() as usize;
        drop(buf);

        let buf = pool.borrow();
        assert_eq!(buf.as_ptr() as usize, addr);
        assert_eq!(pool.metrics().reuses, 1);
    }

    #[test]
    fn mismatched_return_is_dropped() {
        let pool = BufferPool::try_new(32 * 1024, 0).unwrap();
        pool.give_back(vec![0u8; 16 * 1024].into_boxed_slice());
        assert_eq!(pool.idle(), 0);
        assert_eq!(pool.metrics().return_discards, 1);

        // The short buffer never resurfaces
        assert_eq!(pool.borrow().len(), 32 * 1024);
    }

    #[test]
    fn stale_pooled_buffers_discarded_after_resize() {
        let pool = BufferPool::try_new(1024, 3).unwrap();
        assert_eq!(pool.idle(), 3);

        pool.set_buffer_size(2048).unwrap();
        let buf = pool.borrow();
        assert_eq!(buf.len(), 2048);
        // All three stale buffers were popped and dropped before allocating
        assert_eq!(pool.metrics().stale_discards, 3);
        assert_eq!(pool.metrics().allocations, 1);
    }

    #[test]
    fn zero_buffer_size_rejected() {
        assert!(BufferPool::try_new(0, 0).is_err());
        let pool = BufferPool::try_new(64, 0).unwrap();
        assert!(pool.set_buffer_size(0).is_err());
        assert_eq!(pool.buffer_size(), 64);
    }

    #[test]
    fn detach_keeps_buffer_out_of_pool() {
        let pool = BufferPool::try_new(128, 0).unwrap();
        let raw = pool.borrow().detach();
        assert_eq!(raw.len(), 128);
        assert_eq!(pool.idle(), 0);

        pool.give_back(raw);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn contents_survive_a_round_trip() {
        let pool = BufferPool::try_new(64, 0).unwrap();
        let mut buf = pool.borrow();
        buf[0] = 0xCD;
        drop(buf);

        // Reuse does not clear: callers must not assume zeroed memory.
        let buf = pool.borrow();
        assert_eq!(buf[0], 0xCD);
    }

    #[test]
    fn meter_publishes_rate_after_window() {
        let meter = ThroughputMeter::with_window(Duration::from_millis(20));
        assert_eq!(meter.rate(), 0.0);

        meter.record_bytes(1000);
        std::thread::sleep(Duration::from_millis(30));
        meter.record_bytes(1000);

        let rate = meter.rate();
        assert!(rate > 0.0, "rate should be published after the window");
        // 2000 bytes over ~30ms lands far above 2000 B/s
        assert!(rate > 2000.0);
    }

    #[test]
    fn meter_resets_accumulator_on_rollover() {
        let meter = ThroughputMeter::with_window(Duration::from_millis(10));
        meter.record_bytes(500);
        std::thread::sleep(Duration::from_millis(15));
        meter.record_bytes(500);
        let first = meter.rate();

        // Next window starts from zero accumulated
        std::thread::sleep(Duration::from_millis(15));
        meter.record_bytes(1);
        let second = meter.rate();
        assert!(second < first);
    }
}
