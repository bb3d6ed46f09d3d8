//! Batch dispatcher: coalesces pending requests into size- or time-bounded
//! batches and resolves each request's promise from one execution cycle.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  callers                                      worker thread          │
//! │                                                                      │
//! │  enqueue(req) ──► pending queue ──wake──►  Idle: block on wake       │
//! │       │             (mutex)                  │                       │
//! │       ▼                                      ▼                       │
//! │  BatchTicket ◄── promise (bounded(1))      Armed: delay window vs    │
//! │   .wait()                                    threshold signal, race  │
//! │                                              │                       │
//! │                                              ▼                       │
//! │                                            Dispatch:                 │
//! │                                              1. drain ≤ max (mutex)  │
//! │                                              2. run_batch OUTSIDE    │
//! │                                                 any lock             │
//! │                                              3. resolve promises     │
//! │                                              4. more pending?        │
//! │                                                 ≥ max → dispatch     │
//! │                                                 some  → re-arm       │
//! │                                                 none  → idle         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The first request arriving at an empty queue arms a delay window; hitting
//! `max_batch_size` before the window closes preempts the timer and
//! dispatches immediately. The snapshot step is the only critical section —
//! the execution callback always runs with no lock held.
//!
//! ## Exactly-once resolution
//!
//! A request leaves the pending queue exactly once (the drain under the
//! mutex) and its promise sender is consumed by exactly one `send`: either
//! its positional result from a successful batch, the batch's shared
//! failure, or the shutdown error if the dispatcher is dropped first. There
//! is no retry and no abort path once a batch is handed to the callback; a
//! caller that loses interest simply drops its ticket and ignores the late
//! result.
//!
//! ## Example Usage
//!
//! ```
//! use std::time::Duration;
//! use framekit::batch::{BatchDispatcher, DispatcherConfig};
//!
//! let cfg = DispatcherConfig::try_new(8, Duration::from_millis(5)).unwrap();
//! let dispatcher = BatchDispatcher::new(cfg, |ids: &[u64]| {
//!     Ok(ids.iter().map(|id| format!("record-{id}")).collect())
//! });
//!
//! let ticket = dispatcher.enqueue(42);
//! assert_eq!(ticket.wait().unwrap(), "record-42");
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, unbounded};
use log::warn;
use parking_lot::Mutex;

use crate::error::{BatchError, ConfigError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Dispatcher tuning: batch size ceiling and coalescing delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    max_batch_size: usize,
    delay: Duration,
}

impl DispatcherConfig {
    /// Creates a validated configuration.
    ///
    /// `delay` may be zero (every enqueue dispatches as soon as the worker
    /// gets to it); `max_batch_size` must be at least 1.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `max_batch_size` is zero.
    pub fn try_new(max_batch_size: usize, delay: Duration) -> Result<Self, ConfigError> {
        if max_batch_size == 0 {
            return Err(ConfigError::new("max_batch_size must be > 0"));
        }
        Ok(Self {
            max_batch_size,
            delay,
        })
    }

    /// Maximum requests per batch.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Coalescing window armed by the first pending request.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchMetrics {
    /// Requests accepted by `enqueue`.
    pub enqueued: u64,
    /// Batches executed (successful or failed).
    pub batches: u64,
    /// Requests resolved with a result.
    pub fulfilled: u64,
    /// Batches whose execution callback failed.
    pub failed_batches: u64,
    /// Requests failed by dispatcher shutdown.
    pub orphaned: u64,
}

#[derive(Debug, Default)]
struct BatchCounters {
    enqueued: AtomicU64,
    batches: AtomicU64,
    fulfilled: AtomicU64,
    failed_batches: AtomicU64,
    orphaned: AtomicU64,
}

impl BatchCounters {
    fn snapshot(&self) -> BatchMetrics {
        BatchMetrics {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            fulfilled: self.fulfilled.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Tickets and queue plumbing
// ---------------------------------------------------------------------------

/// Promise handle returned by [`BatchDispatcher::enqueue`].
///
/// Resolves exactly once with the request's result or its batch's failure.
/// Dropping the ticket abandons the result; the dispatcher has no other
/// cancellation surface.
#[derive(Debug)]
pub struct BatchTicket<R> {
    rx: Receiver<Result<R, BatchError>>,
}

impl<R> BatchTicket<R> {
    /// Blocks until the request is resolved.
    pub fn wait(self) -> Result<R, BatchError> {
        self.rx.recv().unwrap_or_else(|_| Err(BatchError::shutdown()))
    }

    /// Returns the resolution if it already happened, without blocking.
    pub fn try_wait(&self) -> Option<Result<R, BatchError>> {
        match self.rx.try_recv() {
            Ok(resolution) => Some(resolution),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(BatchError::shutdown())),
        }
    }

    /// Blocks up to `timeout` for the resolution.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<R, BatchError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(resolution) => Some(resolution),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(BatchError::shutdown())),
        }
    }
}

/// A pending request paired with its promise sender.
#[derive(Debug)]
struct QueuedRequest<Q, R> {
    request: Q,
    promise: Sender<Result<R, BatchError>>,
}

/// Wake-ups sent to the worker.
enum Wake {
    /// The queue became non-empty or reached the batch-size threshold.
    Enqueued,
    /// The dispatcher is shutting down.
    Shutdown,
}

/// State shared between callers and the worker.
#[derive(Debug)]
struct Shared<Q, R> {
    pending: Mutex<VecDeque<QueuedRequest<Q, R>>>,
    metrics: BatchCounters,
}

impl<Q, R> Shared<Q, R> {
    fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Atomically takes up to `max` requests out of visibility.
    fn drain_batch(&self, max: usize) -> Vec<QueuedRequest<Q, R>> {
        let mut pending = self.pending.lock();
        let take = pending.len().min(max);
        pending.drain(..take).collect()
    }
}

// ---------------------------------------------------------------------------
// BatchDispatcher
// ---------------------------------------------------------------------------

type RunBatchFn<Q, R> = dyn Fn(&[Q]) -> Result<Vec<R>, BatchError> + Send + Sync;

/// Coalescing batch dispatcher with a dedicated worker thread.
///
/// The execution callback supplied at construction receives each batch
/// snapshot and returns one result per request (positional) or a single
/// failure for the whole batch. A failed batch never affects other batches
/// or requests that were not part of it.
///
/// Dropping the dispatcher stops the worker; requests still pending at that
/// point are failed with [`BatchError::shutdown`].
pub struct BatchDispatcher<Q, R> {
    shared: Arc<Shared<Q, R>>,
    wake_tx: Sender<Wake>,
    config: DispatcherConfig,
    worker: Option<JoinHandle<()>>,
}

impl<Q, R> std::fmt::Debug for BatchDispatcher<Q, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDispatcher")
            .field("config", &self.config)
            .field("pending", &self.shared.pending_len())
            .finish_non_exhaustive()
    }
}

impl<Q, R> BatchDispatcher<Q, R>
where
    Q: Send + 'static,
    R: Send + 'static,
{
    /// Creates a dispatcher and spawns its worker thread.
    pub fn new<F>(config: DispatcherConfig, run_batch: F) -> Self
    where
        F: Fn(&[Q]) -> Result<Vec<R>, BatchError> + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            pending: Mutex::new(VecDeque::new()),
            metrics: BatchCounters::default(),
        });
        let (wake_tx, wake_rx) = unbounded();

        let worker_shared = Arc::clone(&shared);
        let runner: Box<RunBatchFn<Q, R>> = Box::new(run_batch);
        let worker = std::thread::Builder::new()
            .name("framekit-batch".into())
            .spawn(move || worker_loop(worker_shared, wake_rx, runner, config))
            .expect("failed to spawn batch dispatcher worker");

        Self {
            shared,
            wake_tx,
            config,
            worker: Some(worker),
        }
    }

    /// Enqueues a request and returns its promise ticket.
    ///
    /// The first request landing in an empty queue arms the delay window;
    /// reaching `max_batch_size` pending requests signals an immediate
    /// dispatch that preempts the timer.
    pub fn enqueue(&self, request: Q) -> BatchTicket<R> {
        let (promise, rx) = bounded(1);
        let len = {
            let mut pending = self.shared.pending.lock();
            pending.push_back(QueuedRequest { request, promise });
            pending.len()
        };
        self.shared.metrics.enqueued.fetch_add(1, Ordering::Relaxed);

        if len == 1 || len >= self.config.max_batch_size {
            // Worker gone means we are mid-drop; the ticket will resolve
            // with the shutdown error through its disconnected channel.
            let _ = self.wake_tx.send(Wake::Enqueued);
        }
        BatchTicket { rx }
    }

    /// Number of requests currently awaiting dispatch.
    pub fn pending(&self) -> usize {
        self.shared.pending_len()
    }

    /// The configuration the dispatcher was built with.
    pub fn config(&self) -> DispatcherConfig {
        self.config
    }

    /// Returns a snapshot of the dispatcher's counters.
    pub fn metrics(&self) -> BatchMetrics {
        self.shared.metrics.snapshot()
    }
}

impl<Q, R> Drop for BatchDispatcher<Q, R> {
    fn drop(&mut self) {
        let _ = self.wake_tx.send(Wake::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Outcome of waiting out a coalescing window.
enum Window {
    /// Dispatch now: the threshold was reached or the delay elapsed.
    Ready,
    /// Shut down.
    Closed,
}

/// Races the delay timer against threshold wake-ups.
fn wait_window<Q, R>(
    shared: &Shared<Q, R>,
    wake_rx: &Receiver<Wake>,
    config: &DispatcherConfig,
) -> Window {
    let deadline = Instant::now() + config.delay;
    loop {
        if shared.pending_len() >= config.max_batch_size {
            return Window::Ready;
        }
        match wake_rx.recv_deadline(deadline) {
            Ok(Wake::Enqueued) => continue,
            Ok(Wake::Shutdown) => return Window::Closed,
            Err(RecvTimeoutError::Timeout) => return Window::Ready,
            Err(RecvTimeoutError::Disconnected) => return Window::Closed,
        }
    }
}

/// Executes one batch and resolves its promises.
fn execute_batch<Q, R>(
    runner: &RunBatchFn<Q, R>,
    batch: Vec<QueuedRequest<Q, R>>,
    metrics: &BatchCounters,
) {
    let (requests, promises): (Vec<Q>, Vec<Sender<Result<R, BatchError>>>) = batch
        .into_iter()
        .map(|queued| (queued.request, queued.promise))
        .unzip();

    metrics.batches.fetch_add(1, Ordering::Relaxed);
    match runner(&requests) {
        Ok(results) if results.len() == promises.len() => {
            for (promise, result) in promises.into_iter().zip(results) {
                // A dropped ticket is a caller that lost interest.
                let _ = promise.send(Ok(result));
            }
            metrics
                .fulfilled
                .fetch_add(requests.len() as u64, Ordering::Relaxed);
        },
        Ok(results) => {
            let err = BatchError::new(format!(
                "batch produced {} results for {} requests",
                results.len(),
                promises.len()
            ));
            warn!("{err}");
            metrics.failed_batches.fetch_add(1, Ordering::Relaxed);
            for promise in promises {
                let _ = promise.send(Err(err.clone()));
            }
        },
        Err(err) => {
            warn!("batch of {} requests failed: {err}", promises.len());
            metrics.failed_batches.fetch_add(1, Ordering::Relaxed);
            for promise in promises {
                let _ = promise.send(Err(err.clone()));
            }
        },
    }
}

fn worker_loop<Q, R>(
    shared: Arc<Shared<Q, R>>,
    wake_rx: Receiver<Wake>,
    runner: Box<RunBatchFn<Q, R>>,
    config: DispatcherConfig,
) {
    'idle: loop {
        // Idle until a request arrives.
        match wake_rx.recv() {
            Ok(Wake::Enqueued) => {},
            Ok(Wake::Shutdown) | Err(_) => break,
        }
        if shared.pending_len() == 0 {
            // Stale wake from a queue already drained by a previous cycle.
            continue;
        }

        // Armed: wait out the coalescing window (or a threshold signal).
        if matches!(wait_window(&shared, &wake_rx, &config), Window::Closed) {
            break;
        }

        // Dispatch cycles until the queue is drained or re-armed.
        loop {
            let batch = shared.drain_batch(config.max_batch_size);
            if batch.is_empty() {
                continue 'idle;
            }
            execute_batch(runner.as_ref(), batch, &shared.metrics);

            let remaining = shared.pending_len();
            if remaining == 0 {
                continue 'idle;
            }
            if remaining >= config.max_batch_size {
                continue; // full batch ready, no window
            }
            // Partial remainder arrived during processing: new window.
            if matches!(wait_window(&shared, &wake_rx, &config), Window::Closed) {
                break 'idle;
            }
        }
    }

    // Shutdown: fail everything still pending.
    let orphans: Vec<QueuedRequest<Q, R>> = {
        let mut pending = shared.pending.lock();
        pending.drain(..).collect()
    };
    shared
        .metrics
        .orphaned
        .fetch_add(orphans.len() as u64, Ordering::Relaxed);
    for orphan in orphans {
        let _ = orphan.promise.send(Err(BatchError::shutdown()));
    }
}
