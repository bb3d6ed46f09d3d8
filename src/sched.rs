//! Bucketed scheduler: ordered groups of registered tasks with O(1)
//! deregistration and safe mutation during a driving pass.
//!
//! Tasks are grouped into *buckets* by their priority/order value and
//! visited bucket by bucket once per tick. The interesting part is removal:
//! instead of scanning every bucket for the departing task, an auxiliary
//! *membership index* remembers the bucket each task was last filed under.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         Scheduler Layout                             │
//! │                                                                      │
//! │   arena: HandleArena<T>            buckets: BTreeMap<i64, Vec>       │
//! │   ┌──────────────────┐             ┌──────────────────────────┐      │
//! │   │ slot 0: task A   │◄── TaskId   │  -5 → [C]                │      │
//! │   │ slot 1: task B   │             │   0 → [A, B]             │      │
//! │   │ slot 2: task C   │             │  10 → [D]                │      │
//! │   │ slot 3: task D   │             └──────────────────────────┘      │
//! │   └──────────────────┘                                               │
//! │                                                                      │
//! │   membership: FxHashMap<TaskId, i64>   (task → last-known bucket)    │
//! │                                                                      │
//! │   remove(id):                                                        │
//! │     1. bucket at the task's CURRENT order   (common case, O(1))      │
//! │     2. bucket recorded in membership index  (order changed, O(1))    │
//! │     3. full scan of all buckets             (stale index, rare)      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Invariants:
//!
//! - a bucket exists in the map iff it is non-empty
//! - every registered task sits in exactly one bucket; within a bucket,
//!   insertion order is preserved
//! - the membership index may lag a task whose order was mutated without
//!   notification; the fallback scan restores correctness at O(buckets)
//!   cost, never wrong results
//!
//! ## Mutation during a pass
//!
//! [`run_pass`](Scheduler::run_pass) drives one tick over all buckets in
//! ascending order. Reorders and removals discovered mid-pass are collected
//! and applied *after* iteration completes (two-phase apply), so the bucket
//! map is never mutated while it is being walked. The same deferral covers
//! [`notify_order_changed`](Scheduler::notify_order_changed) when a pass is
//! in progress.
//!
//! ## Example Usage
//!
//! ```
//! use framekit::sched::{PassAction, Prioritized, Scheduler};
//!
//! struct Job {
//!     priority: i64,
//!     ticks: u32,
//! }
//!
//! impl Prioritized for Job {
//!     fn order(&self) -> i64 {
//!         self.priority
//!     }
//! }
//!
//! let mut sched = Scheduler::new();
//! let a = sched.register(Job { priority: 0, ticks: 0 });
//! sched.register(Job { priority: 5, ticks: 0 });
//!
//! sched.run_pass(|_, job| {
//!     job.ticks += 1;
//!     PassAction::Keep
//! });
//!
//! let job = sched.remove(a).unwrap();
//! assert_eq!(job.ticks, 1);
//! assert!(sched.remove(a).is_none()); // second removal misses
//! ```
//!
//! ## Thread Safety
//!
//! [`Scheduler`] is single-threaded (`&mut self`). For cross-thread
//! registration and removal around a single-driver pass, use
//! [`ConcurrentScheduler`].

use std::collections::BTreeMap;

use log::debug;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::ds::{HandleArena, TaskId};
use crate::error::InvariantError;

/// Priority key supplied by scheduled items.
///
/// The scheduler reads the order at registration and whenever a move is
/// applied; hosts that mutate the order must call
/// [`notify_order_changed`](Scheduler::notify_order_changed) (or return
/// [`PassAction::Reorder`] from the pass) for the buckets to follow.
pub trait Prioritized {
    /// Current priority/order value; lower orders are visited first.
    fn order(&self) -> i64;
}

/// Verdict returned by the pass callback for each visited task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassAction {
    /// Leave the task where it is.
    Keep,
    /// The task's order changed; re-bucket it after the pass completes.
    Reorder,
    /// Deregister the task after the pass completes.
    Remove,
}

/// Snapshot of scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedMetrics {
    /// Tasks registered over the scheduler's lifetime.
    pub registered: u64,
    /// Successful removals.
    pub removed: u64,
    /// Removals resolved at the task's current-order bucket.
    pub direct_hits: u64,
    /// Removals resolved through the membership index.
    pub index_hits: u64,
    /// Removals (or moves) that fell back to a full bucket scan.
    pub fallback_scans: u64,
    /// Order changes deferred because a pass was in progress.
    pub deferred_moves: u64,
    /// Completed passes.
    pub passes: u64,
}

/// Priority-bucketed task scheduler with O(1) deregistration.
///
/// See the [module docs](self) for the design. Items are owned by the
/// scheduler only for the duration of registration; [`remove`](Self::remove)
/// hands the item back rather than destroying it.
#[derive(Debug)]
pub struct Scheduler<T> {
    arena: HandleArena<T>,
    buckets: BTreeMap<i64, Vec<TaskId>>,
    membership: FxHashMap<TaskId, i64>,
    pending_moves: Vec<TaskId>,
    in_pass: bool,
    metrics: SchedMetrics,
}

impl<T: Prioritized> Scheduler<T> {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self {
            arena: HandleArena::new(),
            buckets: BTreeMap::new(),
            membership: FxHashMap::default(),
            pending_moves: Vec::new(),
            in_pass: false,
            metrics: SchedMetrics::default(),
        }
    }

    /// Registers `item`, filing it under the bucket for its current order.
    ///
    /// Returns a stable handle for later access and removal. Within a
    /// bucket, tasks keep registration order.
    pub fn register(&mut self, item: T) -> TaskId {
        let order = item.order();
        let id = self.arena.insert(item);
        self.buckets.entry(order).or_default().push(id);
        self.membership.insert(id, order);
        self.metrics.registered += 1;
        id
    }

    /// Deregisters a task, returning the item if it was registered.
    ///
    /// Lookup is three-step: the bucket for the item's *current* order
    /// (by far the common case), then the bucket recorded in the membership
    /// index, then a full linear scan as the safety net against a stale
    /// index. Returns `None` if the handle was never registered or already
    /// removed.
    pub fn remove(&mut self, id: TaskId) -> Option<T> {
        let current = self.arena.get(id)?.order();

        if self.unlink(id, current) {
            self.metrics.direct_hits += 1;
        } else {
            let last = self.membership.get(&id).copied();
            let hit = match last {
                Some(order) if order != current => self.unlink(id, order),
                _ => false,
            };
            if hit {
                self.metrics.index_hits += 1;
            } else if !self.scan_unlink(id) {
                // Registered but not bucketed would be an invariant break;
                // still release the slot so the handle cannot leak.
                debug!("task {} missing from every bucket at removal", id.index());
            }
        }

        self.membership.remove(&id);
        self.pending_moves.retain(|&pending| pending != id);
        let item = self.arena.remove(id);
        if item.is_some() {
            self.metrics.removed += 1;
        }
        item
    }

    /// Re-buckets a task whose order value was mutated externally.
    ///
    /// Outside a pass the move happens immediately (remove-then-reinsert
    /// under the new order). During a pass the task is parked in the
    /// pending-move set and re-bucketed after the pass completes, so the
    /// bucket map is never mutated mid-iteration.
    pub fn notify_order_changed(&mut self, id: TaskId) {
        if !self.arena.contains(id) {
            return;
        }
        if self.in_pass {
            if !self.pending_moves.contains(&id) {
                self.pending_moves.push(id);
            }
            self.metrics.deferred_moves += 1;
            return;
        }
        self.apply_move(id);
    }

    /// Drives one pass over all buckets in ascending order.
    ///
    /// `f` is invoked once per registered task (insertion order within each
    /// bucket) and returns a [`PassAction`]. Reorders and removals — whether
    /// signalled through the return value or through reentrant
    /// [`notify_order_changed`](Self::notify_order_changed) calls — are
    /// applied after the iteration finishes.
    pub fn run_pass<F>(&mut self, mut f: F)
    where
        F: FnMut(TaskId, &mut T) -> PassAction,
    {
        self.in_pass = true;
        let orders: Vec<i64> = self.buckets.keys().copied().collect();
        let mut to_remove: Vec<TaskId> = Vec::new();

        for order in orders {
            let Some(ids) = self.buckets.get(&order).map(|bucket| bucket.clone()) else {
                continue;
            };
            for id in ids {
                let Some(item) = self.arena.get_mut(id) else {
                    continue;
                };
                match f(id, item) {
                    PassAction::Keep => {},
                    PassAction::Reorder => {
                        if !self.pending_moves.contains(&id) {
                            self.pending_moves.push(id);
                        }
                        self.metrics.deferred_moves += 1;
                    },
                    PassAction::Remove => to_remove.push(id),
                }
            }
        }

        self.in_pass = false;

        // Two-phase apply: removals first (a removed task voids its pending
        // move), then the collected moves.
        for id in to_remove {
            self.remove(id);
        }
        let moves = std::mem::take(&mut self.pending_moves);
        for id in moves {
            if self.arena.contains(id) {
                self.apply_move(id);
            }
        }
        self.metrics.passes += 1;
    }

    /// Returns a reference to a registered item.
    pub fn get(&self, id: TaskId) -> Option<&T> {
        self.arena.get(id)
    }

    /// Returns a mutable reference to a registered item.
    ///
    /// Mutating the order through this does not move the task; follow up
    /// with [`notify_order_changed`](Self::notify_order_changed).
    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut T> {
        self.arena.get_mut(id)
    }

    /// Returns `true` if `id` is currently registered.
    pub fn contains(&self, id: TaskId) -> bool {
        self.arena.contains(id)
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Returns `true` if no tasks are registered.
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Number of non-empty buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Returns a snapshot of the scheduler's counters.
    pub fn metrics(&self) -> SchedMetrics {
        self.metrics
    }

    /// Verifies internal invariants; intended for tests and debug builds.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantError`] describing the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let mut bucketed = 0usize;
        for (order, bucket) in &self.buckets {
            if bucket.is_empty() {
                return Err(InvariantError::new(format!(
                    "empty bucket {order} left in map"
                )));
            }
            for &id in bucket {
                if !self.arena.contains(id) {
                    return Err(InvariantError::new(format!(
                        "bucket {order} references dead task {}",
                        id.index()
                    )));
                }
                if !self.membership.contains_key(&id) {
                    return Err(InvariantError::new(format!(
                        "task {} in bucket {order} has no membership entry",
                        id.index()
                    )));
                }
            }
            bucketed += bucket.len();
        }
        if bucketed != self.arena.len() {
            return Err(InvariantError::new(format!(
                "{} tasks registered but {bucketed} bucketed",
                self.arena.len()
            )));
        }
        if !self.in_pass && !self.pending_moves.is_empty() {
            return Err(InvariantError::new(
                "pending moves left over outside a pass",
            ));
        }
        Ok(())
    }

    /// Removes `id` from the bucket keyed `order`, deleting the bucket if it
    /// empties. Returns whether the task was found there.
    fn unlink(&mut self, id: TaskId, order: i64) -> bool {
        let Some(bucket) = self.buckets.get_mut(&order) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|&entry| entry == id) else {
            return false;
        };
        bucket.remove(pos);
        if bucket.is_empty() {
            self.buckets.remove(&order);
        }
        true
    }

    /// Full linear scan across all buckets; the safety net for a stale
    /// membership index.
    fn scan_unlink(&mut self, id: TaskId) -> bool {
        self.metrics.fallback_scans += 1;
        debug!(
            "membership index stale for task {}; scanning {} buckets",
            id.index(),
            self.buckets.len()
        );
        let found = self
            .buckets
            .iter()
            .find_map(|(&order, bucket)| bucket.contains(&id).then_some(order));
        match found {
            Some(order) => self.unlink(id, order),
            None => false,
        }
    }

    /// Immediate remove-then-reinsert under the task's current order.
    fn apply_move(&mut self, id: TaskId) {
        let Some(new_order) = self.arena.get(id).map(|item| item.order()) else {
            return;
        };
        let last = self.membership.get(&id).copied();
        if last == Some(new_order) {
            // Order landed back where the task already sits.
            return;
        }
        let unlinked = match last {
            Some(order) => self.unlink(id, order) || self.scan_unlink(id),
            None => self.scan_unlink(id),
        };
        if !unlinked {
            debug!("task {} not bucketed at move time", id.index());
        }
        self.buckets.entry(new_order).or_default().push(id);
        self.membership.insert(id, new_order);
    }
}

impl<T: Prioritized> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ConcurrentScheduler
// ---------------------------------------------------------------------------

/// Thread-safe wrapper around [`Scheduler`].
///
/// Registration, removal and order notifications may come from any thread;
/// the pass is still expected to be driven by a single caller per tick.
/// Callers arriving while a pass holds the lock simply wait their turn, so
/// the single-threaded core never observes concurrent mutation.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// use framekit::sched::{ConcurrentScheduler, PassAction, Prioritized};
///
/// struct Tick(i64);
/// impl Prioritized for Tick {
///     fn order(&self) -> i64 {
///         self.0
///     }
/// }
///
/// let sched = Arc::new(ConcurrentScheduler::new());
/// let handles: Vec<_> = (0..4)
///     .map(|n| {
///         let sched = Arc::clone(&sched);
///         thread::spawn(move || sched.register(Tick(n)))
///     })
///     .collect();
/// let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
///
/// assert_eq!(sched.len(), 4);
/// for id in ids {
///     assert!(sched.remove(id).is_some());
/// }
/// ```
#[derive(Debug)]
pub struct ConcurrentScheduler<T> {
    inner: Mutex<Scheduler<T>>,
}

impl<T: Prioritized> ConcurrentScheduler<T> {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Scheduler::new()),
        }
    }

    /// Registers `item`; see [`Scheduler::register`].
    pub fn register(&self, item: T) -> TaskId {
        self.inner.lock().register(item)
    }

    /// Deregisters a task; see [`Scheduler::remove`].
    pub fn remove(&self, id: TaskId) -> Option<T> {
        self.inner.lock().remove(id)
    }

    /// Re-buckets a task; see [`Scheduler::notify_order_changed`].
    pub fn notify_order_changed(&self, id: TaskId) {
        self.inner.lock().notify_order_changed(id)
    }

    /// Drives one pass; see [`Scheduler::run_pass`]. Holds the lock for the
    /// whole tick, serializing against registration from other threads.
    pub fn run_pass<F>(&self, f: F)
    where
        F: FnMut(TaskId, &mut T) -> PassAction,
    {
        self.inner.lock().run_pass(f)
    }

    /// Runs `f` against the registered item behind `id`.
    ///
    /// The closure form sidesteps returning a reference across the lock
    /// guard.
    pub fn with_item<R>(&self, id: TaskId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.inner.lock().get_mut(id).map(f)
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if no tasks are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Returns a snapshot of the scheduler's counters.
    pub fn metrics(&self) -> SchedMetrics {
        self.inner.lock().metrics()
    }
}

impl<T: Prioritized> Default for ConcurrentScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
