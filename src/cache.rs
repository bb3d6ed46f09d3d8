//! Snapshot cache: thread-safe key→value store with conditional insert.
//!
//! Stores whole immutable value snapshots behind `Arc`, keyed for
//! equality/hash lookup. Designed for a hot read path inside a frame loop
//! that occasionally needs a network-backed fill: readers never block, and
//! the only write-side serialization is the per-key conditional insert.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        get_or_fetch(key)                             │
//! │                                                                      │
//! │   present? ──yes──► Arc::clone, done (no exclusive synchronization)  │
//! │      │                                                               │
//! │      no                                                              │
//! │      ▼                                                               │
//! │   fetch(key)  ◄── caller-supplied, runs OUTSIDE any lock, may fail   │
//! │      │                                                               │
//! │      ▼                                                               │
//! │   conditional insert (atomic per key)                                │
//! │      ├── slot still vacant ──► install fetched value, return it      │
//! │      └── another writer won ──► discard own fetch, return stored     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two `get_or_fetch` calls racing on the same absent key may *both* invoke
//! the fetch (duplicate fetch cost), but only one value is ever installed.
//! This is deliberately weaker than a single-flight cache: the structure
//! never serializes callers around an in-flight fetch.
//!
//! ## Conflict resolution on upsert
//!
//! [`insert`](SnapshotCache::insert) consults the *entry's own* policy: for
//! an occupied key, the new value replaces the old only if
//! `new.can_overwrite(existing)`. The check-and-replace runs under the key's
//! shard entry lock, so no intermediate state is observable.
//!
//! ## Key Components
//!
//! - [`Overwrite`]: replacement policy implemented by the stored value type
//! - [`SnapshotCache`]: the store itself
//! - [`RecordKey`]: ready-made composite owner+item key
//! - [`CacheMetrics`]: counter snapshot
//!
//! ## Example Usage
//!
//! ```
//! use framekit::cache::{Overwrite, RecordKey, SnapshotCache};
//! use framekit::error::FetchError;
//!
//! #[derive(Debug)]
//! struct Record {
//!     revision: u32,
//! }
//!
//! impl Overwrite for Record {
//!     fn can_overwrite(&self, existing: &Self) -> bool {
//!         self.revision > existing.revision
//!     }
//! }
//!
//! let cache = SnapshotCache::new(|key: &RecordKey| {
//!     Ok(Record { revision: key.item as u32 })
//! });
//!
//! let key = RecordKey { owner: 1, item: 7 };
//! let rec = cache.get_or_fetch(&key).unwrap();
//! assert_eq!(rec.revision, 7);
//!
//! // Stale upsert is refused by the entry's own policy
//! assert!(!cache.insert(key, Record { revision: 3 }));
//! assert_eq!(cache.get(&key).unwrap().revision, 7);
//! # let _: Result<std::sync::Arc<Record>, FetchError> = cache.get_or_fetch(&key);
//! ```
//!
//! ## Thread Safety
//!
//! All operations take `&self` and are safe for unbounded concurrent
//! callers. Values are `Arc<V>` clones that outlive any internal locking.
//! There is no eviction: entries live until the cache is dropped.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::FetchError;

/// Replacement policy implemented by cached value types.
///
/// Resolves races between two writers of the same key: the incoming value
/// asks itself whether it may replace what is already stored. Typical
/// implementations compare revisions or timestamps.
pub trait Overwrite {
    /// Returns `true` if `self` may replace `existing` under the same key.
    fn can_overwrite(&self, existing: &Self) -> bool;
}

/// Composite owner+item identifier, the common key shape for remote records.
///
/// Provided as a convenience; any `Eq + Hash + Clone` type works as a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    /// Identifier of the owning entity (player, session, shard...).
    pub owner: u64,
    /// Identifier of the item within the owner's namespace.
    pub item: u64,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    /// Lookups that found the key present.
    pub hits: u64,
    /// Lookups that found the key absent.
    pub misses: u64,
    /// Remote fetches invoked (may exceed stored entries under races).
    pub fetches: u64,
    /// Remote fetches that failed; nothing was installed.
    pub fetch_failures: u64,
    /// Fetches discarded because another writer installed the key first.
    pub race_losses: u64,
    /// Upserts that replaced an existing entry.
    pub overwrites: u64,
    /// Upserts refused by the existing entry's policy.
    pub rejected: u64,
}

/// Counters using atomics for thread-safe `Relaxed` increments.
#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    race_losses: AtomicU64,
    overwrites: AtomicU64,
    rejected: AtomicU64,
}

impl CacheCounters {
    fn snapshot(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            race_losses: self.race_losses.load(Ordering::Relaxed),
            overwrites: self.overwrites.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

type FetchFn<K, V> = dyn Fn(&K) -> Result<V, FetchError> + Send + Sync;

/// Thread-safe snapshot cache with at-most-one-stored-value semantics.
///
/// Backed by a sharded concurrent map: reads touch only a shard read lock,
/// never an exclusive section, and the miss path serializes solely on the
/// per-key conditional insert.
///
/// # Type Parameters
///
/// - `K`: key, `Eq + Hash + Clone`
/// - `V`: stored snapshot; needs [`Overwrite`] only for the upsert methods
///
/// # Example
///
/// ```
/// use framekit::cache::SnapshotCache;
///
/// let cache: SnapshotCache<u64, String> =
///     SnapshotCache::new(|id| Ok(format!("record-{id}")));
///
/// assert_eq!(*cache.get_or_fetch(&3).unwrap(), "record-3");
/// // Second call hits; the fetch function is not consulted again.
/// assert_eq!(cache.metrics().fetches, 1);
/// assert_eq!(*cache.get_or_fetch(&3).unwrap(), "record-3");
/// assert_eq!(cache.metrics().fetches, 1);
/// ```
pub struct SnapshotCache<K, V> {
    map: DashMap<K, Arc<V>>,
    fetch: Box<FetchFn<K, V>>,
    metrics: CacheCounters,
}

impl<K, V> std::fmt::Debug for SnapshotCache<K, V>
where
    K: Eq + Hash + std::fmt::Debug,
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("len", &self.map.len())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl<K, V> SnapshotCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates a cache with the given remote fetch function.
    ///
    /// The fetch runs outside any internal lock and may fail; failures
    /// propagate from [`get_or_fetch`](Self::get_or_fetch) without mutating
    /// the cache.
    pub fn new<F>(fetch: F) -> Self
    where
        F: Fn(&K) -> Result<V, FetchError> + Send + Sync + 'static,
    {
        Self {
            map: DashMap::new(),
            fetch: Box::new(fetch),
            metrics: CacheCounters::default(),
        }
    }

    /// Creates a cache pre-sized for `capacity` entries.
    pub fn with_capacity<F>(capacity: usize, fetch: F) -> Self
    where
        F: Fn(&K) -> Result<V, FetchError> + Send + Sync + 'static,
    {
        Self {
            map: DashMap::with_capacity(capacity),
            fetch: Box::new(fetch),
            metrics: CacheCounters::default(),
        }
    }

    /// Returns the stored snapshot for `key` without fetching.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        match self.map.get(key) {
            Some(entry) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(entry.value()))
            },
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            },
        }
    }

    /// Returns the snapshot for `key`, fetching it remotely on a miss.
    ///
    /// On a miss the construction-supplied fetch runs (one invocation per
    /// *call*, so concurrent misses may fetch redundantly), then a
    /// conditional insert decides the stored value: installation succeeds
    /// only if the slot is still vacant; otherwise this call's fetch result
    /// is discarded and whatever is now stored is returned.
    ///
    /// # Errors
    ///
    /// Propagates [`FetchError`] from the fetch function. No entry is
    /// installed on failure.
    pub fn get_or_fetch(&self, key: &K) -> Result<Arc<V>, FetchError> {
        if let Some(entry) = self.map.get(key) {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(entry.value()));
        }
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);

        // Fetch outside any lock; the guard above has been dropped.
        self.metrics.fetches.fetch_add(1, Ordering::Relaxed);
        let fetched = match (self.fetch)(key) {
            Ok(value) => Arc::new(value),
            Err(err) => {
                self.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            },
        };

        // Conditional insert: first writer wins, losers adopt the stored
        // value. The entry guard serializes exactly this step.
        match self.map.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                self.metrics.race_losses.fetch_add(1, Ordering::Relaxed);
                Ok(Arc::clone(occupied.get()))
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&fetched));
                Ok(fetched)
            },
        }
    }

    /// Returns `true` if `key` is present. Does not update metrics.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Current number of stored snapshots.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns a snapshot of the cache's counters.
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.snapshot()
    }
}

impl<K, V> SnapshotCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Overwrite,
{
    /// Upserts a snapshot, gated by the entry's own replacement policy.
    ///
    /// For an occupied key the new value is stored only if
    /// `value.can_overwrite(existing)`; otherwise the existing entry is
    /// kept. The check-and-replace is atomic per key regardless of how many
    /// writers race on it.
    ///
    /// Returns `true` if `value` ended up stored.
    pub fn insert(&self, key: K, value: V) -> bool {
        match self.map.entry(key) {
            Entry::Occupied(mut occupied) => {
                if value.can_overwrite(occupied.get()) {
                    occupied.insert(Arc::new(value));
                    self.metrics.overwrites.fetch_add(1, Ordering::Relaxed);
                    true
                } else {
                    self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                    false
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(value));
                true
            },
        }
    }

    /// Upserts a batch of snapshots, applying the replacement policy per key.
    ///
    /// Each key is updated atomically on its own; the batch as a whole is
    /// not a transaction. Returns how many of the entries were stored.
    pub fn insert_many(&self, entries: impl IntoIterator<Item = (K, V)>) -> usize {
        let mut stored = 0;
        for (key, value) in entries {
            if self.insert(key, value) {
                stored += 1;
            }
        }
        stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Rev(u32);

    impl Overwrite for Rev {
        fn can_overwrite(&self, existing: &Self) -> bool {
            self.0 > existing.0
        }
    }

    fn no_fetch() -> SnapshotCache<u64, Rev> {
        SnapshotCache::new(|key| Err(FetchError::new(format!("no remote for {key}"))))
    }

    #[test]
    fn get_or_fetch_installs_on_miss() {
        let cache: SnapshotCache<u64, Rev> = SnapshotCache::new(|key| Ok(Rev(*key as u32)));
        let v = cache.get_or_fetch(&5).unwrap();
        assert_eq!(*v, Rev(5));
        assert!(cache.contains(&5));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn hit_skips_fetch() {
        let cache: SnapshotCache<u64, Rev> = SnapshotCache::new(|_| Ok(Rev(1)));
        cache.get_or_fetch(&1).unwrap();
        cache.get_or_fetch(&1).unwrap();
        let m = cache.metrics();
        assert_eq!(m.fetches, 1);
        assert_eq!(m.hits, 1);
        assert_eq!(m.misses, 1);
    }

    #[test]
    fn fetch_failure_leaves_cache_untouched() {
        let cache = no_fetch();
        let err = cache.get_or_fetch(&9).unwrap_err();
        assert!(err.message().contains("9"));
        assert!(!cache.contains(&9));
        assert_eq!(cache.metrics().fetch_failures, 1);
    }

    #[test]
    fn insert_is_idempotent() {
        let cache = no_fetch();
        // Equal revisions cannot overwrite each other, so the second insert
        // is a policy rejection and the stored value is unchanged.
        assert!(cache.insert(1, Rev(5)));
        assert!(!cache.insert(1, Rev(5)));
        assert_eq!(*cache.get(&1).unwrap(), Rev(5));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn stale_insert_is_refused() {
        let cache = no_fetch();
        cache.insert(1, Rev(5));
        assert!(!cache.insert(1, Rev(3)));
        assert_eq!(*cache.get(&1).unwrap(), Rev(5));
        assert_eq!(cache.metrics().rejected, 1);
    }

    #[test]
    fn newer_insert_overwrites() {
        let cache = no_fetch();
        cache.insert(1, Rev(5));
        assert!(cache.insert(1, Rev(8)));
        assert_eq!(*cache.get(&1).unwrap(), Rev(8));
        assert_eq!(cache.metrics().overwrites, 1);
    }

    #[test]
    fn insert_many_counts_stored() {
        let cache = no_fetch();
        cache.insert(2, Rev(10));
        let stored = cache.insert_many(vec![(1, Rev(1)), (2, Rev(3)), (3, Rev(1))]);
        // key 2 refused (stale), keys 1 and 3 stored
        assert_eq!(stored, 2);
        assert_eq!(*cache.get(&2).unwrap(), Rev(10));
    }

    #[test]
    fn record_key_equality() {
        let a = RecordKey { owner: 1, item: 2 };
        let b = RecordKey { owner: 1, item: 2 };
        let c = RecordKey { owner: 1, item: 3 };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
