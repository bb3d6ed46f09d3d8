//! Error types for the framekit library.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: Returned when construction parameters are invalid
//!   (e.g. zero batch size, zero buffer size).
//! - [`InvariantError`]: Returned when internal data-structure invariants
//!   are violated (debug-only `check_invariants` methods).
//! - [`FetchError`]: Returned by [`SnapshotCache::get_or_fetch`] when the
//!   caller-supplied remote fetch fails. The cache is left untouched.
//! - [`BatchError`]: Delivered through every promise of a batch whose
//!   execution callback failed, and through promises orphaned by dispatcher
//!   shutdown.
//!
//! Removal misses and buffer size mismatches are deliberately *not* errors:
//! the scheduler reports a miss as `None` and the pool silently drops a
//! mismatched buffer. Only conditions the caller must react to are typed.
//!
//! [`SnapshotCache::get_or_fetch`]: crate::cache::SnapshotCache::get_or_fetch
//!
//! ## Example Usage
//!
//! ```
//! use framekit::batch::DispatcherConfig;
//! use framekit::error::ConfigError;
//! use std::time::Duration;
//!
//! // Fallible constructor for user-configurable parameters
//! let cfg = DispatcherConfig::try_new(16, Duration::from_millis(50));
//! assert!(cfg.is_ok());
//!
//! // Invalid batch size is caught without panicking
//! let bad: Result<_, ConfigError> = DispatcherConfig::try_new(0, Duration::from_millis(50));
//! assert!(bad.is_err());
//! ```

use std::fmt;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when construction parameters are invalid.
///
/// Produced by fallible constructors such as
/// [`DispatcherConfig::try_new`](crate::batch::DispatcherConfig::try_new) and
/// [`BufferPool::try_new`](crate::pool::BufferPool::try_new). Carries a
/// human-readable description of which parameter failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Error returned when internal structure invariants are violated.
///
/// Produced by debug-only `check_invariants` methods (e.g.
/// [`Scheduler::check_invariants`](crate::sched::Scheduler::check_invariants)).
/// Carries a human-readable description of which invariant failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvariantError {}

// ---------------------------------------------------------------------------
// FetchError
// ---------------------------------------------------------------------------

/// Error returned when a cache's remote fetch operation fails.
///
/// Surfaced unchanged to the caller of
/// [`SnapshotCache::get_or_fetch`](crate::cache::SnapshotCache::get_or_fetch);
/// no entry is installed on failure. The fetch function supplied at cache
/// construction produces these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError(String);

impl FetchError {
    /// Creates a new `FetchError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for FetchError {}

// ---------------------------------------------------------------------------
// BatchError
// ---------------------------------------------------------------------------

/// Error delivered to every promise of a failed batch.
///
/// When a batch execution callback fails, the same `BatchError` is cloned
/// into each request's promise for that batch; other in-flight batches and
/// still-pending requests are unaffected. Dispatcher shutdown delivers a
/// [`BatchError::shutdown`] to any requests still pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError(String);

impl BatchError {
    /// Creates a new `BatchError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// The error delivered to requests orphaned by dispatcher shutdown.
    #[inline]
    pub fn shutdown() -> Self {
        Self("batch dispatcher shut down before the request was dispatched".into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for BatchError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- ConfigError ------------------------------------------------------

    #[test]
    fn config_display_shows_message() {
        let err = ConfigError::new("max_batch_size must be > 0");
        assert_eq!(err.to_string(), "max_batch_size must be > 0");
    }

    #[test]
    fn config_message_accessor() {
        let err = ConfigError::new("test");
        assert_eq!(err.message(), "test");
    }

    #[test]
    fn config_clone_and_eq() {
        let a = ConfigError::new("x");
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn config_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<ConfigError>();
    }

    // -- InvariantError ---------------------------------------------------

    #[test]
    fn invariant_display_shows_message() {
        let err = InvariantError::new("empty bucket left in map");
        assert_eq!(err.to_string(), "empty bucket left in map");
    }

    #[test]
    fn invariant_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<InvariantError>();
    }

    // -- FetchError -------------------------------------------------------

    #[test]
    fn fetch_display_shows_message() {
        let err = FetchError::new("record 42 not found upstream");
        assert_eq!(err.to_string(), "record 42 not found upstream");
    }

    #[test]
    fn fetch_debug_includes_message() {
        let err = FetchError::new("timeout");
        let dbg = format!("{:?}", err);
        assert!(dbg.contains("timeout"));
    }

    #[test]
    fn fetch_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<FetchError>();
    }

    // -- BatchError -------------------------------------------------------

    #[test]
    fn batch_display_shows_message() {
        let err = BatchError::new("upstream returned 503");
        assert_eq!(err.to_string(), "upstream returned 503");
    }

    #[test]
    fn batch_shutdown_mentions_shutdown() {
        let err = BatchError::shutdown();
        assert!(err.to_string().contains("shut down"));
    }

    #[test]
    fn batch_clone_and_eq() {
        let a = BatchError::new("x");
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn batch_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<BatchError>();
    }
}
