//! Shared data-structure internals.
//!
//! Building blocks used by the public components but useful on their own.

pub mod arena;

pub use arena::{HandleArena, TaskId};
