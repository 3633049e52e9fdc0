//! Delivery core of a change data capture sink.
//!
//! Workers drain per-table events from a commit-ordered sort engine into table sinks, bounded by
//! a shared [`concurrency::memory_quota::MemoryQuota`], and advance each table's resolved
//! timestamp once the rows it covers have been flushed.

pub mod concurrency;
pub mod engine;
pub mod error;
pub mod failpoints;
mod macros;
pub mod metrics;
pub mod redo;
pub mod sink;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
