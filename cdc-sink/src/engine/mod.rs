//! Access to the commit-ordered event store the workers drain.

mod base;
pub mod memory;

pub use base::{EventIterator, SortEngine};
