//! Downstream table sinks receiving row changes and resolved timestamps.

mod base;
pub mod memory;

pub use base::TableSink;
