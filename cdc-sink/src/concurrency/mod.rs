//! Concurrency primitives shared by table sink workers.
//!
//! The [`memory_quota`] module bounds the memory buffered by all workers and the [`shutdown`]
//! module stops idle workers.

pub mod memory_quota;
pub mod shutdown;
