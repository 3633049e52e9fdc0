//! Table sink workers and the pool running them.

pub mod base;
pub mod pool;
pub mod table_sink;
pub mod task;
