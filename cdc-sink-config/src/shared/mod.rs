//! Shared configuration types for the table sink delivery core.

mod base;
mod memory_quota;
mod sink_manager;
mod worker;

pub use base::ValidationError;
pub use memory_quota::MemoryQuotaConfig;
pub use sink_manager::SinkManagerConfig;
pub use worker::WorkerConfig;
