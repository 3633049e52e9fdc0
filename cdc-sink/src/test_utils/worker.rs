use std::sync::Arc;

use cdc_sink_config::shared::{MemoryQuotaConfig, WorkerConfig};

use crate::concurrency::memory_quota::MemoryQuota;

/// Returns a worker configuration with the given splitting behavior.
pub fn worker_config(
    split_txn: bool,
    batch_size: u64,
    max_update_interval_bytes: u64,
) -> WorkerConfig {
    WorkerConfig {
        split_txn,
        batch_size,
        max_update_interval_bytes,
    }
}

/// Returns a memory quota with the given ceiling and grant unit.
pub fn memory_quota(total_bytes: u64, default_grant_bytes: u64) -> Arc<MemoryQuota> {
    Arc::new(MemoryQuota::new(&MemoryQuotaConfig {
        total_bytes,
        default_grant_bytes,
        overshoot_tolerance_bytes: default_grant_bytes,
    }))
}
