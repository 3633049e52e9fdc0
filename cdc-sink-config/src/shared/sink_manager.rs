use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{MemoryQuotaConfig, ValidationError, WorkerConfig};

/// Top-level configuration of the table sink delivery core.
///
/// Groups the size of the worker pool, the capacity of the shared task queue, the memory quota
/// every worker draws from and the per-worker batching settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SinkManagerConfig {
    /// Number of table sink workers running in parallel.
    #[serde(default = "default_worker_count")]
    pub worker_count: u16,
    /// Maximum number of tasks buffered in the shared task queue.
    #[serde(default = "default_task_queue_capacity")]
    pub task_queue_capacity: usize,
    /// Process-wide memory quota.
    #[serde(default)]
    pub memory_quota: MemoryQuotaConfig,
    /// Batching and watermark settings of each worker.
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl SinkManagerConfig {
    /// Default number of workers.
    pub const DEFAULT_WORKER_COUNT: u16 = 8;

    /// Default task queue capacity.
    pub const DEFAULT_TASK_QUEUE_CAPACITY: usize = 1024;

    /// Validates the whole configuration tree.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.worker_count == 0 {
            return Err(ValidationError::WorkerCountZero);
        }

        if self.task_queue_capacity == 0 {
            return Err(ValidationError::TaskQueueCapacityZero);
        }

        self.memory_quota.validate()?;
        self.worker.validate()?;

        Ok(())
    }
}

impl Default for SinkManagerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            task_queue_capacity: default_task_queue_capacity(),
            memory_quota: MemoryQuotaConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Config for SinkManagerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        SinkManagerConfig::validate(self)
    }
}

fn default_worker_count() -> u16 {
    SinkManagerConfig::DEFAULT_WORKER_COUNT
}

fn default_task_queue_capacity() -> usize {
    SinkManagerConfig::DEFAULT_TASK_QUEUE_CAPACITY
}
