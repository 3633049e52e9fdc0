use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings controlling how a table sink worker batches events and advances watermarks.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Whether large transactions may be emitted to the sink in several sub-batches before the
    /// transaction is fully read.
    #[serde(default)]
    pub split_txn: bool,
    /// Number of events accumulated within a transaction before an early flush, only used when
    /// `split_txn` is enabled.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Amount of flushed bytes, in bytes, after which the sink's resolved timestamp is advanced.
    #[serde(default = "default_max_update_interval_bytes")]
    pub max_update_interval_bytes: u64,
}

impl WorkerConfig {
    /// Default number of events per mid-transaction flush.
    pub const DEFAULT_BATCH_SIZE: u64 = 256;

    /// Default flushed-bytes high-water mark: 256 MiB.
    pub const DEFAULT_MAX_UPDATE_INTERVAL_BYTES: u64 = 256 * 1024 * 1024;

    /// Validates worker settings.
    ///
    /// Ensures the batch size and the high-water mark are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "worker.batch_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.max_update_interval_bytes == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "worker.max_update_interval_bytes".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            split_txn: false,
            batch_size: default_batch_size(),
            max_update_interval_bytes: default_max_update_interval_bytes(),
        }
    }
}

fn default_batch_size() -> u64 {
    WorkerConfig::DEFAULT_BATCH_SIZE
}

fn default_max_update_interval_bytes() -> u64 {
    WorkerConfig::DEFAULT_MAX_UPDATE_INTERVAL_BYTES
}
