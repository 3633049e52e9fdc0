use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Memory quota configuration shared by every table sink worker of a process.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MemoryQuotaConfig {
    /// Global ceiling, in bytes, for event data buffered between the sort engine and the sinks.
    #[serde(default = "default_total_bytes")]
    pub total_bytes: u64,
    /// Size, in bytes, of a single grant unit handed to a worker.
    ///
    /// A worker starts each task with one grant unit and force-acquires more units, one at a
    /// time, whenever an event does not fit in what it holds.
    #[serde(default = "default_grant_bytes")]
    pub default_grant_bytes: u64,
    /// Amount, in bytes, by which forced acquisitions may push usage above `total_bytes` before
    /// the overshoot is reported.
    ///
    /// Forced acquisitions always succeed, this only controls when they are flagged.
    #[serde(default = "default_overshoot_tolerance_bytes")]
    pub overshoot_tolerance_bytes: u64,
}

impl MemoryQuotaConfig {
    /// Default global ceiling: 1 GiB.
    pub const DEFAULT_TOTAL_BYTES: u64 = 1024 * 1024 * 1024;

    /// Default grant unit: 10 MiB.
    pub const DEFAULT_GRANT_BYTES: u64 = 10 * 1024 * 1024;

    /// Default overshoot tolerance: 8 grant units.
    pub const DEFAULT_OVERSHOOT_TOLERANCE_BYTES: u64 = 8 * Self::DEFAULT_GRANT_BYTES;

    /// Validates memory quota settings.
    ///
    /// Ensures both sizes are non-zero and that a single grant fits in the ceiling.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.total_bytes == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "memory_quota.total_bytes".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.default_grant_bytes == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "memory_quota.default_grant_bytes".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.default_grant_bytes > self.total_bytes {
            return Err(ValidationError::InvalidFieldValue {
                field: "memory_quota.default_grant_bytes".to_string(),
                constraint: "must be <= memory_quota.total_bytes".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for MemoryQuotaConfig {
    fn default() -> Self {
        Self {
            total_bytes: default_total_bytes(),
            default_grant_bytes: default_grant_bytes(),
            overshoot_tolerance_bytes: default_overshoot_tolerance_bytes(),
        }
    }
}

fn default_total_bytes() -> u64 {
    MemoryQuotaConfig::DEFAULT_TOTAL_BYTES
}

fn default_grant_bytes() -> u64 {
    MemoryQuotaConfig::DEFAULT_GRANT_BYTES
}

fn default_overshoot_tolerance_bytes() -> u64 {
    MemoryQuotaConfig::DEFAULT_OVERSHOOT_TOLERANCE_BYTES
}
