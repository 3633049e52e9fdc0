use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The number of table sink workers cannot be zero.
    #[error("`worker_count` cannot be zero")]
    WorkerCountZero,
    /// The task queue must be able to hold at least one task.
    #[error("`task_queue_capacity` cannot be zero")]
    TaskQueueCapacityZero,
    /// A field holds a value outside of its accepted range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
