//! Metric names and labels emitted by the table sink delivery core.

/// Label for the table id in metrics.
pub const TABLE_ID_LABEL: &str = "table_id";

/// Label for the worker id in metrics.
pub const WORKER_ID_LABEL: &str = "worker_id";

/// Label for the resolved timestamp mode in metrics.
pub const RESOLVED_MODE_LABEL: &str = "mode";

/// Label for the reason a flush happened.
pub const FLUSH_REASON_LABEL: &str = "reason";

/// Label for the component a failure is attributed to.
pub const ERROR_COMPONENT_LABEL: &str = "component";

// Memory quota metrics

/// Gauge for bytes currently acquired from the memory quota.
pub const CDC_SINK_MEMORY_QUOTA_USAGE_BYTES: &str = "cdc_sink_memory_quota_usage_bytes";

/// Counter for grant units handed out through forced acquisition.
pub const CDC_SINK_MEMORY_QUOTA_FORCE_ACQUIRES_TOTAL: &str =
    "cdc_sink_memory_quota_force_acquires_total";

/// Counter for forced acquisitions that pushed usage past the overshoot tolerance.
pub const CDC_SINK_MEMORY_QUOTA_OVERSHOOTS_TOTAL: &str = "cdc_sink_memory_quota_overshoots_total";

// Worker metrics

/// Counter for bytes flushed to table sinks.
pub const CDC_SINK_FLUSHED_BYTES_TOTAL: &str = "cdc_sink_flushed_bytes_total";

/// Counter for row change events emitted to table sinks.
pub const CDC_SINK_EMITTED_ROWS_TOTAL: &str = "cdc_sink_emitted_rows_total";

/// Counter for flushes, labeled by reason (`txn_boundary` or `batch_size`).
pub const CDC_SINK_FLUSHES_TOTAL: &str = "cdc_sink_flushes_total";

/// Counter for resolved timestamps published to table sinks.
pub const CDC_SINK_RESOLVED_TS_PUBLISHED_TOTAL: &str = "cdc_sink_resolved_ts_published_total";

/// Counter for tasks stopped early because the memory quota was exceeded.
pub const CDC_SINK_TASK_EARLY_STOPS_TOTAL: &str = "cdc_sink_task_early_stops_total";

/// Counter for tasks completed by workers.
pub const CDC_SINK_TASKS_COMPLETED_TOTAL: &str = "cdc_sink_tasks_completed_total";

/// Counter for workers aborted by a failed task, labeled by the failing component.
pub const CDC_SINK_WORKER_ABORTS_TOTAL: &str = "cdc_sink_worker_aborts_total";

/// Histogram for the wall-clock duration of a task, in seconds.
pub const CDC_SINK_TASK_DURATION_SECONDS: &str = "cdc_sink_task_duration_seconds";
