use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, SinkResult};

/// Triggered right before a worker emits a batch of events to a table sink.
pub const TABLE_SINK_WORKER_BEFORE_EMIT: &str = "table_sink_worker.before_emit";

/// Triggered right before a worker publishes a resolved timestamp.
pub const TABLE_SINK_WORKER_BEFORE_RESOLVED_TS: &str = "table_sink_worker.before_resolved_ts";

/// Evaluates the fail point `name`, returning an error when it is configured to `return`.
///
/// The optional fail point parameter is copied into the error detail.
pub fn sink_fail_point(name: &str) -> SinkResult<()> {
    fail_point!(name, |parameter| {
        bail!(
            ErrorKind::TableSinkError,
            "An error occurred in a fail point",
            "The failpoint '{}' returned an error ({})",
            name,
            parameter.unwrap_or_default()
        );
    });

    Ok(())
}
