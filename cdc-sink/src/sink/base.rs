use std::future::Future;

use crate::error::SinkResult;
use crate::types::{PolymorphicEvent, ResolvedTs, RowChangedEvent, TableId};

/// Per-table writer towards the downstream system.
///
/// A table sink is driven by exactly one worker at a time, the one owning the current task of
/// its table, so implementations do not need to order concurrent calls. They must be cheap to
/// clone since the handle travels inside each task.
///
/// Bytes of flushed rows stay acquired in the shared
/// [`MemoryQuota`](crate::concurrency::memory_quota::MemoryQuota) after the worker publishes a
/// resolved timestamp. Whoever flushes the sink downstream owns freeing them: once every row up
/// to a resolved timestamp is durable, call
/// [`MemoryQuota::release`](crate::concurrency::memory_quota::MemoryQuota::release) with the
/// table id and that resolved timestamp, and call
/// [`MemoryQuota::clean`](crate::concurrency::memory_quota::MemoryQuota::clean) when the table is
/// removed. Until then the bytes count against the ceiling and keep tasks of every table
/// stopping early.
pub trait TableSink {
    /// Returns the table this sink writes.
    fn table_id(&self) -> TableId;

    /// Checks an event read from the sort engine and converts it into the row changes to emit.
    ///
    /// An event may be split into several row changes or filtered out entirely. Returning an
    /// error aborts the task.
    fn verify_and_try_split_event(
        &self,
        event: PolymorphicEvent,
    ) -> SinkResult<Vec<RowChangedEvent>>;

    /// Buffers row changes for writing.
    ///
    /// Rows are handed over in commit order and become durable at the latest once a resolved
    /// timestamp covering them is published.
    fn emit_row_changed_events(
        &self,
        rows: Vec<RowChangedEvent>,
    ) -> impl Future<Output = SinkResult<()>> + Send;

    /// Advances the watermark of the table.
    ///
    /// Implementations may reject a resolved timestamp lower than the current one with
    /// [`crate::error::ErrorKind::TableSinkResolvedTsRegressed`].
    fn update_resolved_ts(
        &self,
        resolved_ts: ResolvedTs,
    ) -> impl Future<Output = SinkResult<()>> + Send;
}
