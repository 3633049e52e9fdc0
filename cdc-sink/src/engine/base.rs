use std::future::Future;

use crate::error::SinkResult;
use crate::types::{PolymorphicEvent, Position, TableId};

/// Forward cursor over the events of one table.
///
/// A cursor is finite and cannot be restarted. It must be closed exactly once with
/// [`EventIterator::close`] after the caller stops reading from it.
pub trait EventIterator: Send {
    /// Returns the next event together with its position.
    ///
    /// The position is valid only for the last event of a transaction. `Ok(None)` signals that
    /// the cursor is exhausted.
    fn next(
        &mut self,
    ) -> impl Future<Output = SinkResult<Option<(PolymorphicEvent, Position)>>> + Send;

    /// Releases the resources held by the cursor.
    fn close(self) -> impl Future<Output = SinkResult<()>> + Send;
}

/// Durable store of change events sorted by commit order.
///
/// Implementations must be cheap to clone since each worker holds its own handle.
pub trait SortEngine {
    /// Cursor type returned by [`SortEngine::fetch_by_table`].
    type Iterator: EventIterator;

    /// Opens a cursor over the events of `table_id` in the half-open range `[lower, upper)`,
    /// ordered by commit timestamp and then start timestamp.
    fn fetch_by_table(&self, table_id: TableId, lower: Position, upper: Position)
    -> Self::Iterator;
}
