use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, SinkResult};
use crate::sink::TableSink;
use crate::types::{PolymorphicEvent, ResolvedTs, RowChangeKind, RowChangedEvent, TableId};

#[derive(Debug, Default)]
struct Inner {
    rows: Vec<RowChangedEvent>,
    resolved_ts: Option<ResolvedTs>,
}

/// In-memory table sink for testing and development purposes.
///
/// [`MemoryTableSink`] keeps every emitted row and the latest resolved timestamp. It rejects
/// events of other tables and events without columns, drops updates that change nothing and,
/// when configured to, splits updates of key columns into a delete followed by an insert.
#[derive(Debug, Clone)]
pub struct MemoryTableSink {
    table_id: TableId,
    split_key_updates: bool,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTableSink {
    /// Creates a new empty table sink for `table_id`.
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            split_key_updates: false,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Splits updates that modify key columns into a delete and an insert.
    pub fn with_split_key_updates(mut self, split_key_updates: bool) -> Self {
        self.split_key_updates = split_key_updates;
        self
    }

    /// Returns a copy of all rows emitted to this sink.
    pub async fn rows(&self) -> Vec<RowChangedEvent> {
        let inner = self.inner.lock().await;
        inner.rows.clone()
    }

    /// Returns the latest resolved timestamp, if any was published.
    pub async fn resolved_ts(&self) -> Option<ResolvedTs> {
        let inner = self.inner.lock().await;
        inner.resolved_ts
    }

    /// Clears all stored rows while keeping the watermark.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.rows.clear();
    }
}

impl TableSink for MemoryTableSink {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn verify_and_try_split_event(
        &self,
        event: PolymorphicEvent,
    ) -> SinkResult<Vec<RowChangedEvent>> {
        if event.table_id() != self.table_id {
            bail!(
                ErrorKind::ValidationError,
                "Event belongs to another table",
                "Table sink of table {} received an event of table {}",
                self.table_id,
                event.table_id()
            );
        }

        let row = event.into_row();
        let Some(kind) = row.kind() else {
            bail!(
                ErrorKind::ValidationError,
                "Event has no columns",
                "Event of table {} at commit ts {} carries neither columns nor pre columns",
                row.table_id,
                row.commit_ts
            );
        };

        if kind == RowChangeKind::Update && row.columns == row.pre_columns {
            debug!(table_id = %self.table_id, commit_ts = row.commit_ts, "dropping no-op update");
            return Ok(Vec::new());
        }

        if self.split_key_updates && row.is_key_update() {
            let delete = RowChangedEvent {
                columns: Vec::new(),
                ..row.clone()
            };
            let insert = RowChangedEvent {
                pre_columns: Vec::new(),
                ..row
            };

            return Ok(vec![delete, insert]);
        }

        Ok(vec![row])
    }

    async fn emit_row_changed_events(&self, rows: Vec<RowChangedEvent>) -> SinkResult<()> {
        let mut inner = self.inner.lock().await;

        info!(table_id = %self.table_id, "writing a batch of {} rows", rows.len());

        inner.rows.extend(rows);

        Ok(())
    }

    async fn update_resolved_ts(&self, resolved_ts: ResolvedTs) -> SinkResult<()> {
        let mut inner = self.inner.lock().await;

        if let Some(current) = inner.resolved_ts
            && resolved_ts < current
        {
            bail!(
                ErrorKind::TableSinkResolvedTsRegressed,
                "Resolved ts regressed",
                "Table sink of table {} is at {} and received {}",
                self.table_id,
                current,
                resolved_ts
            );
        }

        debug!(table_id = %self.table_id, %resolved_ts, "updated resolved ts");

        inner.resolved_ts = Some(resolved_ts);

        Ok(())
    }
}
