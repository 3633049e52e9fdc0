use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::engine::{EventIterator, SortEngine};
use crate::error::SinkResult;
use crate::types::{PolymorphicEvent, Position, TableId};

/// Key of a stored event: its transaction position followed by an arrival sequence number.
type EventKey = (Position, u64);

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<TableId, BTreeMap<EventKey, PolymorphicEvent>>,
    next_sequence: u64,
}

/// In-memory sort engine for testing and development purposes.
///
/// Events are kept per table in commit order. Events of the same transaction keep their arrival
/// order, and the last stored event of a transaction is the one reported with a valid position.
/// All data is lost when the process terminates.
#[derive(Debug, Clone, Default)]
pub struct MemorySortEngine {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySortEngine {
    /// Creates a new empty sort engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a single event.
    pub async fn add_event(&self, event: PolymorphicEvent) {
        self.add_events(vec![event]).await;
    }

    /// Stores a list of events, preserving their relative order within each transaction.
    pub async fn add_events(&self, events: Vec<PolymorphicEvent>) {
        let mut inner = self.inner.lock().await;

        for event in events {
            let sequence = inner.next_sequence;
            inner.next_sequence += 1;

            let key = (Position::new(event.commit_ts, event.start_ts), sequence);
            inner
                .tables
                .entry(event.table_id())
                .or_default()
                .insert(key, event);
        }
    }

    /// Returns the number of events stored for `table_id`.
    pub async fn event_count(&self, table_id: TableId) -> usize {
        let inner = self.inner.lock().await;
        inner.tables.get(&table_id).map_or(0, BTreeMap::len)
    }

    /// Drops every event of `table_id` committed at or before `position`.
    pub async fn clean_by_table(&self, table_id: TableId, position: Position) {
        let mut inner = self.inner.lock().await;

        if let Some(events) = inner.tables.get_mut(&table_id) {
            let upper = (position, u64::MAX);
            events.retain(|key, _| *key > upper);

            debug!(%table_id, %position, remaining = events.len(), "cleaned sort engine table");
        }
    }
}

impl SortEngine for MemorySortEngine {
    type Iterator = MemoryEventIterator;

    fn fetch_by_table(
        &self,
        table_id: TableId,
        lower: Position,
        upper: Position,
    ) -> Self::Iterator {
        MemoryEventIterator {
            inner: self.inner.clone(),
            table_id,
            upper,
            cursor: Bound::Included((lower, 0)),
        }
    }
}

/// Cursor returned by [`MemorySortEngine::fetch_by_table`].
///
/// Reads happen lazily, so events stored after the cursor was opened are visible as long as they
/// sort after the cursor.
#[derive(Debug)]
pub struct MemoryEventIterator {
    inner: Arc<Mutex<Inner>>,
    table_id: TableId,
    upper: Position,
    cursor: Bound<EventKey>,
}

impl EventIterator for MemoryEventIterator {
    async fn next(&mut self) -> SinkResult<Option<(PolymorphicEvent, Position)>> {
        let inner = self.inner.lock().await;

        let Some(events) = inner.tables.get(&self.table_id) else {
            return Ok(None);
        };

        let mut range = events.range((self.cursor, Bound::Unbounded));
        let Some((key, event)) = range.next() else {
            return Ok(None);
        };

        let (position, _) = *key;
        if position >= self.upper {
            return Ok(None);
        }

        // Only the last event of a transaction carries its position.
        let is_last_of_transaction = range
            .next()
            .is_none_or(|((next_position, _), _)| *next_position != position);
        let event_position = if is_last_of_transaction {
            position
        } else {
            Position::default()
        };

        self.cursor = Bound::Excluded(*key);

        Ok(Some((event.clone(), event_position)))
    }

    async fn close(self) -> SinkResult<()> {
        Ok(())
    }
}
