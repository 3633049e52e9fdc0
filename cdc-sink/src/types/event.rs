use std::fmt;
use std::mem::size_of;

use crate::types::{SizeHint, TableId, Ts};

/// A single column value of a row change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Textual value, `None` for SQL `NULL`.
    pub value: Option<String>,
    /// Whether the column belongs to the handle key used to identify the row downstream.
    pub is_key: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, value: Option<String>, is_key: bool) -> Self {
        Self {
            name: name.into(),
            value,
            is_key,
        }
    }

    fn allocated_bytes(&self) -> usize {
        size_of::<Column>()
            .saturating_add(self.name.len())
            .saturating_add(self.value.as_ref().map_or(0, String::len))
    }
}

/// Kind of change described by a [`RowChangedEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowChangeKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for RowChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Row-level change delivered to a table sink.
///
/// An insert only has `columns`, a delete only has `pre_columns` and an update has both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChangedEvent {
    pub table_id: TableId,
    pub start_ts: Ts,
    pub commit_ts: Ts,
    pub schema_version: u64,
    pub columns: Vec<Column>,
    pub pre_columns: Vec<Column>,
}

impl RowChangedEvent {
    /// Returns the change kind, or `None` when the event carries no column at all.
    pub fn kind(&self) -> Option<RowChangeKind> {
        match (self.pre_columns.is_empty(), self.columns.is_empty()) {
            (true, false) => Some(RowChangeKind::Insert),
            (false, false) => Some(RowChangeKind::Update),
            (false, true) => Some(RowChangeKind::Delete),
            (true, true) => None,
        }
    }

    /// Returns `true` if an update modifies at least one key column.
    pub fn is_key_update(&self) -> bool {
        if self.kind() != Some(RowChangeKind::Update) {
            return false;
        }

        let key_values = |columns: &[Column]| -> Vec<(String, Option<String>)> {
            columns
                .iter()
                .filter(|column| column.is_key)
                .map(|column| (column.name.clone(), column.value.clone()))
                .collect()
        };

        key_values(&self.pre_columns) != key_values(&self.columns)
    }

    /// Returns an estimate of the bytes allocated for this event.
    pub fn approximate_bytes(&self) -> usize {
        self.columns
            .iter()
            .chain(self.pre_columns.iter())
            .fold(size_of::<RowChangedEvent>(), |total, column| {
                total.saturating_add(column.allocated_bytes())
            })
    }
}

impl SizeHint for RowChangedEvent {
    fn size_hint(&self) -> usize {
        self.approximate_bytes()
    }
}

/// Event yielded by the sort engine for one table.
///
/// The byte size is fixed when the event is built so quota accounting sees the same value on
/// acquisition and on flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolymorphicEvent {
    pub start_ts: Ts,
    pub commit_ts: Ts,
    pub row: RowChangedEvent,
    size_hint_bytes: usize,
}

impl PolymorphicEvent {
    /// Wraps a row change, estimating its size from the payload.
    pub fn new(row: RowChangedEvent) -> Self {
        let size_hint_bytes = row.approximate_bytes();

        Self::with_size_hint(row, size_hint_bytes)
    }

    /// Wraps a row change with a size reported by the storage layer.
    pub fn with_size_hint(row: RowChangedEvent, size_hint_bytes: usize) -> Self {
        Self {
            start_ts: row.start_ts,
            commit_ts: row.commit_ts,
            row,
            size_hint_bytes,
        }
    }

    pub fn table_id(&self) -> TableId {
        self.row.table_id
    }

    /// Consumes the event and returns the row payload.
    pub fn into_row(self) -> RowChangedEvent {
        self.row
    }
}

impl SizeHint for PolymorphicEvent {
    fn size_hint(&self) -> usize {
        self.size_hint_bytes
    }
}
