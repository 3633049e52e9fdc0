use crate::types::{Column, PolymorphicEvent, RowChangedEvent, TableId, Ts};

/// Builds an insert row change with a single key column.
pub fn insert_row(table_id: TableId, commit_ts: Ts, start_ts: Ts, key: u64) -> RowChangedEvent {
    RowChangedEvent {
        table_id,
        start_ts,
        commit_ts,
        schema_version: 1,
        columns: vec![Column::new("id", Some(key.to_string()), true)],
        pre_columns: Vec::new(),
    }
}

/// Builds an update row change moving the key from `old_key` to `new_key`.
pub fn key_update_row(
    table_id: TableId,
    commit_ts: Ts,
    start_ts: Ts,
    old_key: u64,
    new_key: u64,
) -> RowChangedEvent {
    RowChangedEvent {
        table_id,
        start_ts,
        commit_ts,
        schema_version: 1,
        columns: vec![Column::new("id", Some(new_key.to_string()), true)],
        pre_columns: vec![Column::new("id", Some(old_key.to_string()), true)],
    }
}

/// Builds an insert event reporting exactly `size` bytes.
pub fn insert_event(
    table_id: TableId,
    commit_ts: Ts,
    start_ts: Ts,
    size: usize,
) -> PolymorphicEvent {
    PolymorphicEvent::with_size_hint(insert_row(table_id, commit_ts, start_ts, commit_ts), size)
}

/// Builds the `len` events of one transaction, each reporting `size` bytes.
///
/// Every event inserts a distinct key so rows can be told apart downstream.
pub fn transaction(
    table_id: TableId,
    commit_ts: Ts,
    start_ts: Ts,
    len: usize,
    size: usize,
) -> Vec<PolymorphicEvent> {
    (0..len)
        .map(|index| {
            let row = insert_row(table_id, commit_ts, start_ts, commit_ts * 1_000 + index as u64);
            PolymorphicEvent::with_size_hint(row, size)
        })
        .collect()
}
