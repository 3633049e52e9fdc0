use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use cdc_sink_config::shared::MemoryQuotaConfig;
use metrics::{counter, gauge};
use tracing::{debug, warn};

use crate::metrics::{
    CDC_SINK_MEMORY_QUOTA_FORCE_ACQUIRES_TOTAL, CDC_SINK_MEMORY_QUOTA_OVERSHOOTS_TOTAL,
    CDC_SINK_MEMORY_QUOTA_USAGE_BYTES, TABLE_ID_LABEL,
};
use crate::types::{BatchId, INITIAL_BATCH_ID, ResolvedTs, TableId};

/// Quota bookkeeping of a single table.
#[derive(Debug)]
struct TableQuota {
    /// Bytes currently held by the table, recorded bytes included.
    acquired: u64,
    next_batch_id: BatchId,
    /// Flushed bytes waiting for the sink to confirm the resolved timestamp they belong to.
    records: Vec<(ResolvedTs, u64)>,
}

impl TableQuota {
    fn new() -> Self {
        Self {
            acquired: 0,
            next_batch_id: INITIAL_BATCH_ID,
            records: Vec::new(),
        }
    }
}

/// Global memory budget shared by all table sink workers.
///
/// The quota never blocks. Workers force-acquire what they need and check [`MemoryQuota::is_exceed`]
/// at transaction boundaries to stop early, so usage can overshoot the ceiling by roughly one grant
/// unit per active worker. Dispatchers use [`MemoryQuota::try_acquire`] to decide whether a table
/// may be scheduled at all.
///
/// Every mutation happens under one lock. The aggregate usage is mirrored in an atomic so the
/// exceedance check stays lock free.
#[derive(Debug)]
pub struct MemoryQuota {
    total_bytes: u64,
    default_grant_bytes: u64,
    overshoot_tolerance_bytes: u64,
    usage: AtomicU64,
    tables: Mutex<HashMap<TableId, TableQuota>>,
}

impl MemoryQuota {
    /// Creates a new [`MemoryQuota`] with no bytes acquired.
    ///
    /// A zero grant unit is raised to one byte so that acquisition loops always progress.
    pub fn new(config: &MemoryQuotaConfig) -> Self {
        if config.default_grant_bytes == 0 {
            warn!("memory quota configured with a zero grant unit, using one byte instead");
        }

        Self {
            total_bytes: config.total_bytes,
            default_grant_bytes: config.default_grant_bytes.max(1),
            overshoot_tolerance_bytes: config.overshoot_tolerance_bytes,
            usage: AtomicU64::new(0),
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configured ceiling.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Returns the size of one grant unit.
    pub fn default_grant_bytes(&self) -> u64 {
        self.default_grant_bytes
    }

    /// Returns the bytes currently acquired by all tables.
    pub fn usage(&self) -> u64 {
        self.usage.load(Ordering::Acquire)
    }

    /// Returns the bytes currently held by `table_id`.
    pub fn table_usage(&self, table_id: TableId) -> u64 {
        self.lock_tables()
            .get(&table_id)
            .map_or(0, |table| table.acquired)
    }

    /// Returns `true` once aggregate usage reached the ceiling.
    pub fn is_exceed(&self) -> bool {
        self.usage() >= self.total_bytes
    }

    /// Grants `bytes` to `table_id` regardless of the ceiling.
    pub fn force_acquire(&self, table_id: TableId, bytes: u64) {
        let mut tables = self.lock_tables();

        let table = tables.entry(table_id).or_insert_with(TableQuota::new);
        table.acquired = table.acquired.saturating_add(bytes);
        let usage = self.add_usage(bytes);

        counter!(
            CDC_SINK_MEMORY_QUOTA_FORCE_ACQUIRES_TOTAL,
            TABLE_ID_LABEL => table_id.to_string()
        )
        .increment(1);

        let overshoot_limit = self
            .total_bytes
            .saturating_add(self.overshoot_tolerance_bytes);
        if usage > overshoot_limit {
            counter!(
                CDC_SINK_MEMORY_QUOTA_OVERSHOOTS_TOTAL,
                TABLE_ID_LABEL => table_id.to_string()
            )
            .increment(1);

            warn!(
                %table_id,
                usage,
                total_bytes = self.total_bytes,
                overshoot_tolerance_bytes = self.overshoot_tolerance_bytes,
                "memory quota usage exceeds the overshoot tolerance"
            );
        }
    }

    /// Grants `bytes` to `table_id` only if the ceiling is not crossed.
    ///
    /// Returns whether the bytes were granted.
    pub fn try_acquire(&self, table_id: TableId, bytes: u64) -> bool {
        let mut tables = self.lock_tables();

        if self.usage().saturating_add(bytes) > self.total_bytes {
            return false;
        }

        let table = tables.entry(table_id).or_insert_with(TableQuota::new);
        table.acquired = table.acquired.saturating_add(bytes);
        self.add_usage(bytes);

        true
    }

    /// Gives back `bytes` acquired by `table_id` that were never flushed.
    ///
    /// Refunds larger than what the table holds are clamped.
    pub fn refund(&self, table_id: TableId, bytes: u64) {
        if bytes == 0 {
            return;
        }

        let mut tables = self.lock_tables();

        let Some(table) = tables.get_mut(&table_id) else {
            warn!(%table_id, bytes, "refund for a table without acquired memory ignored");
            return;
        };

        let refunded = bytes.min(table.acquired);
        if refunded < bytes {
            warn!(
                %table_id,
                bytes,
                acquired = table.acquired,
                "refund exceeds the memory held by the table, clamping"
            );
        }

        table.acquired -= refunded;
        self.sub_usage(refunded);
    }

    /// Associates `bytes` flushed by `table_id` with `resolved_ts`.
    ///
    /// The bytes stay acquired until [`MemoryQuota::release`] is called with a resolved timestamp
    /// at or above `resolved_ts`.
    pub fn record(&self, table_id: TableId, resolved_ts: ResolvedTs, bytes: u64) {
        if bytes == 0 {
            return;
        }

        let mut tables = self.lock_tables();

        let table = tables.entry(table_id).or_insert_with(TableQuota::new);
        table.records.push((resolved_ts, bytes));
    }

    /// Frees every record of `table_id` covered by `resolved_ts` and returns the freed bytes.
    pub fn release(&self, table_id: TableId, resolved_ts: ResolvedTs) -> u64 {
        let mut tables = self.lock_tables();

        let Some(table) = tables.get_mut(&table_id) else {
            return 0;
        };

        let mut freed = 0u64;
        table.records.retain(|(recorded_ts, bytes)| {
            if *recorded_ts <= resolved_ts {
                freed = freed.saturating_add(*bytes);
                false
            } else {
                true
            }
        });

        let freed = freed.min(table.acquired);
        table.acquired -= freed;
        self.sub_usage(freed);

        debug!(%table_id, %resolved_ts, freed, "released recorded memory");

        freed
    }

    /// Drops all memory and records held by `table_id` and returns the freed bytes.
    pub fn clean(&self, table_id: TableId) -> u64 {
        let mut tables = self.lock_tables();

        let Some(table) = tables.remove(&table_id) else {
            return 0;
        };

        self.sub_usage(table.acquired);

        debug!(%table_id, freed = table.acquired, "cleaned table memory");

        table.acquired
    }

    /// Returns the next batch id of `table_id`'s current transaction.
    pub fn allocate_batch_id(&self, table_id: TableId) -> BatchId {
        let mut tables = self.lock_tables();

        let table = tables.entry(table_id).or_insert_with(TableQuota::new);
        let batch_id = table.next_batch_id;
        table.next_batch_id = table.next_batch_id.saturating_add(1);

        batch_id
    }

    /// Restarts batch numbering of `table_id` for the next transaction.
    pub fn reset_batch_id(&self, table_id: TableId) {
        let mut tables = self.lock_tables();

        if let Some(table) = tables.get_mut(&table_id) {
            table.next_batch_id = INITIAL_BATCH_ID;
        }
    }

    fn lock_tables(&self) -> MutexGuard<'_, HashMap<TableId, TableQuota>> {
        // The map is consistent after every statement, so a poisoned lock is still usable.
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Callers hold the table lock.
    fn add_usage(&self, bytes: u64) -> u64 {
        let usage = self.usage().saturating_add(bytes);
        self.usage.store(usage, Ordering::Release);
        gauge!(CDC_SINK_MEMORY_QUOTA_USAGE_BYTES).set(usage as f64);

        usage
    }

    // Callers hold the table lock.
    fn sub_usage(&self, bytes: u64) -> u64 {
        let usage = self.usage().saturating_sub(bytes);
        self.usage.store(usage, Ordering::Release);
        gauge!(CDC_SINK_MEMORY_QUOTA_USAGE_BYTES).set(usage as f64);

        usage
    }
}
