use std::cmp::Ordering;
use std::fmt;

use crate::types::Ts;

/// Sub-batch number inside a single commit timestamp.
pub type BatchId = u64;

/// First batch id handed out after a reset.
pub const INITIAL_BATCH_ID: BatchId = 1;

/// How much of a commit timestamp a [`ResolvedTs`] covers.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ResolvedMode {
    /// Everything up to and including the commit timestamp has been sunk.
    Normal,
    /// Everything up to the given sub-batch of the commit timestamp has been sunk.
    Batch(BatchId),
}

/// Per-table watermark published to table sinks.
///
/// Ordering is by `ts`. At equal `ts`, batch values sort below the normal value and compare by
/// batch id among themselves, so a sequence of split flushes followed by the transaction's
/// boundary publish is strictly increasing.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ResolvedTs {
    pub ts: Ts,
    pub mode: ResolvedMode,
}

impl ResolvedTs {
    /// Creates a normal-mode resolved timestamp.
    pub fn new(ts: Ts) -> Self {
        Self {
            ts,
            mode: ResolvedMode::Normal,
        }
    }

    /// Creates a batch-mode resolved timestamp.
    pub fn new_batch(ts: Ts, batch_id: BatchId) -> Self {
        Self {
            ts,
            mode: ResolvedMode::Batch(batch_id),
        }
    }

    pub fn is_batch_mode(&self) -> bool {
        matches!(self.mode, ResolvedMode::Batch(_))
    }

    /// Returns the batch id, if any.
    pub fn batch_id(&self) -> Option<BatchId> {
        match self.mode {
            ResolvedMode::Normal => None,
            ResolvedMode::Batch(batch_id) => Some(batch_id),
        }
    }

    /// Returns the label used in logs and metrics for the mode.
    pub fn mode_name(&self) -> &'static str {
        match self.mode {
            ResolvedMode::Normal => "normal",
            ResolvedMode::Batch(_) => "batch",
        }
    }

    fn order_key(&self) -> (Ts, bool, BatchId) {
        match self.mode {
            ResolvedMode::Normal => (self.ts, true, 0),
            ResolvedMode::Batch(batch_id) => (self.ts, false, batch_id),
        }
    }
}

impl Ord for ResolvedTs {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

impl PartialOrd for ResolvedTs {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ResolvedTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            ResolvedMode::Normal => write!(f, "{}", self.ts),
            ResolvedMode::Batch(batch_id) => write!(f, "{}#{}", self.ts, batch_id),
        }
    }
}
