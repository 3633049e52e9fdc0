use std::fmt;

use crate::types::Ts;

/// A point in one table's commit-ordered event stream.
///
/// Positions order by `commit_ts` first and `start_ts` second. The sort engine attaches a valid
/// position only to the last event of a transaction, every other event carries
/// [`Position::default`].
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Position {
    // Field order matters for the derived ordering.
    pub commit_ts: Ts,
    pub start_ts: Ts,
}

impl Position {
    pub fn new(commit_ts: Ts, start_ts: Ts) -> Self {
        Self {
            commit_ts,
            start_ts,
        }
    }

    /// Returns the exclusive upper bound of a fetch for the given barrier timestamp.
    ///
    /// Every event committed strictly before `barrier_ts` sorts below the returned position.
    /// Callers handle a zero barrier before calling this, since no event can be eligible then.
    pub fn upper_bound_for_barrier(barrier_ts: Ts) -> Self {
        Self {
            commit_ts: barrier_ts.saturating_sub(1),
            start_ts: barrier_ts,
        }
    }

    /// Returns `true` when this position marks a transaction boundary.
    pub fn is_valid(&self) -> bool {
        self.commit_ts != 0
    }

    /// Returns the smallest position strictly greater than `self` within the same commit.
    ///
    /// Dispatchers use it as the lower bound of a follow-up task so the last completed
    /// transaction is not read twice.
    pub fn next(&self) -> Self {
        Self {
            commit_ts: self.commit_ts,
            start_ts: self.start_ts.saturating_add(1),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.commit_ts, self.start_ts)
    }
}
