use std::fmt;
use std::str::FromStr;

/// Logical timestamp assigned by the upstream timestamp oracle.
pub type Ts = u64;

/// Identifier of a replicated table.
///
/// The newtype keeps raw integers from being passed where a table is expected.
#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct TableId(pub i64);

impl TableId {
    /// Creates a new [`TableId`].
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the underlying identifier.
    pub fn into_inner(self) -> i64 {
        self.0
    }
}

impl From<i64> for TableId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TableId {
    type Err = <i64 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(TableId::new)
    }
}
