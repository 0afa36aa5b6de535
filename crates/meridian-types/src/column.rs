//! Column names and the column projection of a read.

use std::collections::BTreeSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

// ============================================================================
// Column Name
// ============================================================================

/// Name of a non-key column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnName(String);

impl ColumnName {
    /// Creates a column name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the column name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ColumnName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ColumnName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

// ============================================================================
// Column Set
// ============================================================================

/// The subset of a row's columns requested by a read.
///
/// Repair propagates only columns actually fetched: a read of
/// `ColumnSet::subset(["a"])` never touches column `b` on any replica,
/// even when `b` is stale there. Partial-column repair is first-class
/// behavior, not an oversight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnSet {
    /// Every column of the table (`SELECT *`).
    All,

    /// An explicit subset of columns.
    Subset(BTreeSet<ColumnName>),
}

impl ColumnSet {
    /// Creates a subset from an iterator of column names.
    pub fn subset<I, C>(columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ColumnName>,
    {
        Self::Subset(columns.into_iter().map(Into::into).collect())
    }

    /// Returns true if this projection selects every column.
    pub fn is_all(&self) -> bool {
        matches!(self, ColumnSet::All)
    }

    /// Returns true if the projection selects the given column.
    pub fn selects(&self, column: &ColumnName) -> bool {
        match self {
            ColumnSet::All => true,
            ColumnSet::Subset(columns) => columns.contains(column),
        }
    }
}

impl Display for ColumnSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnSet::All => write!(f, "*"),
            ColumnSet::Subset(columns) => {
                let mut first = true;
                for c in columns {
                    if !first {
                        write!(f, ",")?;
                    }
                    write!(f, "{c}")?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_selects_everything() {
        let set = ColumnSet::All;
        assert!(set.is_all());
        assert!(set.selects(&ColumnName::from("a")));
        assert!(set.selects(&ColumnName::from("zzz")));
    }

    #[test]
    fn subset_selects_only_members() {
        let set = ColumnSet::subset(["a", "b"]);
        assert!(!set.is_all());
        assert!(set.selects(&ColumnName::from("a")));
        assert!(set.selects(&ColumnName::from("b")));
        assert!(!set.selects(&ColumnName::from("c")));
    }

    #[test]
    fn display_forms() {
        assert_eq!(ColumnSet::All.to_string(), "*");
        assert_eq!(ColumnSet::subset(["b", "a"]).to_string(), "a,b");
    }
}
