//! Reconciliation: merging replica rows and computing repair directives.
//!
//! Reconciliation is pure: given the full-data responses of a read it
//! produces the winning row and, per disagreeing replica, a
//! [`RepairDirective`] restricted to the read's column set. Columns the
//! read did not fetch are never repaired, however stale they are on an
//! out-of-date replica.

use meridian_types::{ColumnSet, ReplicaId, Row, Tombstone};

use crate::message::Mutation;

// ============================================================================
// Repair Directive
// ============================================================================

/// A column-subset mutation owed to one stale replica.
///
/// Produced by [`plan_repairs`], owned by the repair writer until
/// acknowledged or abandoned.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairDirective {
    /// The replica to repair.
    pub target: ReplicaId,

    /// The winning cells (and tombstone) it is missing.
    pub mutation: Mutation,
}

/// Outcome of diffing every data response against the reconciled row.
#[derive(Debug, Default)]
pub struct RepairPlan {
    /// One directive per disagreeing replica.
    pub directives: Vec<RepairDirective>,

    /// Replicas whose data already matches the reconciled row. These
    /// count toward the repair quorum without any write.
    pub agreeing: Vec<ReplicaId>,
}

impl RepairPlan {
    /// Returns true if no replica needs repair.
    pub fn is_clean(&self) -> bool {
        self.directives.is_empty()
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Merges full-data responses into the reconciled row.
///
/// Per column the most recent cell wins; the newest row tombstone is
/// kept and shadows older cells from any replica. Ties on identical
/// timestamps resolve by the lexicographically greater value (see
/// [`meridian_types::Cell::supersedes`]); such ties cannot occur between
/// correctly functioning replicas.
pub fn reconcile<'a>(rows: impl IntoIterator<Item = (ReplicaId, &'a Row)>) -> Row {
    let mut merged = Row::new();
    for (_, row) in rows {
        for (name, cell) in row.live_cells() {
            merged.merge_cell(name.clone(), cell.clone());
        }
        if let Some(tombstone) = row.tombstone() {
            merged.merge_tombstone(tombstone);
        }
    }
    merged
}

/// Diffs each data response against the reconciled row and produces the
/// repair directives for the read's column set.
///
/// A purge-eligible tombstone is never part of a directive: a replica
/// that has already compacted the deletion away is treated as agreeing,
/// and cells the purgeable tombstone shadows are not resurrected onto
/// anyone. Replicas that supplied no data cannot be diffed and appear in
/// neither list.
pub fn plan_repairs<'a>(
    reconciled: &Row,
    rows: impl IntoIterator<Item = (ReplicaId, &'a Row)>,
    columns: &ColumnSet,
) -> RepairPlan {
    let mut plan = RepairPlan::default();

    for (replica, row) in rows {
        let mutation = diff_replica(reconciled, row, columns);
        if mutation.is_empty() {
            plan.agreeing.push(replica);
        } else {
            plan.directives.push(RepairDirective {
                target: replica,
                mutation,
            });
        }
    }
    plan
}

/// Computes what `row` is missing relative to `reconciled`, restricted to
/// `columns`.
fn diff_replica(reconciled: &Row, row: &Row, columns: &ColumnSet) -> Mutation {
    let mut mutation = Mutation::new();

    for (name, winning) in reconciled.live_cells() {
        if !columns.selects(name) {
            continue;
        }
        match row.cell(name) {
            Some(existing) if !winning.supersedes(existing) => {}
            _ => mutation.set(name.clone(), winning.clone()),
        }
    }

    if let Some(winning) = reconciled.tombstone() {
        if !winning.purge_eligible {
            let missing = match row.tombstone() {
                Some(existing) => existing.deleted_at < winning.deleted_at,
                None => true,
            };
            if missing {
                mutation.delete(Tombstone::new(winning.deleted_at));
            }
        }
    }

    mutation
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::{Cell, Timestamp};

    fn cell(value: &str, ts: u64) -> Cell {
        Cell::new(value.as_bytes().to_vec(), Timestamp::new(ts))
    }

    fn id(i: u8) -> ReplicaId {
        ReplicaId::new(i)
    }

    #[test]
    fn newest_cell_wins_reconciliation() {
        let mut old = Row::new();
        old.merge_cell("a".into(), cell("old", 1));
        let mut new = Row::new();
        new.merge_cell("a".into(), cell("new", 2));

        let merged = reconcile([(id(0), &old), (id(1), &new)]);
        assert_eq!(merged.cell(&"a".into()).unwrap().value, &b"new"[..]);
    }

    #[test]
    fn stale_replica_gets_directive_for_requested_columns_only() {
        let mut up_to_date = Row::new();
        up_to_date.merge_cell("a".into(), cell("1", 5));
        up_to_date.merge_cell("b".into(), cell("1", 5));
        let stale = Row::new();

        let a_only = ColumnSet::subset(["a"]);
        // Responses are already projected to the requested columns.
        let projected = up_to_date.project(&a_only);
        let merged = reconcile([(id(0), &projected), (id(1), &stale)]);
        let plan = plan_repairs(&merged, [(id(0), &projected), (id(1), &stale)], &a_only);

        assert_eq!(plan.agreeing, vec![id(0)]);
        assert_eq!(plan.directives.len(), 1);
        let directive = &plan.directives[0];
        assert_eq!(directive.target, id(1));
        assert_eq!(directive.mutation.cell_count(), 1);
        assert!(directive.mutation.cells.contains_key(&"a".into()));
        assert!(!directive.mutation.cells.contains_key(&"b".into()));
    }

    #[test]
    fn agreeing_replicas_produce_no_directives() {
        let mut row = Row::new();
        row.merge_cell("a".into(), cell("1", 5));

        let merged = reconcile([(id(0), &row), (id(1), &row)]);
        let plan = plan_repairs(&merged, [(id(0), &row), (id(1), &row)], &ColumnSet::All);

        assert!(plan.is_clean());
        assert_eq!(plan.agreeing, vec![id(0), id(1)]);
    }

    #[test]
    fn live_tombstone_propagates() {
        let mut deleted = Row::new();
        deleted.merge_tombstone(Tombstone::new(Timestamp::new(10)));
        let mut behind = Row::new();
        behind.merge_cell("a".into(), cell("stale", 5));

        let merged = reconcile([(id(0), &deleted), (id(1), &behind)]);
        assert!(merged.live_cell(&"a".into()).is_none());

        let plan = plan_repairs(
            &merged,
            [(id(0), &deleted), (id(1), &behind)],
            &ColumnSet::All,
        );
        assert_eq!(plan.directives.len(), 1);
        assert_eq!(plan.directives[0].target, id(1));
        let mutation = &plan.directives[0].mutation;
        assert_eq!(mutation.tombstone, Some(Tombstone::new(Timestamp::new(10))));
        assert_eq!(mutation.cell_count(), 0);
    }

    #[test]
    fn purgeable_tombstone_never_produces_directives() {
        let mut holding = Row::new();
        holding.merge_tombstone(Tombstone {
            deleted_at: Timestamp::new(10),
            purge_eligible: true,
        });
        let compacted = Row::new();

        let merged = reconcile([(id(0), &holding), (id(1), &compacted)]);
        let plan = plan_repairs(
            &merged,
            [(id(0), &holding), (id(1), &compacted)],
            &ColumnSet::All,
        );

        assert!(plan.is_clean());
        assert_eq!(plan.agreeing, vec![id(0), id(1)]);
    }

    #[test]
    fn purgeable_tombstone_does_not_resurrect_shadowed_cells() {
        let mut holding = Row::new();
        holding.merge_tombstone(Tombstone {
            deleted_at: Timestamp::new(10),
            purge_eligible: true,
        });
        let mut behind = Row::new();
        behind.merge_cell("a".into(), cell("stale", 5));

        let merged = reconcile([(id(0), &holding), (id(1), &behind)]);
        // The deletion still applies to the read result.
        assert!(merged.live_cell(&"a".into()).is_none());

        // But nothing is repaired in either direction.
        let plan = plan_repairs(
            &merged,
            [(id(0), &holding), (id(1), &behind)],
            &ColumnSet::All,
        );
        assert!(plan.is_clean());
    }

    #[test]
    fn equal_timestamps_resolve_deterministically() {
        let mut left = Row::new();
        left.merge_cell("a".into(), cell("apple", 5));
        let mut right = Row::new();
        right.merge_cell("a".into(), cell("berry", 5));

        let ab = reconcile([(id(0), &left), (id(1), &right)]);
        let ba = reconcile([(id(1), &right), (id(0), &left)]);
        assert_eq!(ab, ba);
        assert_eq!(ab.cell(&"a".into()).unwrap().value, &b"berry"[..]);
    }
}
