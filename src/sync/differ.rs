// ABOUTME: Row differ - computes the rows to upsert and the rows to delete
// ABOUTME: Set difference under full-row equality using a content-hash index

use std::collections::HashMap;

use crate::row::{Row, RowSet};

/// Rows that must change for the destination to match the source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Source rows with no identical row in the destination
    pub to_upsert: RowSet,
    /// Destination rows with no identical row in the source
    pub to_delete: RowSet,
}

impl DiffResult {
    /// True when source and destination are set-equal.
    pub fn is_empty(&self) -> bool {
        self.to_upsert.is_empty() && self.to_delete.is_empty()
    }
}

/// Rows bucketed by content fingerprint.
///
/// A bucket hit is only a candidate; membership is confirmed with full-row
/// equality so a fingerprint collision can never hide a difference.
struct RowIndex<'a> {
    buckets: HashMap<[u8; 32], Vec<&'a Row>>,
}

impl<'a> RowIndex<'a> {
    fn build(rows: &'a [Row]) -> Self {
        let mut buckets: HashMap<[u8; 32], Vec<&'a Row>> = HashMap::with_capacity(rows.len());
        for row in rows {
            buckets.entry(row.fingerprint()).or_default().push(row);
        }
        Self { buckets }
    }

    fn contains(&self, row: &Row) -> bool {
        self.buckets
            .get(&row.fingerprint())
            .is_some_and(|candidates| candidates.iter().any(|candidate| *candidate == row))
    }
}

/// Rows of `rows` that have no full-equality match anywhere in `other`.
///
/// Input order is preserved, and duplicates in `rows` are kept.
pub fn unmatched(rows: &[Row], other: &[Row]) -> RowSet {
    let index = RowIndex::build(other);
    rows.iter()
        .filter(|row| !index.contains(row))
        .cloned()
        .collect()
}

/// Compare a source snapshot against a destination snapshot.
///
/// A destination row that differs from its source counterpart in any column
/// shows up in both halves of the result. Callers that apply upserts first
/// must re-read the destination and diff again before deleting.
pub fn diff(source: &[Row], destination: &[Row]) -> DiffResult {
    DiffResult {
        to_upsert: unmatched(source, destination),
        to_delete: unmatched(destination, source),
    }
}
