// ABOUTME: SnapshotReader - loads the full contents of a table as a RowSet
// ABOUTME: Destination reads take row write locks, source reads take none

use anyhow::{Context, Result};

use crate::db::{Database, ReadLock};
use crate::row::RowSet;
use crate::table::TableRef;

/// Reads complete table snapshots (`SELECT *`) through a database session.
///
/// Errors are returned to the caller with the table and server attached;
/// the reader never retries.
pub struct SnapshotReader<'a, D> {
    db: &'a mut D,
}

impl<'a, D: Database> SnapshotReader<'a, D> {
    pub fn new(db: &'a mut D) -> Self {
        Self { db }
    }

    /// Read every row of `table`.
    ///
    /// With [`ReadLock::ForUpdate`] the rows stay write-locked until the
    /// enclosing transaction ends, so no other writer can change them between
    /// this read and the writes that depend on it.
    pub async fn read(&mut self, table: &TableRef, lock: ReadLock) -> Result<RowSet> {
        let rows = self.db.select_all(table, lock).await.with_context(|| {
            format!(
                "Failed to read snapshot of {} from {}",
                table,
                self.db.endpoint()
            )
        })?;

        tracing::debug!(
            "Read {} rows from {} on {} ({:?})",
            rows.len(),
            table,
            self.db.endpoint(),
            lock
        );

        Ok(rows)
    }
}
