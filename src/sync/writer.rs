// ABOUTME: ChangeApplier - writes upserts and single-row deletes to the destination table
// ABOUTME: One statement per row, always inside the caller's transaction

use anyhow::{anyhow, Context, Result};

use super::log::SyncLog;
use crate::db::Database;
use crate::row::{Row, Value};
use crate::table::TableRef;

/// Applies row changes to the destination.
///
/// Nothing here commits: every statement runs inside whatever transaction
/// the caller opened, and becomes visible only when the caller commits.
pub struct ChangeApplier<'a, D, L: ?Sized> {
    db: &'a mut D,
    log: &'a L,
}

impl<'a, D: Database, L: SyncLog + ?Sized> ChangeApplier<'a, D, L> {
    pub fn new(db: &'a mut D, log: &'a L) -> Self {
        Self { db, log }
    }

    /// Insert each row, overwriting every column of a row that conflicts on a
    /// primary or unique key.
    ///
    /// # Returns
    ///
    /// The number of upsert statements issued.
    pub async fn apply_upserts(&mut self, table: &TableRef, rows: &[Row]) -> Result<u64> {
        for row in rows {
            let key = primary_key_value(table, row)?;
            self.log.info(&format!(
                "Row {} = {} missing from destination {}",
                table.primary_key, key, table
            ));

            self.db
                .upsert(table, row)
                .await
                .with_context(|| format!("Failed to upsert row {} = {}", table.primary_key, key))?;
        }

        Ok(rows.len() as u64)
    }

    /// Delete one destination row per given row, matched on the primary key.
    ///
    /// Each delete is limited to a single row, so a key column that is not
    /// actually unique on the destination can never cause a mass delete.
    ///
    /// # Returns
    ///
    /// The number of delete statements issued.
    pub async fn apply_deletes(&mut self, table: &TableRef, rows: &[Row]) -> Result<u64> {
        for row in rows {
            let key = primary_key_value(table, row)?;
            self.log.info(&format!(
                "Deleting row {} = {} from destination {} since it is missing in source",
                table.primary_key, key, table
            ));

            let deleted = self
                .db
                .delete_one(table, key)
                .await
                .with_context(|| format!("Failed to delete row {} = {}", table.primary_key, key))?;

            if deleted == 0 {
                tracing::warn!(
                    "Delete of {} = {} from {} matched no rows",
                    table.primary_key,
                    key,
                    table
                );
            }
        }

        Ok(rows.len() as u64)
    }

    /// Delete every row of the destination table (fallback only).
    pub async fn wipe(&mut self, table: &TableRef) -> Result<u64> {
        let deleted = self
            .db
            .delete_all(table)
            .await
            .with_context(|| format!("Failed to wipe destination {}", table))?;

        self.log.info(&format!(
            "Deleted all {} rows from destination {}",
            deleted, table
        ));

        Ok(deleted)
    }
}

fn primary_key_value<'r>(table: &TableRef, row: &'r Row) -> Result<&'r Value> {
    row.get(&table.primary_key).ok_or_else(|| {
        anyhow!(
            "Primary key column '{}' not found in rows of {} (columns: {})",
            table.primary_key,
            table,
            row.columns().join(", ")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{FailPoint, MemoryDatabase, Operation};
    use crate::sync::log::{Level, MemoryLog};

    fn tags() -> TableRef {
        TableRef::parse("blog.tags", "id").unwrap()
    }

    fn tag(id: i64, label: &str) -> Row {
        [("id", Value::Int(id)), ("label", Value::from(label))]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn test_apply_upserts_issues_one_statement_per_row() {
        let mut db = MemoryDatabase::new("memory");
        db.create_table(&tags());
        db.insert(&tags(), [tag(1, "old")]).unwrap();
        let log = MemoryLog::new();

        let issued = ChangeApplier::new(&mut db, &log)
            .apply_upserts(&tags(), &[tag(1, "rust"), tag(2, "sql")])
            .await
            .unwrap();

        assert_eq!(issued, 2);
        assert_eq!(db.rows(&tags()), vec![tag(1, "rust"), tag(2, "sql")]);
        assert_eq!(
            log.messages(Level::Info),
            vec![
                "Row id = 1 missing from destination blog.tags",
                "Row id = 2 missing from destination blog.tags",
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_deletes_targets_primary_key() {
        let mut db = MemoryDatabase::new("memory");
        db.create_table(&tags());
        db.insert(&tags(), [tag(1, "a"), tag(2, "b")]).unwrap();
        let log = MemoryLog::new();

        let issued = ChangeApplier::new(&mut db, &log)
            .apply_deletes(&tags(), &[tag(2, "b")])
            .await
            .unwrap();

        assert_eq!(issued, 1);
        assert_eq!(db.rows(&tags()), vec![tag(1, "a")]);
        assert_eq!(
            db.operations(),
            &[Operation::Delete {
                table: "blog.tags".to_string(),
                key: Value::Int(2),
            }]
        );
    }

    #[tokio::test]
    async fn test_apply_deletes_never_removes_more_than_one_row_per_key() {
        let mut db = MemoryDatabase::new("memory");
        db.create_heap_table(&tags());
        db.insert(&tags(), [tag(7, "a"), tag(7, "b"), tag(7, "c")]).unwrap();
        let log = MemoryLog::new();

        ChangeApplier::new(&mut db, &log)
            .apply_deletes(&tags(), &[tag(7, "a")])
            .await
            .unwrap();

        assert_eq!(db.rows(&tags()).len(), 2);
    }

    #[tokio::test]
    async fn test_missing_primary_key_column_is_an_error() {
        let mut db = MemoryDatabase::new("memory");
        db.create_table(&tags());
        let log = MemoryLog::new();
        let keyless: Row = [("label", Value::from("x"))].into_iter().collect();

        let err = ChangeApplier::new(&mut db, &log)
            .apply_upserts(&tags(), &[keyless])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Primary key column 'id' not found"));
        assert_eq!(db.write_count(), 0);
    }

    #[tokio::test]
    async fn test_upsert_failure_reports_key() {
        let mut db = MemoryDatabase::new("memory");
        db.create_table(&tags());
        db.fail_on(FailPoint::Upsert, 2);
        let log = MemoryLog::new();

        let err = ChangeApplier::new(&mut db, &log)
            .apply_upserts(&tags(), &[tag(1, "a"), tag(2, "b"), tag(3, "c")])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Failed to upsert row id = 2"));
        assert_eq!(db.rows(&tags()), vec![tag(1, "a")]);
    }

    #[tokio::test]
    async fn test_wipe_deletes_everything() {
        let mut db = MemoryDatabase::new("memory");
        db.create_table(&tags());
        db.insert(&tags(), [tag(1, "a"), tag(2, "b")]).unwrap();
        let log = MemoryLog::new();

        let deleted = ChangeApplier::new(&mut db, &log)
            .wipe(&tags())
            .await
            .unwrap();

        assert_eq!(deleted, 2);
        assert!(db.rows(&tags()).is_empty());
    }
}
