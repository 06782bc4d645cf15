// ABOUTME: In-memory engine implementing the Database seam with real transaction semantics
// ABOUTME: Enforces primary/unique keys, records every operation and supports failure injection

use anyhow::{anyhow, bail, Result};
use std::collections::BTreeMap;

use super::{Database, ReadLock};
use crate::row::{Row, RowSet, Value};
use crate::table::TableRef;

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Begin,
    Select,
    Upsert,
    Delete,
    DeleteAll,
    Commit,
}

/// A logical operation issued against a [`MemoryDatabase`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Begin,
    Commit,
    Rollback,
    Select { table: String, lock: ReadLock },
    Upsert { table: String, key: Value },
    Delete { table: String, key: Value },
    DeleteAll { table: String },
}

#[derive(Debug, Clone)]
struct MemTable {
    primary_key: String,
    /// Whether the primary key is enforced as unique
    keyed: bool,
    unique_columns: Vec<String>,
    rows: Vec<Row>,
}

impl MemTable {
    /// Columns whose values must be unique across rows.
    fn unique_keys(&self) -> impl Iterator<Item = &str> {
        let primary = self.keyed.then_some(self.primary_key.as_str());
        primary
            .into_iter()
            .chain(self.unique_columns.iter().map(String::as_str))
    }

    /// Index of the first row that shares a unique value with `row`.
    fn find_conflict(&self, row: &Row) -> Option<usize> {
        self.rows.iter().position(|existing| {
            self.unique_keys()
                .any(|column| shares_value(existing, row, column))
        })
    }

    /// Check that `row` placed at `slot` (None = appended) breaks no unique key.
    fn check_unique(&self, row: &Row, slot: Option<usize>) -> Result<()> {
        for column in self.unique_keys() {
            let clash = self
                .rows
                .iter()
                .enumerate()
                .filter(|(idx, _)| Some(*idx) != slot)
                .any(|(_, existing)| shares_value(existing, row, column));
            if clash {
                let value = row.get(column).cloned().unwrap_or(Value::Null);
                bail!("Duplicate entry '{}' for key '{}'", value, column);
            }
        }
        Ok(())
    }
}

/// NULLs never collide, as in SQL unique indexes.
fn shares_value(a: &Row, b: &Row, column: &str) -> bool {
    match (a.get(column), b.get(column)) {
        (Some(x), Some(y)) => !x.is_null() && x == y,
        _ => false,
    }
}

/// A database held entirely in memory.
///
/// Writes issued between `begin` and `commit` go to a private copy of the
/// tables that `rollback` discards, so partially applied attempts are never
/// visible through [`MemoryDatabase::rows`]. Writes outside a transaction
/// apply immediately. Upserts follow MySQL's `ON DUPLICATE KEY UPDATE`: the
/// first row sharing any unique value is overwritten, and the statement fails
/// if the overwritten row would then clash with another row.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    endpoint: String,
    committed: BTreeMap<String, MemTable>,
    pending: Option<BTreeMap<String, MemTable>>,
    operations: Vec<Operation>,
    /// Armed failures: (point, calls of that kind left before failing)
    failures: Vec<(FailPoint, usize)>,
}

impl MemoryDatabase {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..Self::default()
        }
    }

    /// Create a table whose primary key is enforced as unique.
    pub fn create_table(&mut self, table: &TableRef) {
        self.create_table_with_unique(table, &[]);
    }

    /// Create a table with a unique primary key plus extra unique columns.
    pub fn create_table_with_unique(&mut self, table: &TableRef, unique_columns: &[&str]) {
        self.add_table(table, true, unique_columns);
    }

    /// Create a table without any key constraints.
    pub fn create_heap_table(&mut self, table: &TableRef) {
        self.add_table(table, false, &[]);
    }

    fn add_table(&mut self, table: &TableRef, keyed: bool, unique_columns: &[&str]) {
        self.committed.insert(
            table.qualified_name(),
            MemTable {
                primary_key: table.primary_key.clone(),
                keyed,
                unique_columns: unique_columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
    }

    /// Load committed rows directly, enforcing constraints but recording nothing.
    pub fn insert(&mut self, table: &TableRef, rows: impl IntoIterator<Item = Row>) -> Result<()> {
        let target = self
            .committed
            .get_mut(&table.qualified_name())
            .ok_or_else(|| missing_table(table))?;
        for row in rows {
            target.check_unique(&row, None)?;
            target.rows.push(row);
        }
        Ok(())
    }

    /// Committed rows of a table, in storage order.
    pub fn rows(&self, table: &TableRef) -> Vec<Row> {
        self.committed
            .get(&table.qualified_name())
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn clear_operations(&mut self) {
        self.operations.clear();
    }

    /// Number of recorded row writes (upserts, single deletes and wipes).
    pub fn write_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| {
                matches!(
                    op,
                    Operation::Upsert { .. } | Operation::Delete { .. } | Operation::DeleteAll { .. }
                )
            })
            .count()
    }

    /// Make the `nth` (1-based) future call of `point` fail.
    pub fn fail_on(&mut self, point: FailPoint, nth: usize) {
        self.failures.push((point, nth.max(1)));
    }

    fn check_failure(&mut self, point: FailPoint) -> Result<()> {
        let mut triggered = false;
        self.failures.retain_mut(|(armed, remaining)| {
            if *armed != point {
                return true;
            }
            *remaining -= 1;
            if *remaining == 0 {
                triggered = true;
                return false;
            }
            true
        });
        if triggered {
            bail!("Injected failure at {:?} on {}", point, self.endpoint);
        }
        Ok(())
    }

    fn tables(&self) -> &BTreeMap<String, MemTable> {
        self.pending.as_ref().unwrap_or(&self.committed)
    }

    fn table_mut(&mut self, table: &TableRef) -> Result<&mut MemTable> {
        let tables = self.pending.as_mut().unwrap_or(&mut self.committed);
        tables
            .get_mut(&table.qualified_name())
            .ok_or_else(|| missing_table(table))
    }
}

fn missing_table(table: &TableRef) -> anyhow::Error {
    anyhow!("Table '{}' doesn't exist", table)
}

impl Database for MemoryDatabase {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn begin(&mut self) -> Result<()> {
        self.check_failure(FailPoint::Begin)?;
        if self.pending.is_some() {
            bail!("Transaction already in progress on {}", self.endpoint);
        }
        self.operations.push(Operation::Begin);
        self.pending = Some(self.committed.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.check_failure(FailPoint::Commit)?;
        self.operations.push(Operation::Commit);
        if let Some(tables) = self.pending.take() {
            self.committed = tables;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.operations.push(Operation::Rollback);
        self.pending = None;
        Ok(())
    }

    async fn select_all(&mut self, table: &TableRef, lock: ReadLock) -> Result<RowSet> {
        self.check_failure(FailPoint::Select)?;
        self.operations.push(Operation::Select {
            table: table.qualified_name(),
            lock,
        });
        self.tables()
            .get(&table.qualified_name())
            .map(|t| t.rows.clone())
            .ok_or_else(|| missing_table(table))
    }

    async fn upsert(&mut self, table: &TableRef, row: &Row) -> Result<u64> {
        self.check_failure(FailPoint::Upsert)?;
        self.operations.push(Operation::Upsert {
            table: table.qualified_name(),
            key: row.get(&table.primary_key).cloned().unwrap_or(Value::Null),
        });

        let target = self.table_mut(table)?;
        match target.find_conflict(row) {
            Some(idx) => {
                target.check_unique(row, Some(idx))?;
                target.rows[idx] = row.clone();
                Ok(2)
            }
            None => {
                target.check_unique(row, None)?;
                target.rows.push(row.clone());
                Ok(1)
            }
        }
    }

    async fn delete_one(&mut self, table: &TableRef, key: &Value) -> Result<u64> {
        self.check_failure(FailPoint::Delete)?;
        self.operations.push(Operation::Delete {
            table: table.qualified_name(),
            key: key.clone(),
        });

        let target = self.table_mut(table)?;
        let primary_key = target.primary_key.clone();
        match target
            .rows
            .iter()
            .position(|r| r.get(&primary_key) == Some(key) && !key.is_null())
        {
            Some(idx) => {
                target.rows.remove(idx);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_all(&mut self, table: &TableRef) -> Result<u64> {
        self.check_failure(FailPoint::DeleteAll)?;
        self.operations.push(Operation::DeleteAll {
            table: table.qualified_name(),
        });

        let target = self.table_mut(table)?;
        let count = target.rows.len() as u64;
        target.rows.clear();
        Ok(count)
    }
}
