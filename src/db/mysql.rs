// ABOUTME: MySQL engine for the sync core, built on mysql_async
// ABOUTME: Uses INSERT ... ON DUPLICATE KEY UPDATE for upserts and DELETE ... LIMIT 1 for deletes

use anyhow::{Context, Result};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts};
use std::sync::Arc;

use super::{ConnectOptions, Database, ReadLock};
use crate::row::{Row, RowSet, Value};
use crate::table::TableRef;
use crate::utils::quote_mysql_ident;

/// A single MySQL session.
///
/// Tables are read through the text protocol, so every non-NULL value comes
/// back as a string (or raw bytes for non-UTF-8 data). Source and destination
/// share column types, which makes the text forms directly comparable, and
/// MySQL converts them back to the column type on write.
pub struct MySqlDatabase {
    conn: Conn,
    endpoint: String,
}

impl MySqlDatabase {
    /// Open a session and apply the session-level lock wait timeout.
    pub async fn connect(url: &str, endpoint: String, options: &ConnectOptions) -> Result<Self> {
        let opts = Opts::from_url(url).context("Invalid MySQL connection URL")?;
        let mut conn = Conn::new(opts)
            .await
            .with_context(|| format!("Failed to connect to MySQL at {}", endpoint))?;

        if let Some(timeout) = options.lock_timeout {
            let secs = timeout.as_secs().max(1);
            conn.query_drop(format!("SET SESSION innodb_lock_wait_timeout = {}", secs))
                .await
                .context("Failed to set innodb_lock_wait_timeout")?;
        }

        Ok(Self { conn, endpoint })
    }

    pub async fn close(self) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .context("Failed to close MySQL connection")
    }
}

impl Database for MySqlDatabase {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn begin(&mut self) -> Result<()> {
        self.conn
            .query_drop("START TRANSACTION")
            .await
            .context("Failed to start transaction")
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn
            .query_drop("COMMIT")
            .await
            .context("Failed to commit transaction")
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn
            .query_drop("ROLLBACK")
            .await
            .context("Failed to roll back transaction")
    }

    async fn select_all(&mut self, table: &TableRef, lock: ReadLock) -> Result<RowSet> {
        let query = build_select_query(table, lock);
        let rows: Vec<mysql_async::Row> = self
            .conn
            .query(query)
            .await
            .with_context(|| format!("Failed to read rows from {}", table))?;

        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };

        let columns: Arc<[String]> = first
            .columns_ref()
            .iter()
            .map(|c| c.name_str().into_owned())
            .collect::<Vec<_>>()
            .into();

        Ok(rows
            .iter()
            .map(|row| {
                let values = (0..row.len())
                    .map(|idx| row.as_ref(idx).map_or(Value::Null, from_mysql_value))
                    .collect();
                Row::new(columns.clone(), values)
            })
            .collect())
    }

    async fn upsert(&mut self, table: &TableRef, row: &Row) -> Result<u64> {
        let query = build_upsert_query(table, row.columns());

        // Values are bound twice: once for the insert, once for the update
        let mut params: Vec<mysql_async::Value> = row.values().iter().map(to_mysql_value).collect();
        params.extend_from_within(..);

        self.conn
            .exec_drop(query, params)
            .await
            .with_context(|| format!("Failed to upsert row into {}", table))?;

        Ok(self.conn.affected_rows())
    }

    async fn delete_one(&mut self, table: &TableRef, key: &Value) -> Result<u64> {
        let query = build_delete_query(table);

        self.conn
            .exec_drop(query, vec![to_mysql_value(key)])
            .await
            .with_context(|| format!("Failed to delete row from {}", table))?;

        Ok(self.conn.affected_rows())
    }

    async fn delete_all(&mut self, table: &TableRef) -> Result<u64> {
        let query = format!("DELETE FROM {}", table.quoted_with(quote_mysql_ident));

        self.conn
            .query_drop(query)
            .await
            .with_context(|| format!("Failed to delete all rows from {}", table))?;

        Ok(self.conn.affected_rows())
    }
}

fn build_select_query(table: &TableRef, lock: ReadLock) -> String {
    let table_name = table.quoted_with(quote_mysql_ident);
    match lock {
        ReadLock::None => format!("SELECT * FROM {}", table_name),
        ReadLock::ForUpdate => format!("SELECT * FROM {} FOR UPDATE", table_name),
    }
}

/// Build an upsert statement for one row.
///
/// Generates a query like:
/// ```sql
/// INSERT INTO `db`.`table` SET `id` = ?, `name` = ?
/// ON DUPLICATE KEY UPDATE `id` = ?, `name` = ?
/// ```
///
/// Every column is written on both paths, so a conflicting row ends up
/// identical to the source row.
fn build_upsert_query(table: &TableRef, columns: &[String]) -> String {
    let assignments: Vec<String> = columns
        .iter()
        .map(|c| format!("{} = ?", quote_mysql_ident(c)))
        .collect();
    let assignments = assignments.join(", ");

    format!(
        "INSERT INTO {} SET {} ON DUPLICATE KEY UPDATE {}",
        table.quoted_with(quote_mysql_ident),
        assignments,
        assignments
    )
}

/// Build a delete for a single row by primary key.
///
/// `LIMIT 1` keeps the delete to one row even if the key column turns out not
/// to be unique on the destination.
fn build_delete_query(table: &TableRef) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ? LIMIT 1",
        table.quoted_with(quote_mysql_ident),
        quote_mysql_ident(&table.primary_key)
    )
}

fn from_mysql_value(value: &mysql_async::Value) -> Value {
    use mysql_async::Value as My;

    match value {
        My::NULL => Value::Null,
        My::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => Value::Text(s.to_string()),
            Err(_) => Value::Bytes(bytes.clone()),
        },
        My::Int(i) => Value::Int(*i),
        My::UInt(u) => match i64::try_from(*u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Text(u.to_string()),
        },
        My::Float(f) => Value::Float(f64::from(*f)),
        My::Double(f) => Value::Float(*f),
        My::Date(year, month, day, hour, minute, second, micros) => {
            let mut text = format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            );
            if *micros > 0 {
                text.push_str(&format!(".{:06}", micros));
            }
            Value::Text(text)
        }
        My::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_hours = u64::from(*days) * 24 + u64::from(*hours);
            let mut text = format!(
                "{}{:02}:{:02}:{:02}",
                if *negative { "-" } else { "" },
                total_hours,
                minutes,
                seconds
            );
            if *micros > 0 {
                text.push_str(&format!(".{:06}", micros));
            }
            Value::Text(text)
        }
    }
}

fn to_mysql_value(value: &Value) -> mysql_async::Value {
    use mysql_async::Value as My;

    match value {
        Value::Null => My::NULL,
        Value::Bool(b) => My::Int(i64::from(*b)),
        Value::Int(i) => My::Int(*i),
        Value::Float(f) => My::Double(*f),
        Value::Text(s) => My::Bytes(s.as_bytes().to_vec()),
        Value::Bytes(b) => My::Bytes(b.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mysql_async::Value as My;

    fn orders() -> TableRef {
        TableRef::parse("shop.orders", "id").unwrap()
    }

    #[test]
    fn test_build_select_query() {
        assert_eq!(
            build_select_query(&orders(), ReadLock::None),
            "SELECT * FROM `shop`.`orders`"
        );
        assert_eq!(
            build_select_query(&orders(), ReadLock::ForUpdate),
            "SELECT * FROM `shop`.`orders` FOR UPDATE"
        );
    }

    #[test]
    fn test_build_upsert_query() {
        let query = build_upsert_query(&orders(), &["id".to_string(), "name".to_string()]);

        assert_eq!(
            query,
            "INSERT INTO `shop`.`orders` SET `id` = ?, `name` = ? \
             ON DUPLICATE KEY UPDATE `id` = ?, `name` = ?"
        );
    }

    #[test]
    fn test_build_upsert_query_quotes_columns() {
        let table = TableRef::parse("t", "id").unwrap();
        let query = build_upsert_query(&table, &["id".to_string(), "we`ird".to_string()]);

        assert!(query.contains("`we``ird` = ?"));
    }

    #[test]
    fn test_build_delete_query_limits_to_one_row() {
        assert_eq!(
            build_delete_query(&orders()),
            "DELETE FROM `shop`.`orders` WHERE `id` = ? LIMIT 1"
        );
    }

    #[test]
    fn test_from_mysql_value_text_and_bytes() {
        assert_eq!(from_mysql_value(&My::NULL), Value::Null);
        assert_eq!(
            from_mysql_value(&My::Bytes(b"hello".to_vec())),
            Value::Text("hello".to_string())
        );
        assert_eq!(
            from_mysql_value(&My::Bytes(vec![0xff, 0xfe])),
            Value::Bytes(vec![0xff, 0xfe])
        );
        assert_eq!(
            from_mysql_value(&My::UInt(u64::MAX)),
            Value::Text(u64::MAX.to_string())
        );
        assert_eq!(from_mysql_value(&My::UInt(5)), Value::Int(5));
    }

    #[test]
    fn test_from_mysql_value_temporal() {
        assert_eq!(
            from_mysql_value(&My::Date(2024, 1, 2, 3, 4, 5, 0)),
            Value::Text("2024-01-02 03:04:05".to_string())
        );
        assert_eq!(
            from_mysql_value(&My::Date(2024, 1, 2, 3, 4, 5, 120)),
            Value::Text("2024-01-02 03:04:05.000120".to_string())
        );
        assert_eq!(
            from_mysql_value(&My::Time(true, 1, 2, 3, 4, 0)),
            Value::Text("-26:03:04".to_string())
        );
    }

    #[test]
    fn test_to_mysql_value() {
        assert_eq!(to_mysql_value(&Value::Null), My::NULL);
        assert_eq!(to_mysql_value(&Value::Bool(true)), My::Int(1));
        assert_eq!(
            to_mysql_value(&Value::Text("a".to_string())),
            My::Bytes(b"a".to_vec())
        );
        assert_eq!(to_mysql_value(&Value::Float(1.5)), My::Double(1.5));
    }
}
