// ABOUTME: PostgreSQL engine for the sync core, built on tokio-postgres
// ABOUTME: Reads rows as text and writes them back as untyped literals coerced by the server

use anyhow::{Context, Result};
use postgres_native_tls::MakeTlsConnector;
use std::sync::Arc;
use tokio_postgres::{Client, SimpleQueryMessage};

use super::{ConnectOptions, Database, ReadLock};
use crate::row::{Row, RowSet, Value};
use crate::table::TableRef;
use crate::utils::{quote_ident, quote_literal};

/// A single PostgreSQL session.
///
/// Snapshots go through the simple query protocol, which returns every value
/// in its canonical text form regardless of column type. Writes render values
/// as untyped string literals; PostgreSQL resolves an untyped literal to the
/// type of the column it is assigned to or compared with, so no per-column
/// type mapping is needed and numeric precision is never lost.
pub struct PostgresDatabase {
    client: Client,
    endpoint: String,
}

impl PostgresDatabase {
    /// Open a session over TLS (when the server offers it) and set `lock_timeout`.
    pub async fn connect(url: &str, endpoint: String, options: &ConnectOptions) -> Result<Self> {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(options.allow_self_signed_certs)
            .build()
            .context("Failed to build TLS connector")?;
        let tls = MakeTlsConnector::new(tls);

        let (client, connection) = tokio_postgres::connect(url, tls)
            .await
            .with_context(|| format!("Failed to connect to PostgreSQL at {}", endpoint))?;

        // The connection future drives the socket; it ends when the client is dropped
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        if let Some(timeout) = options.lock_timeout {
            client
                .batch_execute(&format!("SET lock_timeout = '{}ms'", timeout.as_millis()))
                .await
                .context("Failed to set lock_timeout")?;
        }

        Ok(Self { client, endpoint })
    }
}

impl Database for PostgresDatabase {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn begin(&mut self) -> Result<()> {
        self.client
            .batch_execute("BEGIN")
            .await
            .context("Failed to start transaction")
    }

    async fn commit(&mut self) -> Result<()> {
        self.client
            .batch_execute("COMMIT")
            .await
            .context("Failed to commit transaction")
    }

    async fn rollback(&mut self) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .context("Failed to roll back transaction")
    }

    async fn select_all(&mut self, table: &TableRef, lock: ReadLock) -> Result<RowSet> {
        let query = build_select_query(table, lock);
        let messages = self
            .client
            .simple_query(&query)
            .await
            .with_context(|| format!("Failed to read rows from {}", table))?;

        let mut columns: Option<Arc<[String]>> = None;
        let mut rows = Vec::new();

        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let columns = columns
                    .get_or_insert_with(|| {
                        row.columns()
                            .iter()
                            .map(|c| c.name().to_string())
                            .collect::<Vec<_>>()
                            .into()
                    })
                    .clone();
                let values = (0..row.len())
                    .map(|idx| Value::from(row.get(idx).map(str::to_string)))
                    .collect();
                rows.push(Row::new(columns, values));
            }
        }

        Ok(rows)
    }

    async fn upsert(&mut self, table: &TableRef, row: &Row) -> Result<u64> {
        let query = build_upsert_query(table, row);
        self.client
            .execute(query.as_str(), &[])
            .await
            .with_context(|| format!("Failed to upsert row into {}", table))
    }

    async fn delete_one(&mut self, table: &TableRef, key: &Value) -> Result<u64> {
        let query = build_delete_query(table, key);
        self.client
            .execute(query.as_str(), &[])
            .await
            .with_context(|| format!("Failed to delete row from {}", table))
    }

    async fn delete_all(&mut self, table: &TableRef) -> Result<u64> {
        let query = format!("DELETE FROM {}", table.quoted_with(quote_ident));
        self.client
            .execute(query.as_str(), &[])
            .await
            .with_context(|| format!("Failed to delete all rows from {}", table))
    }
}

fn build_select_query(table: &TableRef, lock: ReadLock) -> String {
    let table_name = table.quoted_with(quote_ident);
    match lock {
        ReadLock::None => format!("SELECT * FROM {}", table_name),
        ReadLock::ForUpdate => format!("SELECT * FROM {} FOR UPDATE", table_name),
    }
}

/// Render a value as an SQL literal.
fn to_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => quote_literal(if *b { "true" } else { "false" }),
        Value::Int(i) => quote_literal(&i.to_string()),
        Value::Float(f) => quote_literal(&f.to_string()),
        Value::Text(s) => quote_literal(s),
        Value::Bytes(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2 + 2);
            hex.push_str("\\x");
            for byte in bytes {
                hex.push_str(&format!("{:02x}", byte));
            }
            quote_literal(&hex)
        }
    }
}

/// Build an upsert statement for one row.
///
/// Generates a query like:
/// ```sql
/// INSERT INTO "schema"."table" ("id", "name") VALUES ('1', 'a')
/// ON CONFLICT ("id") DO UPDATE SET "name" = EXCLUDED."name"
/// ```
fn build_upsert_query(table: &TableRef, row: &Row) -> String {
    let quoted_columns: Vec<String> = row.columns().iter().map(|c| quote_ident(c)).collect();
    let literals: Vec<String> = row.values().iter().map(to_literal).collect();

    let update_columns: Vec<String> = row
        .columns()
        .iter()
        .filter(|c| **c != table.primary_key)
        .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c), quote_ident(c)))
        .collect();

    let update_clause = if update_columns.is_empty() {
        // Every column is the key: an existing row is already identical
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", update_columns.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        table.quoted_with(quote_ident),
        quoted_columns.join(", "),
        literals.join(", "),
        quote_ident(&table.primary_key),
        update_clause
    )
}

/// Build a delete for a single row by primary key.
///
/// PostgreSQL has no `DELETE ... LIMIT`, so the row is picked by `ctid`
/// through a limited subquery.
fn build_delete_query(table: &TableRef, key: &Value) -> String {
    let table_name = table.quoted_with(quote_ident);
    format!(
        "DELETE FROM {} WHERE ctid = (SELECT ctid FROM {} WHERE {} = {} LIMIT 1)",
        table_name,
        table_name,
        quote_ident(&table.primary_key),
        to_literal(key)
    )
}
