// ABOUTME: Table references and sync jobs (source table, destination table, primary key)
// ABOUTME: Parses the `src_db.src_tbl:dst_db.dst_tbl:pk` job syntax used by the CLI

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::validate_identifier;

/// A possibly schema-qualified table plus the name of its primary-key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    /// Schema (PostgreSQL) or database (MySQL) qualifier, if any
    pub schema: Option<String>,
    pub name: String,
    pub primary_key: String,
}

impl TableRef {
    pub fn new(schema: Option<&str>, name: &str, primary_key: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
            primary_key: primary_key.to_string(),
        }
    }

    /// Parse `[schema.]table` and attach a primary-key column.
    ///
    /// Only the first `.` separates schema from table.
    pub fn parse(qualified: &str, primary_key: &str) -> Result<Self> {
        let qualified = qualified.trim();
        let (schema, name) = match qualified.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, qualified),
        };

        if let Some(schema) = schema {
            validate_identifier(schema).context("Invalid schema name")?;
        }
        validate_identifier(name).context("Invalid table name")?;
        validate_identifier(primary_key.trim()).context("Invalid primary key column")?;

        Ok(Self::new(schema, name, primary_key.trim()))
    }

    /// The qualified name as `schema.table` (or just `table`).
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }

    /// Render the qualified name with an engine-specific identifier quoter.
    pub fn quoted_with(&self, quote: impl Fn(&str) -> String) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote(schema), quote(&self.name)),
            None => quote(&self.name),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// One table to reconcile: the destination is made an exact copy of the source.
///
/// Both tables are assumed to have identical columns, types and keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncJob {
    pub source: TableRef,
    pub destination: TableRef,
}

impl SyncJob {
    /// Build a job where both sides share the same primary-key column.
    pub fn new(source: &str, destination: &str, primary_key: &str) -> Result<Self> {
        Ok(Self {
            source: TableRef::parse(source, primary_key)
                .with_context(|| format!("Invalid source table '{}'", source))?,
            destination: TableRef::parse(destination, primary_key)
                .with_context(|| format!("Invalid destination table '{}'", destination))?,
        })
    }
}

impl fmt::Display for SyncJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

/// Parses `src_db.src_tbl:dst_db.dst_tbl:pk`.
impl FromStr for SyncJob {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            bail!(
                "Invalid table mapping '{}'. Expected format: source_table:destination_table:primary_key \
                 (e.g., shop.orders:replica.orders:id)",
                s
            );
        }
        SyncJob::new(parts[0], parts[1], parts[2])
    }
}
