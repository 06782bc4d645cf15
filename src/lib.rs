// ABOUTME: Library root for table-syncer
// ABOUTME: Exposes the row model, database engines and the optimistic/fallback sync core

pub mod commands;
pub mod config;
pub mod db;
pub mod row;
pub mod sync;
pub mod table;
pub mod utils;

pub use row::{Row, RowSet, Value};
pub use table::{SyncJob, TableRef};
