// ABOUTME: Command implementations for the table-syncer CLI
// ABOUTME: Exports the sync command and its run summary

pub mod sync;

pub use sync::{sync, SyncCommand, SyncSummary};
