// ABOUTME: Table reconciliation core - snapshot reads, row diffing, change application
// ABOUTME: Optimistic diff-based sync with a wipe-and-reload fallback inside destination transactions

pub mod differ;
pub mod log;
pub mod reader;
pub mod reconciler;
pub mod writer;

pub use differ::{diff, DiffResult};
pub use log::{Level, MemoryLog, SyncLog, TracingLog};
pub use reader::SnapshotReader;
pub use reconciler::{JobReport, PassStats, ReconcileOptions, Reconciler, SyncOutcome};
pub use writer::ChangeApplier;
