// ABOUTME: Reconciler - runs one table sync: optimistic diff-and-patch, then wipe-and-reload fallback
// ABOUTME: Every destination write happens inside a transaction that is fully committed or rolled back

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

use super::differ::diff;
use super::log::SyncLog;
use super::reader::SnapshotReader;
use super::writer::ChangeApplier;
use crate::db::{Database, ReadLock};
use crate::table::SyncJob;

/// Behaviour switches for a reconciliation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// Run the full protocol but roll back instead of committing
    pub dry_run: bool,
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The diff-based attempt committed
    Optimistic,
    /// The diff-based attempt failed and the wipe-and-reload attempt committed
    Fallback,
    /// Both attempts failed; the destination is unchanged
    Failed,
}

/// Write counts of the attempt that finished the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    pub source_rows: u64,
    pub upserted: u64,
    pub deleted: u64,
    /// Rows removed by the fallback wipe
    pub wiped: u64,
}

/// Result of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: SyncJob,
    pub outcome: SyncOutcome,
    pub stats: PassStats,
    pub dry_run: bool,
    /// Why the optimistic attempt failed, when it did
    pub optimistic_error: Option<String>,
    /// Why the fallback attempt failed, when it did
    pub fallback_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.outcome != SyncOutcome::Failed
    }
}

/// Makes a destination table an exact copy of a source table.
///
/// A run goes through at most two attempts, each in its own destination
/// transaction:
///
/// 1. Optimistic: upsert the source rows missing from the destination, re-read
///    the destination, delete the rows missing from the source, commit.
/// 2. Fallback, only if the optimistic attempt failed and was rolled back:
///    delete every destination row, run the same pass against the now empty
///    table, commit.
///
/// If the fallback fails too it is rolled back and the job is reported as
/// failed, leaving the destination exactly as it was before the run.
///
/// The source is read without locks and its snapshot is reused for the
/// delete phase. Source changes made while a job runs are not seen until the
/// next run.
pub struct Reconciler<'a, S, D, L: ?Sized> {
    source: &'a mut S,
    destination: &'a mut D,
    log: &'a L,
    options: ReconcileOptions,
}

impl<'a, S, D, L> Reconciler<'a, S, D, L>
where
    S: Database,
    D: Database,
    L: SyncLog + ?Sized,
{
    pub fn new(
        source: &'a mut S,
        destination: &'a mut D,
        log: &'a L,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            source,
            destination,
            log,
            options,
        }
    }

    /// Run one job to completion and report its outcome.
    ///
    /// Never returns an error: failures are logged with their full cause
    /// chain and reflected in the report.
    pub async fn run(&mut self, job: &SyncJob) -> JobReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let context = self.describe(job);

        self.log.info(&format!("Starting sync of {}", context));

        let (outcome, stats, optimistic_error, fallback_error) =
            match self.optimistic_attempt(job).await {
                Ok(stats) => {
                    self.log.info(&format!("Successful sync of {}", context));
                    (SyncOutcome::Optimistic, stats, None, None)
                }
                Err(first) => {
                    self.log
                        .error(&format!("Error in sync of {}: {:?}", context, first));
                    self.rollback(&context).await;

                    self.log.info(&format!(
                        "Deleting all data and retrying sync of {}",
                        context
                    ));
                    match self.fallback_attempt(job).await {
                        Ok(stats) => {
                            self.log.info(&format!(
                                "Successful sync of {} after reloading all rows",
                                context
                            ));
                            (
                                SyncOutcome::Fallback,
                                stats,
                                Some(format!("{:#}", first)),
                                None,
                            )
                        }
                        Err(second) => {
                            self.log.error(&format!(
                                "Error in replacing all data in {}: {:?}",
                                context, second
                            ));
                            self.rollback(&context).await;
                            (
                                SyncOutcome::Failed,
                                PassStats::default(),
                                Some(format!("{:#}", first)),
                                Some(format!("{:#}", second)),
                            )
                        }
                    }
                }
            };

        JobReport {
            job: job.clone(),
            outcome,
            stats,
            dry_run: self.options.dry_run,
            optimistic_error,
            fallback_error,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn optimistic_attempt(&mut self, job: &SyncJob) -> Result<PassStats> {
        self.destination
            .begin()
            .await
            .context("Failed to start destination transaction")?;

        let stats = self.sync_pass(job).await?;
        self.finish(job).await?;

        Ok(stats)
    }

    async fn fallback_attempt(&mut self, job: &SyncJob) -> Result<PassStats> {
        self.destination
            .begin()
            .await
            .context("Failed to start destination transaction")?;

        let wiped = ChangeApplier::new(&mut *self.destination, self.log)
            .wipe(&job.destination)
            .await?;

        let mut stats = self.sync_pass(job).await?;
        stats.wiped = wiped;
        self.finish(job).await?;

        Ok(stats)
    }

    /// Upsert what is missing, then delete what is extra.
    ///
    /// Deletes are computed from a fresh destination read taken after the
    /// upserts, so a row corrected in place is never deleted.
    async fn sync_pass(&mut self, job: &SyncJob) -> Result<PassStats> {
        let source_rows = SnapshotReader::new(&mut *self.source)
            .read(&job.source, ReadLock::None)
            .await?;
        let destination_rows = SnapshotReader::new(&mut *self.destination)
            .read(&job.destination, ReadLock::ForUpdate)
            .await?;

        let changes = diff(&source_rows, &destination_rows);
        let upserted = ChangeApplier::new(&mut *self.destination, self.log)
            .apply_upserts(&job.destination, &changes.to_upsert)
            .await?;

        let destination_rows = SnapshotReader::new(&mut *self.destination)
            .read(&job.destination, ReadLock::ForUpdate)
            .await?;

        let changes = diff(&source_rows, &destination_rows);
        if !changes.to_upsert.is_empty() {
            bail!(
                "Destination {} did not converge: {} source rows still missing after upsert",
                job.destination,
                changes.to_upsert.len()
            );
        }

        let deleted = ChangeApplier::new(&mut *self.destination, self.log)
            .apply_deletes(&job.destination, &changes.to_delete)
            .await?;

        // A single-row delete on a key that is not unique may remove the wrong duplicate
        if deleted > 0 {
            let destination_rows = SnapshotReader::new(&mut *self.destination)
                .read(&job.destination, ReadLock::ForUpdate)
                .await?;
            if !diff(&source_rows, &destination_rows).is_empty() {
                bail!(
                    "Destination {} did not converge: rows still differ after deleting {} rows",
                    job.destination,
                    deleted
                );
            }
        }

        tracing::debug!(
            "{}: {} source rows, {} upserted, {} deleted",
            job,
            source_rows.len(),
            upserted,
            deleted
        );

        Ok(PassStats {
            source_rows: source_rows.len() as u64,
            upserted,
            deleted,
            wiped: 0,
        })
    }

    /// Commit, or roll back when running dry.
    async fn finish(&mut self, job: &SyncJob) -> Result<()> {
        if self.options.dry_run {
            self.destination
                .rollback()
                .await
                .context("Failed to roll back dry run")?;
            self.log.info(&format!(
                "Dry run: rolled back changes to {}",
                job.destination
            ));
            Ok(())
        } else {
            self.destination
                .commit()
                .await
                .context("Failed to commit destination transaction")
        }
    }

    /// Roll back after a failed attempt; a rollback error is logged, never raised.
    async fn rollback(&mut self, context: &str) {
        if let Err(e) = self.destination.rollback().await {
            self.log.error(&format!(
                "Rollback failed during sync of {}: {:?}",
                context, e
            ));
        }
    }

    fn describe(&self, job: &SyncJob) -> String {
        format!(
            "{} from {} to {} tbl {}",
            job.source,
            self.source.endpoint(),
            self.destination.endpoint(),
            job.destination
        )
    }
}
