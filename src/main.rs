// ABOUTME: CLI entry point for table-syncer
// ABOUTME: Parses flags, sets up logging and runs the sync command

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use table_syncer::commands::{self, SyncCommand};
use table_syncer::config::{load_config_file, SyncSettings};

#[derive(Parser)]
#[command(name = "table-syncer")]
#[command(
    about = "Make destination tables exact copies of source tables, patching only what differs",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Source database URL (mysql://... or postgresql://...)
    #[arg(long = "src", env = "SYNC_SOURCE_URL")]
    source: String,
    /// Destination database URL (mysql://... or postgresql://...)
    #[arg(long = "dst", env = "SYNC_DESTINATION_URL")]
    destination: String,
    /// Table mapping in the form source_table:destination_table:primary_key (repeatable)
    #[arg(long = "table")]
    tables: Vec<String>,
    /// Path to a TOML file listing [[tables]] to sync
    #[arg(long = "config")]
    config_path: Option<PathBuf>,
    /// Run the whole sync but roll back instead of committing
    #[arg(long = "dry-run", default_value_t = false)]
    dry_run: bool,
    /// Lock wait timeout in seconds for both sessions (0 disables it; default 50)
    #[arg(long = "lock-timeout")]
    lock_timeout: Option<u64>,
    /// Write a JSON summary of the run to this path
    #[arg(long = "report")]
    report: Option<PathBuf>,
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(long = "allow-self-signed-certs", default_value_t = false)]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let file = cli
        .config_path
        .as_deref()
        .map(load_config_file)
        .transpose()?;
    let settings = SyncSettings::resolve(file.as_ref(), &cli.tables, cli.dry_run, cli.lock_timeout)
        .context("Invalid sync configuration")?;

    commands::sync(SyncCommand {
        source_url: cli.source,
        destination_url: cli.destination,
        settings,
        allow_self_signed_certs: cli.allow_self_signed_certs,
        report_path: cli.report,
    })
    .await?;

    Ok(())
}
