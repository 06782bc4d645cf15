// ABOUTME: Sync configuration - TOML job files merged with command-line table mappings
// ABOUTME: Resolves the final job list, dry-run flag and lock timeout before any connection is made

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::table::SyncJob;

/// Lock wait timeout used when neither the CLI nor the config file sets one.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 50;

/// Contents of a `table-syncer.toml` file.
///
/// ```toml
/// [options]
/// dry_run = false
/// lock_timeout_secs = 30
///
/// [[tables]]
/// source = "syncer_demo.syncer_src"
/// destination = "syncer_demo.syncer_dst"
/// primary_key = "id"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub options: FileOptions,
    #[serde(default)]
    pub tables: Vec<TableEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileOptions {
    pub dry_run: Option<bool>,
    /// Zero disables the session lock timeout
    pub lock_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableEntry {
    pub source: String,
    pub destination: String,
    pub primary_key: String,
}

impl ConfigFile {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse sync configuration")
    }

    /// Validate and convert the `[[tables]]` entries into jobs.
    pub fn jobs(&self) -> Result<Vec<SyncJob>> {
        self.tables
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                SyncJob::new(&entry.source, &entry.destination, &entry.primary_key)
                    .with_context(|| format!("Invalid [[tables]] entry #{}", idx + 1))
            })
            .collect()
    }
}

/// Load a configuration file from disk.
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    ConfigFile::from_toml_str(&contents).with_context(|| format!("Invalid config file {:?}", path))
}

/// Everything a sync run needs besides the connection URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub jobs: Vec<SyncJob>,
    pub dry_run: bool,
    pub lock_timeout: Option<Duration>,
}

impl SyncSettings {
    /// Merge the config file (if any) with command-line values.
    ///
    /// Jobs from the file come first, followed by `--table` mappings. The
    /// dry-run flag is on if either source enables it. A CLI lock timeout
    /// overrides the file's.
    pub fn resolve(
        file: Option<&ConfigFile>,
        cli_tables: &[String],
        cli_dry_run: bool,
        cli_lock_timeout_secs: Option<u64>,
    ) -> Result<Self> {
        let mut jobs = match file {
            Some(file) => file.jobs()?,
            None => Vec::new(),
        };
        for mapping in cli_tables {
            jobs.push(mapping.parse()?);
        }

        if jobs.is_empty() {
            bail!(
                "No tables to sync. Pass --table source_table:destination_table:primary_key \
                 or list [[tables]] in a --config file"
            );
        }

        let file_options = file.map(|f| f.options.clone()).unwrap_or_default();
        let dry_run = cli_dry_run || file_options.dry_run.unwrap_or(false);
        let lock_timeout_secs = cli_lock_timeout_secs
            .or(file_options.lock_timeout_secs)
            .unwrap_or(DEFAULT_LOCK_TIMEOUT_SECS);

        Ok(Self {
            jobs,
            dry_run,
            lock_timeout: (lock_timeout_secs > 0).then(|| Duration::from_secs(lock_timeout_secs)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [options]
        dry_run = true
        lock_timeout_secs = 10

        [[tables]]
        source = "syncer_demo.syncer_src"
        destination = "syncer_demo.syncer_dst"
        primary_key = "id"

        [[tables]]
        source = "shop.orders"
        destination = "replica.orders"
        primary_key = "order_id"
    "#;

    #[test]
    fn test_parse_config_file() {
        let file = ConfigFile::from_toml_str(SAMPLE).unwrap();
        let jobs = file.jobs().unwrap();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].destination.qualified_name(), "replica.orders");
        assert_eq!(jobs[1].destination.primary_key, "order_id");
        assert_eq!(file.options.dry_run, Some(true));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = ConfigFile::from_toml_str("[options]\nretries = 3\n").unwrap_err();
        assert!(format!("{:#}", err).contains("retries"));
    }

    #[test]
    fn test_invalid_table_entry_names_position() {
        let file = ConfigFile::from_toml_str(
            "[[tables]]\nsource = \"a\"\ndestination = \"\"\nprimary_key = \"id\"\n",
        )
        .unwrap();
        let err = file.jobs().unwrap_err();
        assert!(err.to_string().contains("#1"));
    }

    #[test]
    fn test_resolve_merges_file_and_cli() {
        let file = ConfigFile::from_toml_str(SAMPLE).unwrap();
        let settings = SyncSettings::resolve(
            Some(&file),
            &["a.users:b.users:id".to_string()],
            false,
            None,
        )
        .unwrap();

        assert_eq!(settings.jobs.len(), 3);
        assert_eq!(settings.jobs[2].source.qualified_name(), "a.users");
        assert!(settings.dry_run);
        assert_eq!(settings.lock_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_resolve_cli_overrides_lock_timeout() {
        let file = ConfigFile::from_toml_str(SAMPLE).unwrap();
        let settings = SyncSettings::resolve(Some(&file), &[], false, Some(0)).unwrap();

        assert_eq!(settings.lock_timeout, None);
    }

    #[test]
    fn test_resolve_defaults() {
        let settings =
            SyncSettings::resolve(None, &["src:dst:id".to_string()], false, None).unwrap();

        assert!(!settings.dry_run);
        assert_eq!(
            settings.lock_timeout,
            Some(Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS))
        );
    }

    #[test]
    fn test_resolve_requires_a_job() {
        let err = SyncSettings::resolve(None, &[], false, None).unwrap_err();
        assert!(err.to_string().contains("No tables to sync"));
    }
}
