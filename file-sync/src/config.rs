//! Configuration management.
//!
//! [`Settings`] is the immutable input of one synchronization run. It can be
//! loaded from the `[sync]` section of a TOML file and completed from the
//! command line; the synchronizer validates it again before use.
//!
//! ```toml
//! [sync]
//! source_root = "/srv/site"
//! destination_root = "/mnt/mirror/site"
//! num_backups = 3
//! names_to_skip = [".git", "node_modules"]
//! extensions_to_skip = ["tmp"]
//!
//! [log]
//! level = "debug"
//! ```

use crate::fs::entry::{normalize_relative, normalize_relative_str};
use crate::fs::walker::ScanFilters;
use crate::utils::errors::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: Settings,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Tree to mirror from
    #[serde(default)]
    pub source_root: PathBuf,

    /// Tree to mirror onto
    #[serde(default)]
    pub destination_root: PathBuf,

    /// Backup folder, relative to the destination root unless absolute
    #[serde(default = "default_backup_folder")]
    pub backup_folder: PathBuf,

    /// Backups kept per file (0 disables backups)
    #[serde(default = "default_num_backups")]
    pub num_backups: u32,

    /// Plan and report only, never touch the destination
    #[serde(default)]
    pub info_mode: bool,

    /// Compare files by content checksum instead of size + mtime
    #[serde(default)]
    pub calc_checksum: bool,

    /// Mirror directories that hold no included files
    #[serde(default)]
    pub create_empty_directories: bool,

    /// File or directory names skipped anywhere in either tree
    #[serde(default)]
    pub names_to_skip: BTreeSet<String>,

    /// Extensions skipped in either tree
    #[serde(default)]
    pub extensions_to_skip: BTreeSet<String>,

    /// If non-empty, only files with these extensions are synchronized
    #[serde(default)]
    pub extensions_to_include: BTreeSet<String>,

    /// Destination relative paths that are never deleted
    #[serde(default)]
    pub destination_paths_to_ignore: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_backup_folder() -> PathBuf {
    PathBuf::from("_Older")
}

fn default_num_backups() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            source_root: PathBuf::new(),
            destination_root: PathBuf::new(),
            backup_folder: default_backup_folder(),
            num_backups: default_num_backups(),
            info_mode: false,
            calc_checksum: false,
            create_empty_directories: false,
            names_to_skip: BTreeSet::new(),
            extensions_to_skip: BTreeSet::new(),
            extensions_to_include: BTreeSet::new(),
            destination_paths_to_ignore: BTreeSet::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Settings {
    pub fn new(source_root: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        Settings {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            ..Settings::default()
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.source_root.as_os_str().is_empty() {
            return Err(SyncError::Setup("source directory is not set".to_string()));
        }
        if self.destination_root.as_os_str().is_empty() {
            return Err(SyncError::Setup("destination directory is not set".to_string()));
        }
        if self.backup_folder.as_os_str().is_empty() {
            return Err(SyncError::Setup("backup folder name is empty".to_string()));
        }
        if !self.backup_folder.is_absolute() && normalize_relative(&self.backup_folder).is_none() {
            return Err(SyncError::Setup(format!(
                "backup folder {} must be a directory below the destination",
                self.backup_folder.display()
            )));
        }
        if same_location(&self.source_root, &self.destination_root) {
            return Err(SyncError::Setup(format!(
                "source and destination are the same directory: {}",
                self.source_root.display()
            )));
        }
        for raw in &self.destination_paths_to_ignore {
            if normalize_relative_str(raw).is_none() {
                return Err(SyncError::Setup(format!(
                    "invalid destination path to ignore: {:?}",
                    raw
                )));
            }
        }
        Ok(())
    }

    /// Absolute or destination-relative location of the backup slots.
    pub fn backup_root(&self) -> PathBuf {
        if self.backup_folder.is_absolute() {
            self.backup_folder.clone()
        } else {
            self.destination_root.join(&self.backup_folder)
        }
    }

    /// Scan filters shared by the source and destination scans.
    pub fn scan_filters(&self) -> ScanFilters {
        ScanFilters::new(
            self.names_to_skip.iter().cloned(),
            &self.extensions_to_skip,
            &self.extensions_to_include,
        )
    }

    /// Normalized destination paths that are never deleted.
    pub fn ignore_set(&self) -> BTreeSet<String> {
        self.destination_paths_to_ignore
            .iter()
            .filter_map(|raw| normalize_relative_str(raw))
            .collect()
    }
}

fn same_location(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
