//! Error types for the synchronization engine.
//!
//! Only [`SyncError`] escapes the orchestrator. The per-path errors
//! ([`ScanEntryError`], [`BackupError`], [`ExecutionError`]) are isolated to
//! the entry that raised them and end up in the diagnostics stream.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Invalid state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("{failed} of {attempted} actions failed")]
    ActionsFailed { failed: usize, attempted: usize },

    #[error("Synchronization cancelled after {completed} actions ({remaining} not started)")]
    Cancelled { completed: usize, remaining: usize },
}

/// Failure to scan a tree root. Fatal for the run.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("root {0} does not exist")]
    RootMissing(PathBuf),

    #[error("root {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("root {path} is unreadable: {source}")]
    RootUnreadable { path: PathBuf, source: io::Error },
}

/// A single entry that could not be scanned; the entry is skipped.
#[derive(Error, Debug, Clone)]
#[error("{}: {reason}", path.display())]
pub struct ScanEntryError {
    pub path: PathBuf,
    pub reason: String,
}

impl ScanEntryError {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Rotation or staging of a backup slot failed. The live file was not touched.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("cannot create backup directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("cannot evict stale backup slot {}: {source}", path.display())]
    Evict { path: PathBuf, source: io::Error },

    #[error("cannot move {} to {}: {source}", from.display(), to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

/// Failure to apply one planned action.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("backup failed, {0}")]
    Backup(#[from] BackupError),

    #[error("{operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        source: io::Error,
    },
}

impl ExecutionError {
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
