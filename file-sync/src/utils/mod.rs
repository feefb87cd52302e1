//! Utility modules for the synchronization engine.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, ExecutionError, Result, ScanEntryError, ScanError, SyncError};
