//! File Sync Library
//!
//! One-way mirroring of a source tree onto a destination tree, keeping
//! numbered backups of every destination file it replaces or removes.

pub mod config;
pub mod executor;
pub mod fs;
pub mod report;
pub mod shutdown;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, Settings};
pub use executor::{SyncState, Synchronizer};
pub use report::{DiagnosticsSink, StatusReporter, SyncEvent, SyncSummary};
pub use utils::errors::{Result, SyncError};
