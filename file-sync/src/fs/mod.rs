//! Filesystem model, scanning and copy helpers.

pub mod entry;
pub mod metadata;
pub mod walker;

pub use entry::{EntryKind, FileEntry, FileMap};
pub use walker::{scan, ScanFilters};
