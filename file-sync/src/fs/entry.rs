//! Scan result types.
//!
//! A scan records every object under a tree root as a [`FileEntry`] keyed by
//! its normalized relative path. The relative path is the comparison key
//! between the source and destination trees, so it always uses `/` as the
//! separator and never carries leading or trailing separators.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// Scan result: relative path -> entry. Ordered so plans are deterministic.
pub type FileMap = BTreeMap<String, FileEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// Metadata for a single scanned object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Normalized path relative to the tree root
    pub relative_path: String,

    pub kind: EntryKind,

    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Last modification time
    pub modified: SystemTime,

    /// Hex encoded content checksum, only present when checksums were requested
    pub checksum: Option<String>,

    /// Directories only: something below was filtered out or unreadable,
    /// so the directory cannot be emptied by synchronization
    pub holds_excluded: bool,
}

impl FileEntry {
    pub fn file(relative_path: impl Into<String>, size: u64, modified: SystemTime) -> Self {
        Self {
            relative_path: relative_path.into(),
            kind: EntryKind::File,
            size,
            modified,
            checksum: None,
            holds_excluded: false,
        }
    }

    pub fn directory(relative_path: impl Into<String>, modified: SystemTime) -> Self {
        Self {
            relative_path: relative_path.into(),
            kind: EntryKind::Directory,
            size: 0,
            modified,
            checksum: None,
            holds_excluded: false,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Mark a directory as holding entries the scan did not record.
    pub fn holding_excluded(mut self) -> Self {
        self.holds_excluded = true;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn depth(&self) -> usize {
        depth(&self.relative_path)
    }

    /// Whether two file entries describe the same content.
    ///
    /// Checksums win when both sides carry one; otherwise size and
    /// modification time must both match.
    pub fn same_content(&self, other: &FileEntry) -> bool {
        match (&self.checksum, &other.checksum) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => self.size == other.size && self.modified == other.modified,
        }
    }
}

/// Convert a path already relative to a tree root into its normalized key.
///
/// Returns `None` for empty paths, paths escaping the root, and names that
/// are not valid UTF-8.
pub fn normalize_relative(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Normalize a user supplied relative path such as an ignore entry.
/// Both `/` and `\` are accepted as separators.
pub fn normalize_relative_str(raw: &str) -> Option<String> {
    let parts: Vec<&str> = raw
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();

    if parts.is_empty() || parts.contains(&"..") {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Number of components in a normalized relative path.
pub fn depth(relative_path: &str) -> usize {
    relative_path.split('/').count()
}

/// True if `path` equals `ancestor` or lies somewhere below it.
pub fn is_under(path: &str, ancestor: &str) -> bool {
    match path.strip_prefix(ancestor) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

pub fn parent(relative_path: &str) -> Option<&str> {
    relative_path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Strict ancestors of a relative path, nearest first.
pub fn ancestors(relative_path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(parent(relative_path), |current| parent(current))
}

/// Join a normalized relative path onto a native root.
pub fn to_native(root: &Path, relative_path: &str) -> PathBuf {
    relative_path
        .split('/')
        .fold(root.to_path_buf(), |path, part| path.join(part))
}
