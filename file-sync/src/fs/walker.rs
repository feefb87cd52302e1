//! Directory scanning.
//!
//! Walks a tree root depth-first (in file-name order) and records every
//! directory and every file accepted by the [`ScanFilters`]. Problems with
//! individual entries are reported to the diagnostics sink and the entry is
//! skipped; only an unusable root fails the scan.

use crate::fs::entry::{self, FileEntry, FileMap};
use crate::fs::metadata::{compute_checksum, is_staging_name};
use crate::report::DiagnosticsSink;
use crate::utils::errors::{ScanEntryError, ScanError};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Filters applied while walking a tree
#[derive(Debug, Clone, Default)]
pub struct ScanFilters {
    /// Names excluded anywhere in the tree (whole subtree for directories)
    names_to_skip: BTreeSet<String>,

    /// Lower-case extensions, without the leading dot
    extensions_to_skip: BTreeSet<String>,

    /// Allow-list of extensions; empty means every extension is allowed
    extensions_to_include: BTreeSet<String>,

    /// Relative subtrees never descended into
    excluded_subtrees: Vec<String>,
}

impl ScanFilters {
    pub fn new<N, S, I>(names_to_skip: N, extensions_to_skip: S, extensions_to_include: I) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        S: IntoIterator,
        S::Item: AsRef<str>,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self {
            names_to_skip: names_to_skip.into_iter().map(Into::into).collect(),
            extensions_to_skip: normalize_extensions(extensions_to_skip),
            extensions_to_include: normalize_extensions(extensions_to_include),
            excluded_subtrees: Vec::new(),
        }
    }

    /// Never descend into `relative_path` (a normalized relative path).
    pub fn excluding(mut self, relative_path: impl Into<String>) -> Self {
        self.excluded_subtrees.push(relative_path.into());
        self
    }

    pub fn skips_name(&self, name: &str) -> bool {
        self.names_to_skip.contains(name)
    }

    pub fn excludes_subtree(&self, relative_path: &str) -> bool {
        self.excluded_subtrees
            .iter()
            .any(|subtree| entry::is_under(relative_path, subtree))
    }

    /// Extension rules for a file name. The allow-list is checked first.
    pub fn accepts_file(&self, file_name: &str) -> bool {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        if !self.extensions_to_include.is_empty() {
            match &extension {
                Some(ext) if self.extensions_to_include.contains(ext) => {}
                _ => return false,
            }
        }

        match extension {
            Some(ext) => !self.extensions_to_skip.contains(&ext),
            None => true,
        }
    }
}

/// `".TXT"`, `"txt"` and `"Txt"` all become `"txt"`.
pub fn normalize_extension(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn normalize_extensions<I>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    raw.into_iter()
        .map(|ext| normalize_extension(ext.as_ref()))
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Scan a tree root into a map of relative path -> entry.
///
/// # Arguments
/// * `root` - Tree root
/// * `filters` - Name, extension and subtree filters
/// * `compute_checksums` - Read every included file to record a content checksum
/// * `diagnostics` - Receives one report per skipped entry
///
/// # Returns
/// * `Ok(FileMap)` - Every included directory and file; directories with a
///   filtered or unreadable entry below them have `holds_excluded` set
/// * `Err(ScanError)` - If the root is missing, not a directory or unreadable
///
/// # Example
/// ```no_run
/// use file_sync::fs::walker::{scan, ScanFilters};
/// use file_sync::report::TracingDiagnostics;
/// use std::path::Path;
///
/// let filters = ScanFilters::default();
/// let entries = scan(Path::new("/data"), &filters, false, &TracingDiagnostics).unwrap();
/// println!("Found {} entries", entries.len());
/// ```
pub fn scan(
    root: &Path,
    filters: &ScanFilters,
    compute_checksums: bool,
    diagnostics: &dyn DiagnosticsSink,
) -> Result<FileMap, ScanError> {
    check_root(root)?;

    let mut entries = FileMap::new();
    // Directories with something below them that was not recorded
    let holders: RefCell<BTreeSet<String>> = RefCell::new(BTreeSet::new());

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|dir_entry| {
            let keep = keep_entry(dir_entry, root, filters, diagnostics);
            if !keep {
                note_parent(&mut holders.borrow_mut(), dir_entry.path(), root);
            }
            keep
        });

    for item in walker {
        let dir_entry = match item {
            Ok(dir_entry) => dir_entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                let mut holders = holders.borrow_mut();
                // Either an unreadable directory or an entry inside one
                if let Some(relative) = relative_key(&path, root) {
                    holders.insert(relative);
                }
                note_parent(&mut holders, &path, root);
                diagnostics.report(ScanEntryError::new(path, e.to_string()).into());
                continue;
            }
        };

        match record_entry(&dir_entry, root, filters, compute_checksums) {
            Ok(Some(file_entry)) => {
                entries.insert(file_entry.relative_path.clone(), file_entry);
            }
            Ok(None) => note_parent(&mut holders.borrow_mut(), dir_entry.path(), root),
            Err(e) => {
                note_parent(&mut holders.borrow_mut(), dir_entry.path(), root);
                diagnostics.report(e.into());
            }
        }
    }

    for holder in holders.into_inner() {
        for key in std::iter::once(holder.as_str()).chain(entry::ancestors(&holder)) {
            if let Some(dir) = entries.get_mut(key).filter(|e| e.is_dir()) {
                dir.holds_excluded = true;
            }
        }
    }

    debug!("Scanned {}: {} entries", root.display(), entries.len());

    Ok(entries)
}

fn note_parent(holders: &mut BTreeSet<String>, path: &Path, root: &Path) {
    if let Some(relative) = path.parent().and_then(|parent| relative_key(parent, root)) {
        holders.insert(relative);
    }
}

fn check_root(root: &Path) -> Result<(), ScanError> {
    let metadata = fs::metadata(root).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ScanError::RootMissing(root.to_path_buf()),
        _ => ScanError::RootUnreadable {
            path: root.to_path_buf(),
            source,
        },
    })?;

    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    fs::read_dir(root).map_err(|source| ScanError::RootUnreadable {
        path: root.to_path_buf(),
        source,
    })?;

    Ok(())
}

/// Decide whether to descend into / look at an entry at all.
fn keep_entry(
    dir_entry: &DirEntry,
    root: &Path,
    filters: &ScanFilters,
    diagnostics: &dyn DiagnosticsSink,
) -> bool {
    let Some(name) = dir_entry.file_name().to_str() else {
        diagnostics.report(ScanEntryError::new(dir_entry.path(), "name is not valid UTF-8").into());
        return false;
    };

    if filters.skips_name(name) || is_staging_name(name) {
        return false;
    }

    match relative_key(dir_entry.path(), root) {
        Some(relative) => !filters.excludes_subtree(&relative),
        None => false,
    }
}

fn relative_key(path: &Path, root: &Path) -> Option<String> {
    entry::normalize_relative(path.strip_prefix(root).ok()?)
}

fn record_entry(
    dir_entry: &DirEntry,
    root: &Path,
    filters: &ScanFilters,
    compute_checksums: bool,
) -> Result<Option<FileEntry>, ScanEntryError> {
    let path = dir_entry.path();
    let relative = relative_key(path, root)
        .ok_or_else(|| ScanEntryError::new(path, "cannot express path relative to the scan root"))?;

    // Links to files are synchronized as the file they point to
    let metadata = if dir_entry.path_is_symlink() {
        match fs::metadata(path) {
            Ok(resolved) if resolved.is_dir() => {
                return Err(ScanEntryError::new(
                    path,
                    "symbolic link to a directory is not followed",
                ));
            }
            Ok(resolved) => resolved,
            Err(e) => {
                return Err(ScanEntryError::new(path, format!("broken symbolic link: {}", e)));
            }
        }
    } else {
        dir_entry
            .metadata()
            .map_err(|e| ScanEntryError::new(path, e.to_string()))?
    };

    let modified = metadata
        .modified()
        .map_err(|e| ScanEntryError::new(path, format!("modification time unavailable: {}", e)))?;

    if metadata.is_dir() {
        return Ok(Some(FileEntry::directory(relative, modified)));
    }

    let name = dir_entry.file_name().to_string_lossy();
    if !filters.accepts_file(&name) {
        return Ok(None);
    }

    if !metadata.is_file() {
        return Err(ScanEntryError::new(path, "unsupported file type"));
    }

    let mut file_entry = FileEntry::file(relative, metadata.len(), modified);
    if compute_checksums {
        let checksum = compute_checksum(path)
            .map_err(|e| ScanEntryError::new(path, format!("checksum failed: {}", e)))?;
        file_entry = file_entry.with_checksum(checksum);
    }

    Ok(Some(file_entry))
}
