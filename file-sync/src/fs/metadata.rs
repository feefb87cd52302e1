//! File content and timestamp helpers.
//!
//! Copies into the destination tree are staged: the content is written to a
//! hidden sibling file, stamped with the source modification time, and only
//! then renamed over the final name. An interrupted run therefore never
//! leaves a truncated file under a synchronized name.

use filetime::FileTime;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Suffix of in-flight copies. Scans never record entries carrying it.
pub const STAGING_SUFFIX: &str = ".fsync-partial";

const CHECKSUM_BUFFER_SIZE: usize = 64 * 1024;

/// BLAKE3 digest of the full file content, hex encoded.
pub fn compute_checksum(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHECKSUM_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

pub fn is_staging_name(name: &str) -> bool {
    name.ends_with(STAGING_SUFFIX)
}

/// Where the in-flight copy for `destination` is written.
pub fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}{STAGING_SUFFIX}"))
}

/// Copy `source` next to `destination` and give the copy the source's
/// modification time.
///
/// Returns the staging path and the number of bytes copied. The caller
/// commits the copy with [`commit_staged`] or drops it with [`discard_staged`].
pub fn stage_copy(source: &Path, destination: &Path) -> io::Result<(PathBuf, u64)> {
    let source_metadata = fs::metadata(source)?;
    let mtime = FileTime::from_last_modification_time(&source_metadata);
    let staging = staging_path(destination);

    // A stale copy from an interrupted run may be read-only
    discard_staged(&staging)?;

    let bytes = fs::copy(source, &staging)?;
    if let Err(e) = filetime::set_file_mtime(&staging, mtime) {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }

    Ok((staging, bytes))
}

/// Move a staged copy over its final name.
pub fn commit_staged(staging: &Path, destination: &Path) -> io::Result<()> {
    fs::rename(staging, destination)
}

/// Remove a staged copy, ignoring one that is already gone.
pub fn discard_staged(staging: &Path) -> io::Result<()> {
    match fs::remove_file(staging) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
