//! Numbered backups of replaced or removed destination files.
//!
//! Every destination file that is about to be overwritten or deleted is
//! moved into slot 1 of its history first. Older slots shift up by one and
//! the slot past the retention limit falls off:
//!
//! ```text
//! <backup_root>/<relative dir>/<file name>.1   most recently superseded
//! <backup_root>/<relative dir>/<file name>.2
//! ...
//! <backup_root>/<relative dir>/<file name>.N   oldest kept, N = num_backups
//! ```

use crate::fs::entry;
use crate::utils::errors::BackupError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Retention is disabled; the live file was not touched
    Disabled,

    /// The live file now sits in slot 1
    Stored { slot: PathBuf },
}

/// Rotates backup slots under one backup root
#[derive(Debug, Clone)]
pub struct BackupManager {
    destination_root: PathBuf,
    backup_root: PathBuf,
    num_backups: u32,
}

impl BackupManager {
    pub fn new(
        destination_root: impl Into<PathBuf>,
        backup_root: impl Into<PathBuf>,
        num_backups: u32,
    ) -> Self {
        Self {
            destination_root: destination_root.into(),
            backup_root: backup_root.into(),
            num_backups,
        }
    }

    pub fn num_backups(&self) -> u32 {
        self.num_backups
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Path of backup slot `slot` for a relative destination path.
    pub fn slot_path(&self, relative_path: &str, slot: u32) -> PathBuf {
        let native = entry::to_native(&self.backup_root, relative_path);
        let name = native
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        native.with_file_name(format!("{}.{}", name, slot))
    }

    /// Number of slot files currently stored for a relative path.
    pub fn slot_count(&self, relative_path: &str) -> usize {
        let probe = self.slot_path(relative_path, 1);
        let Some(dir) = probe.parent() else {
            return 0;
        };
        let Some(name) = relative_path.rsplit('/').next() else {
            return 0;
        };
        let prefix = format!("{}.", name);

        let Ok(read_dir) = fs::read_dir(dir) else {
            return 0;
        };
        read_dir
            .filter_map(Result::ok)
            .filter(|dir_entry| {
                dir_entry
                    .file_name()
                    .to_str()
                    .and_then(|file_name| file_name.strip_prefix(&prefix))
                    .is_some_and(|suffix| {
                        !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit())
                    })
            })
            .count()
    }

    /// Move the live destination file for `relative_path` into slot 1,
    /// shifting existing slots and evicting the oldest.
    ///
    /// On error the live file is still in place (unless the failure came
    /// from a partial cross-device move) and must not be overwritten.
    pub fn rotate_and_stage(&self, relative_path: &str) -> Result<BackupOutcome, BackupError> {
        if self.num_backups == 0 {
            return Ok(BackupOutcome::Disabled);
        }

        let live = entry::to_native(&self.destination_root, relative_path);
        let newest = self.slot_path(relative_path, 1);

        if let Some(parent) = newest.parent() {
            fs::create_dir_all(parent).map_err(|source| BackupError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        self.evict_stale_slots(relative_path)?;

        for slot in (2..=self.num_backups).rev() {
            let older = self.slot_path(relative_path, slot - 1);
            if !older.exists() {
                continue;
            }
            let newer = self.slot_path(relative_path, slot);
            fs::rename(&older, &newer).map_err(|source| BackupError::Move {
                from: older.clone(),
                to: newer.clone(),
                source,
            })?;
        }

        move_file(&live, &newest)?;
        debug!("Backed up {} to {}", live.display(), newest.display());

        Ok(BackupOutcome::Stored { slot: newest })
    }

    /// Slots numbered above the limit are left over from a larger retention
    /// setting in an earlier run.
    fn evict_stale_slots(&self, relative_path: &str) -> Result<(), BackupError> {
        let mut slot = self.num_backups + 1;
        loop {
            let path = self.slot_path(relative_path, slot);
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Evicted stale backup {}", path.display());
                    slot += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(source) => return Err(BackupError::Evict { path, source }),
            }
        }
    }
}

/// Rename, falling back to copy + remove when the backup root lives on
/// another filesystem.
fn move_file(from: &Path, to: &Path) -> Result<(), BackupError> {
    let move_error = |source: io::Error| BackupError::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(move_error(e)),
        Err(rename_error) => fs::copy(from, to)
            .and_then(|_| fs::remove_file(from))
            .map_err(|_| move_error(rename_error)),
    }
}
