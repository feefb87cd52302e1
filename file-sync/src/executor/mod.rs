//! Synchronization orchestrator.
//!
//! A [`Synchronizer`] runs one synchronization:
//! - `setup_synchronisation_data` scans both trees in parallel and plans
//! - `sync_destination` executes the plan (or only reports it in info mode)
//!
//! Every destructive step goes through the [`BackupManager`] first. Failures
//! are isolated to the path that caused them and execution carries on with
//! the rest of the plan.

use crate::config::Settings;
use crate::fs::entry::{self, EntryKind, FileMap};
use crate::fs::metadata::{commit_staged, discard_staged, stage_copy};
use crate::fs::walker::scan;
use crate::report::{
    ActionOutcome, ActionReport, Diagnostic, DiagnosticsSink, StatusReporter, SyncEvent,
    SyncSummary,
};
use crate::sync::backup::{BackupManager, BackupOutcome};
use crate::sync::plan::{self, Action, SyncPlan};
use crate::utils::errors::{ExecutionError, Result, ScanError, SyncError};
use chrono::Utc;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Planned,
    Executing,
    Done,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Planned => "planned",
            SyncState::Executing => "executing",
            SyncState::Done => "done",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What executing a single action did
enum Applied {
    Changed { bytes: u64 },
    Unchanged,
    Skipped { reason: String },
}

pub struct Synchronizer {
    settings: Settings,
    reporter: Arc<dyn StatusReporter>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    cancel_token: CancellationToken,
    state: SyncState,
    run_id: Uuid,
    started_at: Option<Instant>,
    plan: Option<SyncPlan>,
    summary: Option<SyncSummary>,
}

impl Synchronizer {
    /// Create a synchronizer (no cancellation support)
    pub fn new(
        settings: Settings,
        reporter: Arc<dyn StatusReporter>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self::with_cancel(settings, reporter, diagnostics, CancellationToken::new())
    }

    /// Create a synchronizer with cancellation support
    pub fn with_cancel(
        settings: Settings,
        reporter: Arc<dyn StatusReporter>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            settings,
            reporter,
            diagnostics,
            cancel_token,
            state: SyncState::Idle,
            run_id: Uuid::new_v4(),
            started_at: None,
            plan: None,
            summary: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The plan built by `setup_synchronisation_data`
    pub fn plan(&self) -> Option<&SyncPlan> {
        self.plan.as_ref()
    }

    /// Summary of the finished run, also available when it failed
    pub fn summary(&self) -> Option<&SyncSummary> {
        self.summary.as_ref()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Validate settings, scan both trees and build the plan.
    pub async fn setup_synchronisation_data(&mut self) -> Result<()> {
        if self.state != SyncState::Idle {
            return Err(SyncError::Setup(format!(
                "synchronization data already set up (state: {})",
                self.state
            )));
        }

        self.settings.validate()?;
        let started_at = Instant::now();

        let source_root = self.settings.source_root.clone();
        let destination_root = self.settings.destination_root.clone();
        let backup_root = self.settings.backup_root();
        let filters = self.settings.scan_filters();

        let mut destination_filters = filters.clone();
        if let Some(relative) = relative_within(&destination_root, &backup_root) {
            destination_filters = destination_filters.excluding(relative);
        }

        let mut source_filters = filters;
        if let Some(relative) = relative_within(&source_root, &backup_root) {
            self.diagnostics.report(Diagnostic::warning(format!(
                "backup folder {} is inside the source tree; it is excluded from the scan",
                backup_root.display()
            )));
            source_filters = source_filters.excluding(relative);
        }

        info!(
            "Scanning {} and {}",
            source_root.display(),
            destination_root.display()
        );

        let checksums = self.settings.calc_checksum;
        let source_diagnostics = Arc::clone(&self.diagnostics);
        let destination_diagnostics = Arc::clone(&self.diagnostics);
        let source_scan_root = source_root.clone();
        let destination_scan_root = destination_root.clone();

        // Read-only scans of disjoint trees
        let (source_scan, destination_scan) = tokio::join!(
            tokio::task::spawn_blocking(move || {
                scan(
                    &source_scan_root,
                    &source_filters,
                    checksums,
                    &*source_diagnostics,
                )
            }),
            tokio::task::spawn_blocking(move || {
                scan(
                    &destination_scan_root,
                    &destination_filters,
                    checksums,
                    &*destination_diagnostics,
                )
            }),
        );

        let source_map = join_scan(source_scan, "source")?;
        let destination_map = join_scan(destination_scan, "destination")?;

        info!(
            "Scanned source ({} entries) and destination ({} entries) in {:?}",
            source_map.len(),
            destination_map.len(),
            started_at.elapsed()
        );

        let sync_plan = self.build_plan(&source_map, &destination_map);

        info!(
            "Planned {} changes ({} actions in total)",
            sync_plan.mutation_count(),
            sync_plan.len()
        );

        self.reporter.emit(SyncEvent::Started {
            run_id: self.run_id,
            source: source_root.display().to_string(),
            destination: destination_root.display().to_string(),
            info_mode: self.settings.info_mode,
            planned_actions: sync_plan.mutation_count(),
            started_at: Utc::now(),
        });

        self.plan = Some(sync_plan);
        self.started_at = Some(started_at);
        self.state = SyncState::Planned;

        Ok(())
    }

    fn build_plan(&self, source: &FileMap, destination: &FileMap) -> SyncPlan {
        plan::plan(
            source,
            destination,
            &self.settings.ignore_set(),
            self.settings.create_empty_directories,
        )
    }

    /// Execute the plan, or only report it in info mode.
    ///
    /// Returns the summary when every action succeeded. Otherwise returns
    /// an error once all submitted actions were attempted; the summary is
    /// still emitted and available through [`Synchronizer::summary`].
    pub fn sync_destination(&mut self) -> Result<SyncSummary> {
        if self.state != SyncState::Planned {
            return Err(SyncError::InvalidState {
                expected: SyncState::Planned.as_str(),
                found: self.state.as_str(),
            });
        }
        let Some(sync_plan) = self.plan.take() else {
            return Err(SyncError::InvalidState {
                expected: SyncState::Planned.as_str(),
                found: self.state.as_str(),
            });
        };

        let started_at = self.started_at.unwrap_or_else(Instant::now);
        let mut summary = SyncSummary::new(self.run_id, self.settings.info_mode);

        let result = if self.settings.info_mode {
            self.report_plan(&sync_plan, &mut summary);
            Ok(())
        } else {
            self.state = SyncState::Executing;
            self.execute_plan(&sync_plan, &mut summary)
        };

        summary.finish(started_at.elapsed());
        self.reporter.emit(SyncEvent::Summary(summary.clone()));

        self.plan = Some(sync_plan);
        self.summary = Some(summary.clone());
        self.state = SyncState::Done;

        result.map(|()| summary)
    }

    fn report_plan(&self, sync_plan: &SyncPlan, summary: &mut SyncSummary) {
        for action in sync_plan {
            let outcome = if action.is_mutation() {
                ActionOutcome::Planned
            } else {
                ActionOutcome::Unchanged
            };
            self.report(action, outcome, summary);
        }
    }

    fn execute_plan(&self, sync_plan: &SyncPlan, summary: &mut SyncSummary) -> Result<()> {
        let backups = BackupManager::new(
            &self.settings.destination_root,
            self.settings.backup_root(),
            self.settings.num_backups,
        );

        let actions = sync_plan.actions();
        let mut attempted = 0usize;

        for (index, action) in actions.iter().enumerate() {
            if self.cancel_token.is_cancelled() {
                summary.cancelled = true;
                summary.not_started = actions[index..].iter().filter(|a| a.is_mutation()).count();
                info!(
                    "Synchronization cancelled: {} actions attempted, {} not started",
                    attempted, summary.not_started
                );
                break;
            }

            if action.is_mutation() {
                attempted += 1;
            }

            let outcome = match self.apply(action, &backups) {
                Ok(Applied::Changed { bytes }) => {
                    summary.bytes_copied += bytes;
                    ActionOutcome::Applied
                }
                Ok(Applied::Unchanged) => ActionOutcome::Unchanged,
                Ok(Applied::Skipped { reason }) => ActionOutcome::Skipped { reason },
                Err(e) => {
                    self.diagnostics.report(Diagnostic::ActionFailed {
                        action: action.action_kind(),
                        path: action.path().to_string(),
                        reason: e.to_string(),
                    });
                    ActionOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            self.report(action, outcome, summary);
        }

        if summary.cancelled {
            Err(SyncError::Cancelled {
                completed: attempted,
                remaining: summary.not_started,
            })
        } else if summary.failed > 0 {
            Err(SyncError::ActionsFailed {
                failed: summary.failed,
                attempted,
            })
        } else {
            Ok(())
        }
    }

    fn report(&self, action: &Action, outcome: ActionOutcome, summary: &mut SyncSummary) {
        let report = ActionReport::new(action, outcome);
        summary.record(&report);
        self.reporter.emit(SyncEvent::Action(report));
    }

    fn apply(
        &self,
        action: &Action,
        backups: &BackupManager,
    ) -> std::result::Result<Applied, ExecutionError> {
        let path = action.path();
        let source = entry::to_native(&self.settings.source_root, path);
        let destination = entry::to_native(&self.settings.destination_root, path);

        match action {
            Action::Unchanged { .. } => Ok(Applied::Unchanged),

            Action::Create {
                kind: EntryKind::Directory,
                ..
            }
            | Action::CreateEmptyDirectory { .. } => {
                fs::create_dir_all(&destination)
                    .map_err(|e| ExecutionError::io("create directory", &destination, e))?;
                debug!("Created directory {}", destination.display());
                Ok(Applied::Changed { bytes: 0 })
            }

            Action::Create {
                kind: EntryKind::File,
                ..
            } => {
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|e| ExecutionError::io("create directory", parent, e))?;
                }
                let (staging, bytes) = stage_copy(&source, &destination)
                    .map_err(|e| ExecutionError::io("copy", &source, e))?;
                commit(&staging, &destination)?;
                debug!("Created {} ({} bytes)", destination.display(), bytes);
                Ok(Applied::Changed { bytes })
            }

            Action::Update { .. } => {
                // Stage first so a failed copy never costs a backup slot
                let (staging, bytes) = stage_copy(&source, &destination)
                    .map_err(|e| ExecutionError::io("copy", &source, e))?;

                if let Err(e) = backups.rotate_and_stage(path) {
                    if let Err(discard_error) = discard_staged(&staging) {
                        warn!(
                            "Failed to remove staged copy {}: {}",
                            staging.display(),
                            discard_error
                        );
                    }
                    return Err(e.into());
                }

                commit(&staging, &destination)?;
                debug!("Updated {} ({} bytes)", destination.display(), bytes);
                Ok(Applied::Changed { bytes })
            }

            Action::Delete {
                kind: EntryKind::File,
                ..
            } => {
                match backups.rotate_and_stage(path)? {
                    BackupOutcome::Stored { slot } => {
                        debug!(
                            "Deleted {} (kept as {})",
                            destination.display(),
                            slot.display()
                        );
                    }
                    BackupOutcome::Disabled => {
                        fs::remove_file(&destination)
                            .map_err(|e| ExecutionError::io("remove file", &destination, e))?;
                        debug!("Deleted {}", destination.display());
                    }
                }
                Ok(Applied::Changed { bytes: 0 })
            }

            Action::Delete {
                kind: EntryKind::Directory,
                ..
            } => {
                let has_children = fs::read_dir(&destination)
                    .map_err(|e| ExecutionError::io("read directory", &destination, e))?
                    .next()
                    .is_some();

                if has_children {
                    let reason = "directory gained entries after the scan".to_string();
                    self.diagnostics.report(Diagnostic::warning(format!(
                        "not deleting {}: {}",
                        destination.display(),
                        reason
                    )));
                    return Ok(Applied::Skipped { reason });
                }

                fs::remove_dir(&destination)
                    .map_err(|e| ExecutionError::io("remove directory", &destination, e))?;
                debug!("Deleted directory {}", destination.display());
                Ok(Applied::Changed { bytes: 0 })
            }
        }
    }
}

/// Rename a staged copy into place, dropping it if that fails.
fn commit(staging: &Path, destination: &Path) -> std::result::Result<(), ExecutionError> {
    commit_staged(staging, destination).map_err(|e| {
        if let Err(discard_error) = discard_staged(staging) {
            warn!(
                "Failed to remove staged copy {}: {}",
                staging.display(),
                discard_error
            );
        }
        ExecutionError::io("rename", destination, e)
    })
}

fn join_scan(
    joined: std::result::Result<std::result::Result<FileMap, ScanError>, JoinError>,
    tree: &str,
) -> Result<FileMap> {
    let scanned =
        joined.map_err(|e| SyncError::Setup(format!("{} scan task failed: {}", tree, e)))?;
    Ok(scanned?)
}

/// Normalized relative path of `path` below `root`, if it lies there.
fn relative_within(root: &Path, path: &Path) -> Option<String> {
    let lexical = path
        .strip_prefix(root)
        .ok()
        .and_then(entry::normalize_relative);
    if lexical.is_some() {
        return lexical;
    }

    let root: PathBuf = root.canonicalize().ok()?;
    let path: PathBuf = path.canonicalize().ok()?;
    entry::normalize_relative(path.strip_prefix(&root).ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{MemoryDiagnostics, MemoryReporter};
    use crate::sync::plan::ActionKind;
    use filetime::FileTime;
    use std::io;
    use tempfile::TempDir;

    struct Trees {
        _temp_dir: TempDir,
        source: PathBuf,
        destination: PathBuf,
    }

    fn trees() -> io::Result<Trees> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("src");
        let destination = temp_dir.path().join("dst");
        fs::create_dir_all(&source)?;
        fs::create_dir_all(&destination)?;
        Ok(Trees {
            _temp_dir: temp_dir,
            source,
            destination,
        })
    }

    fn write(path: &Path, content: &str, mtime_secs: i64) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        filetime::set_file_mtime(path, FileTime::from_unix_time(mtime_secs, 0))
    }

    fn synchronizer(
        settings: Settings,
    ) -> (Synchronizer, Arc<MemoryReporter>, Arc<MemoryDiagnostics>) {
        let reporter = Arc::new(MemoryReporter::default());
        let diagnostics = Arc::new(MemoryDiagnostics::default());
        let sync = Synchronizer::new(settings, reporter.clone(), diagnostics.clone());
        (sync, reporter, diagnostics)
    }

    async fn run(
        settings: Settings,
    ) -> (Result<SyncSummary>, Arc<MemoryReporter>, Arc<MemoryDiagnostics>) {
        let (mut sync, reporter, diagnostics) = synchronizer(settings);
        sync.setup_synchronisation_data().await.unwrap();
        let result = sync.sync_destination();
        assert_eq!(sync.state(), SyncState::Done);
        (result, reporter, diagnostics)
    }

    #[tokio::test]
    async fn test_fresh_destination_receives_source() -> io::Result<()> {
        let trees = trees()?;
        write(&trees.source.join("a.txt"), "1", 1_000)?;
        write(&trees.source.join("sub/b.txt"), "2", 1_000)?;
        let mut settings = Settings::new(&trees.source, &trees.destination);
        settings.num_backups = 2;

        let (mut sync, reporter, _) = synchronizer(settings);
        sync.setup_synchronisation_data().await.unwrap();
        assert_eq!(sync.state(), SyncState::Planned);

        let planned: Vec<String> = sync.plan().unwrap().iter().map(|a| a.to_string()).collect();
        assert_eq!(
            planned,
            vec!["create sub/", "create a.txt", "create sub/b.txt"]
        );

        let summary = sync.sync_destination().unwrap();

        assert_eq!(fs::read_to_string(trees.destination.join("a.txt"))?, "1");
        assert_eq!(
            fs::read_to_string(trees.destination.join("sub/b.txt"))?,
            "2"
        );
        assert!(!trees.destination.join("_Older").exists());
        assert_eq!(summary.created, 2);
        assert_eq!(summary.directories_created, 1);
        assert_eq!(summary.bytes_copied, 2);
        assert!(summary.is_success());
        assert_eq!(reporter.summary(), Some(summary));
        Ok(())
    }

    #[tokio::test]
    async fn test_second_run_is_converged() -> io::Result<()> {
        let trees = trees()?;
        write(&trees.source.join("a.txt"), "alpha", 1_000)?;
        write(&trees.source.join("deep/er/c.txt"), "gamma", 2_000)?;
        write(&trees.destination.join("stale.txt"), "old", 500)?;

        let (first, _, _) = run(Settings::new(&trees.source, &trees.destination)).await;
        first.unwrap();

        let (mut sync, _, _) = synchronizer(Settings::new(&trees.source, &trees.destination));
        sync.setup_synchronisation_data().await.unwrap();
        assert!(sync.plan().unwrap().is_converged());

        let summary = sync.sync_destination().unwrap();
        assert_eq!(summary.changes(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_keeps_previous_version() -> io::Result<()> {
        let trees = trees()?;
        write(&trees.source.join("a.txt"), "B", 2_000)?;
        write(&trees.destination.join("a.txt"), "A", 1_000)?;

        let (result, _, _) = run(Settings::new(&trees.source, &trees.destination)).await;
        let summary = result.unwrap();

        assert_eq!(summary.updated, 1);
        assert_eq!(fs::read_to_string(trees.destination.join("a.txt"))?, "B");
        assert_eq!(
            fs::read_to_string(trees.destination.join("_Older/a.txt.1"))?,
            "A"
        );
        let mtime =
            FileTime::from_last_modification_time(&fs::metadata(trees.destination.join("a.txt"))?);
        assert_eq!(mtime.unix_seconds(), 2_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_moves_file_into_backup() -> io::Result<()> {
        let trees = trees()?;
        write(&trees.destination.join("old.txt"), "bye", 1_000)?;
        write(&trees.destination.join("gone/x.txt"), "x", 1_000)?;

        let (result, reporter, _) = run(Settings::new(&trees.source, &trees.destination)).await;
        let summary = result.unwrap();

        assert_eq!(summary.deleted, 3);
        assert!(!trees.destination.join("old.txt").exists());
        assert!(!trees.destination.join("gone").exists());
        assert_eq!(
            fs::read_to_string(trees.destination.join("_Older/old.txt.1"))?,
            "bye"
        );
        assert_eq!(
            fs::read_to_string(trees.destination.join("_Older/gone/x.txt.1"))?,
            "x"
        );

        let kinds: Vec<ActionKind> = reporter.action_reports().iter().map(|r| r.action).collect();
        assert_eq!(kinds, vec![ActionKind::Delete; 3]);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_without_backups_removes_file() -> io::Result<()> {
        let trees = trees()?;
        write(&trees.destination.join("old.txt"), "bye", 1_000)?;
        let mut settings = Settings::new(&trees.source, &trees.destination);
        settings.num_backups = 0;

        let (result, _, _) = run(settings).await;
        result.unwrap();

        assert!(!trees.destination.join("old.txt").exists());
        assert!(!trees.destination.join("_Older").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_info_mode_leaves_destination_untouched() -> io::Result<()> {
        let trees = trees()?;
        write(&trees.source.join("new.txt"), "new", 1_000)?;
        write(&trees.source.join("same.txt"), "same", 1_000)?;
        write(&trees.destination.join("same.txt"), "same", 1_000)?;
        write(&trees.destination.join("old.txt"), "old", 1_000)?;
        let mut settings = Settings::new(&trees.source, &trees.destination);
        settings.info_mode = true;

        let (result, reporter, _) = run(settings).await;
        let summary = result.unwrap();

        assert!(!trees.destination.join("new.txt").exists());
        assert!(trees.destination.join("old.txt").exists());
        assert!(!trees.destination.join("_Older").exists());
        assert!(summary.info_mode);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.unchanged, 1);

        let outcomes: Vec<ActionOutcome> = reporter
            .action_reports()
            .into_iter()
            .map(|r| r.outcome)
            .collect();
        assert_eq!(
            outcomes,
            vec![ActionOutcome::Planned, ActionOutcome::Planned, ActionOutcome::Unchanged]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_failure_is_isolated() -> io::Result<()> {
        let trees = trees()?;
        write(&trees.source.join("sub/a.txt"), "new content", 2_000)?;
        write(&trees.source.join("b.txt"), "b", 2_000)?;
        write(&trees.destination.join("sub/a.txt"), "old", 1_000)?;
        // A plain file where the backup directory for sub/ must go
        write(&trees.destination.join("_Older/sub"), "in the way", 1_000)?;

        let (result, reporter, diagnostics) =
            run(Settings::new(&trees.source, &trees.destination)).await;

        assert!(matches!(
            result,
            Err(SyncError::ActionsFailed {
                failed: 1,
                attempted: 2,
            })
        ));
        assert_eq!(
            fs::read_to_string(trees.destination.join("sub/a.txt"))?,
            "old"
        );
        assert_eq!(fs::read_to_string(trees.destination.join("b.txt"))?, "b");
        assert!(!trees.destination.join("sub/.a.txt.fsync-partial").exists());

        let summary = reporter.summary().unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.created, 1);
        assert!(diagnostics
            .diagnostics()
            .iter()
            .any(|d| matches!(d, Diagnostic::ActionFailed { path, .. } if path == "sub/a.txt")));
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_nothing() -> io::Result<()> {
        let trees = trees()?;
        write(&trees.source.join("a.txt"), "a", 1_000)?;
        write(&trees.source.join("b.txt"), "b", 1_000)?;
        let reporter = Arc::new(MemoryReporter::default());
        let cancel = CancellationToken::new();
        let mut sync = Synchronizer::with_cancel(
            Settings::new(&trees.source, &trees.destination),
            reporter.clone(),
            Arc::new(MemoryDiagnostics::default()),
            cancel.clone(),
        );

        sync.setup_synchronisation_data().await.unwrap();
        cancel.cancel();
        let result = sync.sync_destination();

        assert!(matches!(
            result,
            Err(SyncError::Cancelled {
                completed: 0,
                remaining: 2,
            })
        ));
        assert!(!trees.destination.join("a.txt").exists());
        let summary = sync.summary().unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.not_started, 2);
        assert_eq!(reporter.summary().as_ref(), Some(summary));
        Ok(())
    }

    #[tokio::test]
    async fn test_ignored_destination_paths_survive() -> io::Result<()> {
        let trees = trees()?;
        write(&trees.destination.join("logs/today.log"), "log", 1_000)?;
        write(&trees.destination.join("keep.txt"), "keep", 1_000)?;
        let mut settings = Settings::new(&trees.source, &trees.destination);
        settings
            .destination_paths_to_ignore
            .insert("logs".to_string());
        settings
            .destination_paths_to_ignore
            .insert("keep.txt".to_string());

        let (result, _, _) = run(settings).await;
        let summary = result.unwrap();

        assert_eq!(summary.deleted, 0);
        assert!(trees.destination.join("logs/today.log").exists());
        assert!(trees.destination.join("keep.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_directory_with_excluded_children_is_kept() -> io::Result<()> {
        let trees = trees()?;
        write(&trees.destination.join("project/.git/HEAD"), "ref", 1_000)?;
        write(&trees.destination.join("project/stale.txt"), "old", 1_000)?;
        let mut settings = Settings::new(&trees.source, &trees.destination);
        settings.names_to_skip.insert(".git".to_string());

        let (result, _, diagnostics) = run(settings.clone()).await;
        let summary = result.unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.skipped, 0);
        assert!(trees.destination.join("project/.git/HEAD").exists());
        assert!(!trees.destination.join("project/stale.txt").exists());
        assert!(diagnostics.is_empty());

        let (mut sync, _, _) = synchronizer(settings);
        sync.setup_synchronisation_data().await.unwrap();
        assert!(sync.plan().unwrap().is_converged());
        Ok(())
    }

    #[tokio::test]
    async fn test_directory_filled_after_scan_is_skipped() -> io::Result<()> {
        let trees = trees()?;
        fs::create_dir_all(trees.destination.join("gone"))?;

        let (mut sync, reporter, diagnostics) =
            synchronizer(Settings::new(&trees.source, &trees.destination));
        sync.setup_synchronisation_data().await.unwrap();
        write(&trees.destination.join("gone/late.txt"), "late", 1_000)?;
        let summary = sync.sync_destination().unwrap();

        assert_eq!(summary.skipped, 1);
        assert!(trees.destination.join("gone/late.txt").exists());
        assert!(matches!(
            reporter.action_reports()[0].outcome,
            ActionOutcome::Skipped { .. }
        ));
        assert_eq!(diagnostics.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_directories_are_opt_in() -> io::Result<()> {
        let trees = trees()?;
        fs::create_dir_all(trees.source.join("empty/nested"))?;

        let (result, _, _) = run(Settings::new(&trees.source, &trees.destination)).await;
        result.unwrap();
        assert!(!trees.destination.join("empty").exists());

        let mut settings = Settings::new(&trees.source, &trees.destination);
        settings.create_empty_directories = true;
        let (result, _, _) = run(settings).await;
        assert_eq!(result.unwrap().directories_created, 2);
        assert!(trees.destination.join("empty/nested").is_dir());
        Ok(())
    }

    #[tokio::test]
    async fn test_checksum_mode_catches_same_size_edit() -> io::Result<()> {
        let trees = trees()?;
        write(&trees.source.join("a.txt"), "AAAA", 1_000)?;
        write(&trees.destination.join("a.txt"), "BBBB", 1_000)?;

        let (mut sync, _, _) = synchronizer(Settings::new(&trees.source, &trees.destination));
        sync.setup_synchronisation_data().await.unwrap();
        assert!(sync.plan().unwrap().is_converged());

        let mut settings = Settings::new(&trees.source, &trees.destination);
        settings.calc_checksum = true;
        let (result, _, _) = run(settings).await;

        assert_eq!(result.unwrap().updated, 1);
        assert_eq!(fs::read_to_string(trees.destination.join("a.txt"))?, "AAAA");
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_folder_inside_source_is_excluded() -> io::Result<()> {
        let trees = trees()?;
        write(&trees.source.join("a.txt"), "a", 1_000)?;
        write(&trees.source.join("history/a.txt.1"), "old", 1_000)?;
        let mut settings = Settings::new(&trees.source, &trees.destination);
        settings.backup_folder = trees.source.join("history");

        let (mut sync, _, diagnostics) = synchronizer(settings);
        sync.setup_synchronisation_data().await.unwrap();

        let paths: Vec<&str> = sync.plan().unwrap().iter().map(|a| a.path()).collect();
        assert_eq!(paths, vec!["a.txt"]);
        assert!(matches!(diagnostics.diagnostics()[0], Diagnostic::Warning { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_setup_rejects_bad_input() -> io::Result<()> {
        let trees = trees()?;

        let (mut sync, _, _) = synchronizer(Settings::new("", &trees.destination));
        assert!(matches!(
            sync.setup_synchronisation_data().await,
            Err(SyncError::Setup(_))
        ));
        assert_eq!(sync.state(), SyncState::Idle);

        let missing = trees.source.join("missing");
        let (mut sync, _, _) = synchronizer(Settings::new(&missing, &trees.destination));
        assert!(matches!(
            sync.setup_synchronisation_data().await,
            Err(SyncError::Scan(ScanError::RootMissing(_)))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_state_machine_order_is_enforced() -> io::Result<()> {
        let trees = trees()?;
        let (mut sync, _, _) = synchronizer(Settings::new(&trees.source, &trees.destination));

        assert!(matches!(
            sync.sync_destination(),
            Err(SyncError::InvalidState {
                expected: "planned",
                found: "idle",
            })
        ));

        sync.setup_synchronisation_data().await.unwrap();
        assert!(matches!(
            sync.setup_synchronisation_data().await,
            Err(SyncError::Setup(_))
        ));

        sync.sync_destination().unwrap();
        assert!(matches!(
            sync.sync_destination(),
            Err(SyncError::InvalidState { found: "done", .. })
        ));
        Ok(())
    }
}
