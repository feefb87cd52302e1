//! Status events and diagnostics.
//!
//! The synchronizer never prints anything itself. It hands events to a
//! [`StatusReporter`] and non-fatal problems to a [`DiagnosticsSink`], both
//! supplied by the caller:
//! - status: one event per planned or executed action, plus a start event
//!   and a terminal summary
//! - diagnostics: skipped scan entries, failed actions, warnings

pub mod format;

use crate::fs::entry::EntryKind;
use crate::sync::plan::{Action, ActionKind};
use crate::utils::errors::ScanEntryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use format::{format_bytes, format_duration, plural};

/// Events emitted by the synchronizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SyncEvent {
    /// Planning finished, execution (or reporting) is about to start
    #[serde(rename = "sync:started")]
    Started {
        run_id: Uuid,
        source: String,
        destination: String,
        info_mode: bool,
        planned_actions: usize,
        started_at: DateTime<Utc>,
    },

    /// One action was planned (info mode) or executed
    #[serde(rename = "action")]
    Action(ActionReport),

    /// Terminal summary of the run
    #[serde(rename = "sync:summary")]
    Summary(SyncSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReport {
    pub path: String,
    pub action: ActionKind,
    pub kind: EntryKind,
    pub outcome: ActionOutcome,
}

impl ActionReport {
    pub fn new(action: &Action, outcome: ActionOutcome) -> Self {
        Self {
            path: action.path().to_string(),
            action: action.action_kind(),
            kind: action.entry_kind(),
            outcome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Info mode: would be applied
    Planned,
    Applied,
    Unchanged,
    /// Deliberately left alone, not an error
    Skipped { reason: String },
    Failed { reason: String },
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub info_mode: bool,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub directories_created: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Actions never started because the run was cancelled
    pub not_started: usize,
    pub bytes_copied: u64,
    pub cancelled: bool,
    pub duration_ms: u64,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncSummary {
    pub fn new(run_id: Uuid, info_mode: bool) -> Self {
        Self {
            run_id,
            info_mode,
            ..Self::default()
        }
    }

    /// Count one reported action.
    pub fn record(&mut self, report: &ActionReport) {
        match &report.outcome {
            ActionOutcome::Failed { .. } => self.failed += 1,
            ActionOutcome::Skipped { .. } => self.skipped += 1,
            ActionOutcome::Unchanged => self.unchanged += 1,
            ActionOutcome::Planned | ActionOutcome::Applied => match (report.action, report.kind) {
                (ActionKind::Create, EntryKind::Directory)
                | (ActionKind::CreateEmptyDirectory, _) => self.directories_created += 1,
                (ActionKind::Create, EntryKind::File) => self.created += 1,
                (ActionKind::Update, _) => self.updated += 1,
                (ActionKind::Delete, _) => self.deleted += 1,
                (ActionKind::Unchanged, _) => self.unchanged += 1,
            },
        }
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.duration_ms = elapsed.as_millis() as u64;
        self.finished_at = Some(Utc::now());
    }

    /// Actions that changed (or, in info mode, would change) the destination
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted + self.directories_created
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} directories created, {} unchanged, {} skipped, {} failed, {} copied in {}",
            self.created,
            self.updated,
            self.deleted,
            self.directories_created,
            self.unchanged,
            self.skipped,
            self.failed,
            format_bytes(self.bytes_copied),
            format_duration(Duration::from_millis(self.duration_ms)),
        )
    }
}

/// Non-fatal problems met during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Diagnostic {
    EntrySkipped { path: String, reason: String },
    ActionFailed {
        action: ActionKind,
        path: String,
        reason: String,
    },
    Warning { message: String },
}

impl Diagnostic {
    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic::Warning {
            message: message.into(),
        }
    }
}

impl From<ScanEntryError> for Diagnostic {
    fn from(e: ScanEntryError) -> Self {
        Diagnostic::EntrySkipped {
            path: e.path.display().to_string(),
            reason: e.reason,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::EntrySkipped { path, reason } => write!(f, "skipped {}: {}", path, reason),
            Diagnostic::ActionFailed {
                action,
                path,
                reason,
            } => write!(f, "failed to {} {}: {}", action, path, reason),
            Diagnostic::Warning { message } => f.write_str(message),
        }
    }
}

/// Receives one event per planned/executed action and a terminal summary.
pub trait StatusReporter: Send + Sync {
    fn emit(&self, event: SyncEvent);
}

/// Receives non-fatal warnings.
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Human-readable status lines through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn emit(&self, event: SyncEvent) {
        match event {
            SyncEvent::Started {
                run_id,
                source,
                destination,
                info_mode,
                planned_actions,
                ..
            } => {
                let mode = if info_mode { " (info only)" } else { "" };
                info!(
                    "Sync {} started{}: {} -> {}, {} planned",
                    run_id,
                    mode,
                    source,
                    destination,
                    plural(planned_actions, "action")
                );
            }
            SyncEvent::Action(report) => {
                let label = match report.kind {
                    EntryKind::Directory => format!("{}/", report.path),
                    EntryKind::File => report.path.clone(),
                };
                match &report.outcome {
                    ActionOutcome::Planned => info!("[plan] {} {}", report.action, label),
                    ActionOutcome::Applied => info!("{} {}", report.action, label),
                    ActionOutcome::Unchanged => debug!("unchanged {}", label),
                    ActionOutcome::Skipped { reason } => {
                        warn!("{} {} skipped: {}", report.action, label, reason)
                    }
                    ActionOutcome::Failed { reason } => {
                        error!("{} {} failed: {}", report.action, label, reason)
                    }
                }
            }
            SyncEvent::Summary(summary) => {
                if summary.cancelled {
                    warn!(
                        "Sync cancelled ({} not started): {}",
                        summary.not_started, summary
                    );
                } else if summary.failed > 0 {
                    error!("Sync finished with failures: {}", summary);
                } else {
                    info!("Sync finished: {}", summary);
                }
            }
        }
    }
}

/// One JSON object per event on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLinesReporter;

impl StatusReporter for JsonLinesReporter {
    fn emit(&self, event: SyncEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize sync event: {}", e);
                return;
            }
        };

        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", line) {
            warn!("Failed to write sync event: {}", e);
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<SyncEvent>>,
}

impl MemoryReporter {
    pub fn events(&self) -> Vec<SyncEvent> {
        lock(&self.events).clone()
    }

    pub fn action_reports(&self) -> Vec<ActionReport> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                SyncEvent::Action(report) => Some(report.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn summary(&self) -> Option<SyncSummary> {
        lock(&self.events)
            .iter()
            .rev()
            .find_map(|event| match event {
                SyncEvent::Summary(summary) => Some(summary.clone()),
                _ => None,
            })
    }
}

impl StatusReporter for MemoryReporter {
    fn emit(&self, event: SyncEvent) {
        lock(&self.events).push(event);
    }
}

/// Logs every diagnostic as a warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn report(&self, diagnostic: Diagnostic) {
        warn!("{}", diagnostic);
    }
}

/// Collects diagnostics in memory.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl MemoryDiagnostics {
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.diagnostics).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.diagnostics).is_empty()
    }
}

impl DiagnosticsSink for MemoryDiagnostics {
    fn report(&self, diagnostic: Diagnostic) {
        lock(&self.diagnostics).push(diagnostic);
    }
}

// A panic while holding the lock cannot leave a Vec half-pushed
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
