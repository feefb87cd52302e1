//! Change planning and backup rotation.

pub mod backup;
pub mod plan;

pub use backup::{BackupManager, BackupOutcome};
pub use plan::{plan, Action, ActionKind, SyncPlan};
