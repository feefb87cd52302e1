//! Change planning.
//!
//! [`plan`] compares a source scan with a destination scan and produces the
//! ordered list of actions that converges the destination onto the source.
//! It never touches the filesystem.
//!
//! Plan order:
//! 1. deletes, deepest first (files before directories at equal depth),
//! 2. directory creation, shallowest first,
//! 3. file creates and updates,
//! 4. unchanged entries (reported, never executed).
//!
//! Deleting first lets a kind change (file replaced by a directory or the
//! reverse) clear the old entry before its replacement is created.

use crate::fs::entry::{self, EntryKind, FileEntry, FileMap};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    CreateEmptyDirectory,
    Unchanged,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
            ActionKind::CreateEmptyDirectory => "create empty directory",
            ActionKind::Unchanged => "unchanged",
        };
        f.write_str(label)
    }
}

/// One step of a [`SyncPlan`]. Paths are normalized relative paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Copy a source file, or create a directory that will receive files
    Create { path: String, kind: EntryKind },
    /// Replace a destination file whose content differs
    Update { path: String },
    /// Remove a destination entry absent from the source
    Delete { path: String, kind: EntryKind },
    /// Create a source directory that holds no included files
    CreateEmptyDirectory { path: String },
    /// Already converged
    Unchanged { path: String, kind: EntryKind },
}

impl Action {
    pub fn path(&self) -> &str {
        match self {
            Action::Create { path, .. }
            | Action::Update { path }
            | Action::Delete { path, .. }
            | Action::CreateEmptyDirectory { path }
            | Action::Unchanged { path, .. } => path,
        }
    }

    pub fn action_kind(&self) -> ActionKind {
        match self {
            Action::Create { .. } => ActionKind::Create,
            Action::Update { .. } => ActionKind::Update,
            Action::Delete { .. } => ActionKind::Delete,
            Action::CreateEmptyDirectory { .. } => ActionKind::CreateEmptyDirectory,
            Action::Unchanged { .. } => ActionKind::Unchanged,
        }
    }

    /// Kind of the filesystem object the action targets.
    pub fn entry_kind(&self) -> EntryKind {
        match self {
            Action::Create { kind, .. }
            | Action::Delete { kind, .. }
            | Action::Unchanged { kind, .. } => *kind,
            Action::Update { .. } => EntryKind::File,
            Action::CreateEmptyDirectory { .. } => EntryKind::Directory,
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, Action::Unchanged { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entry_kind() {
            EntryKind::Directory => write!(f, "{} {}/", self.action_kind(), self.path()),
            EntryKind::File => write!(f, "{} {}", self.action_kind(), self.path()),
        }
    }
}

/// Ordered actions converging the destination onto the source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    actions: Vec<Action>,
}

impl SyncPlan {
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions that change the destination.
    pub fn mutations(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|action| action.is_mutation())
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations().count()
    }

    /// True when nothing but `Unchanged` entries remain.
    pub fn is_converged(&self) -> bool {
        self.mutation_count() == 0
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions
            .iter()
            .filter(|action| action.action_kind() == kind)
            .count()
    }
}

impl<'a> IntoIterator for &'a SyncPlan {
    type Item = &'a Action;
    type IntoIter = std::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}

/// Compare two scans and build the plan.
///
/// `ignore` holds normalized relative paths; anything at or below one of
/// them is never deleted. Destination directories that still contain an
/// ignored entry, or an entry the scan filtered out, are kept as well.
pub fn plan(
    source: &FileMap,
    destination: &FileMap,
    ignore: &BTreeSet<String>,
    create_empty_dirs: bool,
) -> SyncPlan {
    let is_ignored = |path: &str| ignore.iter().any(|ignored| entry::is_under(path, ignored));

    // Source directories with at least one included file below them
    let mut populated: HashSet<&str> = HashSet::new();
    for file in source.values().filter(|e| !e.is_dir()) {
        for ancestor in entry::ancestors(&file.relative_path) {
            if !populated.insert(ancestor) {
                break;
            }
        }
    }

    // Destination directories that must survive because of an ignored or unscanned descendant
    let mut retained: HashSet<&str> = HashSet::new();
    for path in destination.keys().filter(|path| is_ignored(path)) {
        retained.extend(entry::ancestors(path));
    }
    for dir in destination.values().filter(|e| e.holds_excluded) {
        retained.insert(&dir.relative_path);
        retained.extend(entry::ancestors(&dir.relative_path));
    }

    let mut planner = Planner {
        populated: &populated,
        create_empty_dirs,
        deletes: Vec::new(),
        dir_creates: Vec::new(),
        file_changes: Vec::new(),
        unchanged: Vec::new(),
    };

    for (path, src) in source {
        match destination.get(path) {
            None => planner.creation(src),
            Some(dst) if dst.kind == src.kind => {
                if src.is_dir() || src.same_content(dst) {
                    planner.unchanged.push(Action::Unchanged {
                        path: path.clone(),
                        kind: src.kind,
                    });
                } else {
                    planner
                        .file_changes
                        .push(Action::Update { path: path.clone() });
                }
            }
            Some(dst) => {
                // Kind changed: the old entry has to go before the new one appears
                if is_ignored(path) || retained.contains(path.as_str()) {
                    continue;
                }
                planner.deletes.push(Action::Delete {
                    path: path.clone(),
                    kind: dst.kind,
                });
                planner.creation(src);
            }
        }
    }

    for (path, dst) in destination {
        if source.contains_key(path) || is_ignored(path) || retained.contains(path.as_str()) {
            continue;
        }
        planner.deletes.push(Action::Delete {
            path: path.clone(),
            kind: dst.kind,
        });
    }

    planner.finish()
}

struct Planner<'a> {
    populated: &'a HashSet<&'a str>,
    create_empty_dirs: bool,
    deletes: Vec<Action>,
    dir_creates: Vec<Action>,
    file_changes: Vec<Action>,
    unchanged: Vec<Action>,
}

impl Planner<'_> {
    fn creation(&mut self, src: &FileEntry) {
        let path = src.relative_path.clone();

        if !src.is_dir() {
            self.file_changes.push(Action::Create {
                path,
                kind: EntryKind::File,
            });
        } else if self.populated.contains(path.as_str()) {
            self.dir_creates.push(Action::Create {
                path,
                kind: EntryKind::Directory,
            });
        } else if self.create_empty_dirs {
            self.dir_creates.push(Action::CreateEmptyDirectory { path });
        }
    }

    fn finish(mut self) -> SyncPlan {
        self.deletes.sort_by(|a, b| {
            let key = |action: &Action| {
                let kind_rank = match action.entry_kind() {
                    EntryKind::File => 0,
                    EntryKind::Directory => 1,
                };
                (Reverse(entry::depth(action.path())), kind_rank)
            };
            key(a).cmp(&key(b)).then_with(|| a.path().cmp(b.path()))
        });
        self.dir_creates.sort_by(|a, b| {
            (entry::depth(a.path()), a.path()).cmp(&(entry::depth(b.path()), b.path()))
        });
        self.file_changes.sort_by(|a, b| a.path().cmp(b.path()));
        self.unchanged.sort_by(|a, b| a.path().cmp(b.path()));

        let mut actions = self.deletes;
        actions.append(&mut self.dir_creates);
        actions.append(&mut self.file_changes);
        actions.append(&mut self.unchanged);

        SyncPlan { actions }
    }
}
