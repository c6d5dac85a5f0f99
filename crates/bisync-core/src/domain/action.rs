//! Cross-side actions and conflicts
//!
//! An [`Action`] is derived from the pair of per-side changes for one path.
//! The full set of actions for a run forms an [`ActionPlan`].

use std::fmt;

use serde::{Deserialize, Serialize};

use super::change::ChangeKind;
use super::listing::{FileRecord, Side};
use super::newtypes::RelPath;

/// What the propagator must do for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Copy the source side's version to the other side
    CopyToOther,
    /// Delete the path on the side opposite the source
    DeleteOnOther,
    /// Preserve both versions under side-tagged names
    RenameConflictBoth,
    /// Nothing to do
    NoOp,
}

impl ActionKind {
    pub fn is_mutating(self) -> bool {
        !matches!(self, ActionKind::NoOp)
    }

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::CopyToOther => "copy",
            ActionKind::DeleteOnOther => "delete",
            ActionKind::RenameConflictBoth => "conflict",
            ActionKind::NoOp => "noop",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why two versions could not be reconciled automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ConflictKind {
    /// Both sides hold a new or modified version
    BothChanged,
    /// One side deleted the path while the other changed it
    DeletedVsChanged { deleted: Side },
}

/// A path changed on both sides since the last run
///
/// Records both sides' versions. Every present version is preserved:
/// for `BothChanged` each version is renamed to its side-tagged name and
/// copied across; for `DeletedVsChanged` the surviving version is restored
/// on the deleted side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    path: RelPath,
    kind: ConflictKind,
    path1: Option<FileRecord>,
    path2: Option<FileRecord>,
    path1_name: Option<RelPath>,
    path2_name: Option<RelPath>,
}

impl Conflict {
    /// Conflict where both sides changed, with the disambiguated names
    pub fn both_changed(
        path: RelPath,
        path1: FileRecord,
        path2: FileRecord,
        path1_name: RelPath,
        path2_name: RelPath,
    ) -> Self {
        Self {
            path,
            kind: ConflictKind::BothChanged,
            path1: Some(path1),
            path2: Some(path2),
            path1_name: Some(path1_name),
            path2_name: Some(path2_name),
        }
    }

    /// Conflict where `deleted` removed the path and the other side changed it
    pub fn deleted_vs_changed(path: RelPath, deleted: Side, survivor: FileRecord) -> Self {
        let (path1, path2) = match deleted {
            Side::Path1 => (None, Some(survivor)),
            Side::Path2 => (Some(survivor), None),
        };
        Self {
            path,
            kind: ConflictKind::DeletedVsChanged { deleted },
            path1,
            path2,
            path1_name: None,
            path2_name: None,
        }
    }

    pub fn path(&self) -> &RelPath {
        &self.path
    }

    pub fn kind(&self) -> ConflictKind {
        self.kind
    }

    /// The version recorded for `side`, if that side still has one
    pub fn record(&self, side: Side) -> Option<&FileRecord> {
        match side {
            Side::Path1 => self.path1.as_ref(),
            Side::Path2 => self.path2.as_ref(),
        }
    }

    /// The name `side`'s version is preserved under, for `BothChanged`
    pub fn renamed(&self, side: Side) -> Option<&RelPath> {
        match side {
            Side::Path1 => self.path1_name.as_ref(),
            Side::Path2 => self.path2_name.as_ref(),
        }
    }
}

/// One cross-side operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    kind: ActionKind,
    path: RelPath,
    source_side: Side,
    path1_change: Option<ChangeKind>,
    path2_change: Option<ChangeKind>,
    conflict: Option<Conflict>,
}

impl Action {
    pub fn new(
        kind: ActionKind,
        path: RelPath,
        source_side: Side,
        path1_change: Option<ChangeKind>,
        path2_change: Option<ChangeKind>,
    ) -> Self {
        Self {
            kind,
            path,
            source_side,
            path1_change,
            path2_change,
            conflict: None,
        }
    }

    /// Builds a `RenameConflictBoth` action carrying its conflict record
    pub fn conflict(
        conflict: Conflict,
        path1_change: Option<ChangeKind>,
        path2_change: Option<ChangeKind>,
    ) -> Self {
        let source_side = match conflict.kind() {
            ConflictKind::DeletedVsChanged { deleted } => deleted.other(),
            ConflictKind::BothChanged => Side::Path1,
        };
        Self {
            kind: ActionKind::RenameConflictBoth,
            path: conflict.path().clone(),
            source_side,
            path1_change,
            path2_change,
            conflict: Some(conflict),
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn path(&self) -> &RelPath {
        &self.path
    }

    /// Side whose change drives this action
    pub fn source_side(&self) -> Side {
        self.source_side
    }

    /// Side that is mutated by a copy or delete
    pub fn target_side(&self) -> Side {
        self.source_side.other()
    }

    pub fn change_on(&self, side: Side) -> Option<ChangeKind> {
        match side {
            Side::Path1 => self.path1_change,
            Side::Path2 => self.path2_change,
        }
    }

    pub fn conflict_record(&self) -> Option<&Conflict> {
        self.conflict.as_ref()
    }

    pub fn is_mutating(&self) -> bool {
        self.kind.is_mutating()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ActionKind::CopyToOther => write!(
                f,
                "copy {} {} -> {}",
                self.path,
                self.source_side,
                self.target_side()
            ),
            ActionKind::DeleteOnOther => write!(f, "delete {} on {}", self.path, self.target_side()),
            ActionKind::RenameConflictBoth => write!(f, "conflict {}", self.path),
            ActionKind::NoOp => write!(f, "noop {}", self.path),
        }
    }
}

/// Counts of planned actions, for reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub copies_to_path1: usize,
    pub copies_to_path2: usize,
    pub deletes_on_path1: usize,
    pub deletes_on_path2: usize,
    pub conflicts: usize,
    pub unchanged: usize,
}

impl PlanSummary {
    pub fn mutating(&self) -> usize {
        self.copies_to_path1
            + self.copies_to_path2
            + self.deletes_on_path1
            + self.deletes_on_path2
            + self.conflicts
    }
}

/// The ordered action plan for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlan {
    actions: Vec<Action>,
}

impl ActionPlan {
    /// Builds a plan; actions are kept in path order
    pub fn new(mut actions: Vec<Action>) -> Self {
        actions.sort_by(|a, b| a.path().cmp(b.path()));
        Self { actions }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Actions that will touch a tree
    pub fn mutating(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| a.is_mutating())
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.actions.iter().filter_map(|a| a.conflict_record())
    }

    /// True when nothing would be changed
    pub fn is_noop(&self) -> bool {
        self.mutating().next().is_none()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            match (action.kind(), action.target_side()) {
                (ActionKind::CopyToOther, Side::Path1) => summary.copies_to_path1 += 1,
                (ActionKind::CopyToOther, Side::Path2) => summary.copies_to_path2 += 1,
                (ActionKind::DeleteOnOther, Side::Path1) => summary.deletes_on_path1 += 1,
                (ActionKind::DeleteOnOther, Side::Path2) => summary.deletes_on_path2 += 1,
                (ActionKind::RenameConflictBoth, _) => summary.conflicts += 1,
                (ActionKind::NoOp, _) => summary.unchanged += 1,
            }
        }
        summary
    }
}
