//! Merging the two per-side change sets into one action plan
//!
//! [`ConflictResolver::resolve`] is a pure function of the Path1 and Path2
//! change sets. A path missing from one side's change set is treated as
//! `Unchanged` on that side. The rule table, evaluated per path:
//!
//! | Path1           | Path2           | Action                       |
//! |-----------------|-----------------|------------------------------|
//! | Unchanged       | Unchanged       | NoOp                         |
//! | New/Newer/Older | Unchanged       | CopyToOther 1 -> 2           |
//! | Unchanged       | New/Newer/Older | CopyToOther 2 -> 1           |
//! | Deleted         | Unchanged       | DeleteOnOther (on 2)         |
//! | Unchanged       | Deleted         | DeleteOnOther (on 1)         |
//! | Deleted         | Deleted         | NoOp                         |
//! | New/Newer/Older | New/Newer/Older | RenameConflictBoth           |
//! | Deleted         | New/Newer/Older | RenameConflictBoth, changed version survives |
//!
//! Two changed versions that are equivalent (same size, and equal hashes or
//! modification times within tolerance) collapse to NoOp. Conflicts are never
//! merged and never resolved by deleting a version.

use std::collections::{BTreeMap, HashSet};

use chrono::Duration;
use tracing::{debug, info};

use bisync_core::domain::{
    Action, ActionKind, ActionPlan, Change, ChangeKind, Conflict, FileRecord, PathListing,
    RelPath, Side,
};

use crate::{error::ConflictError, namer::ConflictNamer};

/// Merges per-side changes into an [`ActionPlan`]
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    namer: ConflictNamer,
    tolerance: Duration,
}

impl ConflictResolver {
    pub fn new(namer: ConflictNamer, tolerance: std::time::Duration) -> Self {
        Self {
            namer,
            tolerance: Duration::from_std(tolerance).unwrap_or_else(|_| Duration::zero()),
        }
    }

    /// Two records describe the same content
    fn equivalent(&self, a: &FileRecord, b: &FileRecord) -> bool {
        if a.size() != b.size() {
            return false;
        }
        match (a.hash(), b.hash()) {
            (Some(ha), Some(hb)) => ha == hb,
            _ => (a.modified() - b.modified()).abs() <= self.tolerance,
        }
    }

    /// Builds the action plan for a normal run
    pub fn resolve(
        &self,
        path1_changes: &[Change],
        path2_changes: &[Change],
    ) -> Result<ActionPlan, ConflictError> {
        let by_path1 = index(path1_changes, Side::Path1)?;
        let by_path2 = index(path2_changes, Side::Path2)?;

        // Every name currently present on either side; conflict names must avoid them.
        let mut occupied: HashSet<RelPath> = path1_changes
            .iter()
            .chain(path2_changes)
            .filter_map(|c| c.current().map(|r| r.path().clone()))
            .collect();

        let paths: std::collections::BTreeSet<&RelPath> =
            by_path1.keys().chain(by_path2.keys()).copied().collect();

        let mut actions = Vec::with_capacity(paths.len());
        for path in paths {
            let c1 = by_path1.get(path).copied();
            let c2 = by_path2.get(path).copied();
            let action = self.resolve_path(path, c1, c2, &mut occupied)?;
            debug!(path = %path, action = %action.kind(), "Resolved path");
            actions.push(action);
        }

        let plan = ActionPlan::new(actions);
        let summary = plan.summary();
        info!(
            copies_to_path1 = summary.copies_to_path1,
            copies_to_path2 = summary.copies_to_path2,
            deletes_on_path1 = summary.deletes_on_path1,
            deletes_on_path2 = summary.deletes_on_path2,
            conflicts = summary.conflicts,
            "Action plan built"
        );
        Ok(plan)
    }

    fn resolve_path(
        &self,
        path: &RelPath,
        c1: Option<&Change>,
        c2: Option<&Change>,
        occupied: &mut HashSet<RelPath>,
    ) -> Result<Action, ConflictError> {
        let k1 = c1.map(Change::kind).unwrap_or(ChangeKind::Unchanged);
        let k2 = c2.map(Change::kind).unwrap_or(ChangeKind::Unchanged);
        let record1 = c1.and_then(Change::current);
        let record2 = c2.and_then(Change::current);
        let origin = (c1.map(Change::kind), c2.map(Change::kind));

        let simple = |kind: ActionKind, source: Side| {
            Action::new(kind, path.clone(), source, origin.0, origin.1)
        };

        let action = match (k1, k2) {
            (ChangeKind::Unchanged, ChangeKind::Unchanged) => simple(ActionKind::NoOp, Side::Path1),
            (ChangeKind::Deleted, ChangeKind::Deleted) => simple(ActionKind::NoOp, Side::Path1),

            (a, ChangeKind::Unchanged) if a.is_content_change() => {
                simple(ActionKind::CopyToOther, Side::Path1)
            }
            (ChangeKind::Unchanged, b) if b.is_content_change() => {
                simple(ActionKind::CopyToOther, Side::Path2)
            }

            // A deletion only propagates if the other side still holds the file
            (ChangeKind::Deleted, ChangeKind::Unchanged) => match record2 {
                Some(_) => simple(ActionKind::DeleteOnOther, Side::Path1),
                None => simple(ActionKind::NoOp, Side::Path1),
            },
            (ChangeKind::Unchanged, ChangeKind::Deleted) => match record1 {
                Some(_) => simple(ActionKind::DeleteOnOther, Side::Path2),
                None => simple(ActionKind::NoOp, Side::Path2),
            },

            (ChangeKind::Deleted, b) if b.is_content_change() => {
                let survivor = required(record2, path, Side::Path2)?;
                info!(path = %path, "Conflict: deleted on path1, changed on path2; keeping path2 version");
                Action::conflict(
                    Conflict::deleted_vs_changed(path.clone(), Side::Path1, survivor.clone()),
                    origin.0,
                    origin.1,
                )
            }
            (a, ChangeKind::Deleted) if a.is_content_change() => {
                let survivor = required(record1, path, Side::Path1)?;
                info!(path = %path, "Conflict: deleted on path2, changed on path1; keeping path1 version");
                Action::conflict(
                    Conflict::deleted_vs_changed(path.clone(), Side::Path2, survivor.clone()),
                    origin.0,
                    origin.1,
                )
            }

            // Both changed
            _ => {
                let r1 = required(record1, path, Side::Path1)?;
                let r2 = required(record2, path, Side::Path2)?;
                if self.equivalent(r1, r2) {
                    debug!(path = %path, "Both sides changed to equivalent versions");
                    simple(ActionKind::NoOp, Side::Path1)
                } else {
                    let name1 = self.allocate(path, Side::Path1, occupied)?;
                    let name2 = self.allocate(path, Side::Path2, occupied)?;
                    info!(
                        path = %path,
                        path1_copy = %name1,
                        path2_copy = %name2,
                        "Conflict: both sides changed; preserving both versions"
                    );
                    Action::conflict(
                        Conflict::both_changed(path.clone(), r1.clone(), r2.clone(), name1, name2),
                        origin.0,
                        origin.1,
                    )
                }
            }
        };

        Ok(action)
    }

    fn allocate(
        &self,
        path: &RelPath,
        side: Side,
        occupied: &mut HashSet<RelPath>,
    ) -> Result<RelPath, ConflictError> {
        let name = self
            .namer
            .generate_unique(path, side, |candidate| occupied.contains(candidate))?;
        occupied.insert(name.clone());
        Ok(name)
    }

    /// Builds the action plan for a resync run
    ///
    /// Both sides are compared against an empty baseline, so every present
    /// file counts as `New`. Files only on Path2 are copied to Path1, then
    /// Path1 is made authoritative: every Path1 file that differs from (or
    /// is missing on) Path2 is copied over. Nothing is deleted.
    pub fn resync_plan(&self, path1: &PathListing, path2: &PathListing) -> ActionPlan {
        let mut actions = Vec::with_capacity(path1.len().max(path2.len()));

        for record in path2.records() {
            if !path1.contains(record.path()) {
                actions.push(Action::new(
                    ActionKind::CopyToOther,
                    record.path().clone(),
                    Side::Path2,
                    None,
                    Some(ChangeKind::New),
                ));
            }
        }

        for record in path1.records() {
            let other = path2.get(record.path());
            let kind = match other {
                Some(r2) if self.equivalent(record, r2) => ActionKind::NoOp,
                _ => ActionKind::CopyToOther,
            };
            actions.push(Action::new(
                kind,
                record.path().clone(),
                Side::Path1,
                Some(ChangeKind::New),
                other.map(|_| ChangeKind::New),
            ));
        }

        let plan = ActionPlan::new(actions);
        let summary = plan.summary();
        info!(
            copies_to_path1 = summary.copies_to_path1,
            copies_to_path2 = summary.copies_to_path2,
            "Resync plan built"
        );
        plan
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(
            ConflictNamer::default(),
            std::time::Duration::from_millis(bisync_core::config::DEFAULT_MODTIME_TOLERANCE_MS),
        )
    }
}

fn index(changes: &[Change], side: Side) -> Result<BTreeMap<&RelPath, &Change>, ConflictError> {
    let mut map = BTreeMap::new();
    for change in changes {
        if change.side() != side {
            return Err(ConflictError::WrongSide {
                path: change.path().to_string(),
                expected: side.to_string(),
                actual: change.side().to_string(),
            });
        }
        if map.insert(change.path(), change).is_some() {
            return Err(ConflictError::DuplicateChange {
                path: change.path().to_string(),
                side: side.to_string(),
            });
        }
    }
    Ok(map)
}

fn required<'a>(
    record: Option<&'a FileRecord>,
    path: &RelPath,
    side: Side,
) -> Result<&'a FileRecord, ConflictError> {
    record.ok_or_else(|| ConflictError::MissingRecord {
        path: path.to_string(),
        side: side.to_string(),
    })
}
