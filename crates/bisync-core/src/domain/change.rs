//! Per-side change records
//!
//! A [`Change`] describes how one path on one side differs from that same
//! side's previous snapshot. Changes never carry cross-side knowledge.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::listing::{FileRecord, Side};
use super::newtypes::RelPath;

/// Classification of a path relative to the side's previous snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Present now, absent before
    New,
    /// Modification time moved forward beyond the tolerance, or content differs
    Newer,
    /// Modification time moved backward beyond the tolerance
    Older,
    /// Present before, absent now
    Deleted,
    /// Same within tolerance
    Unchanged,
}

impl ChangeKind {
    /// New, Newer or Older: the side holds a version the other side lacks
    pub fn is_content_change(self) -> bool {
        matches!(self, ChangeKind::New | ChangeKind::Newer | ChangeKind::Older)
    }

    pub fn is_deleted(self) -> bool {
        matches!(self, ChangeKind::Deleted)
    }

    pub fn name(self) -> &'static str {
        match self {
            ChangeKind::New => "new",
            ChangeKind::Newer => "newer",
            ChangeKind::Older => "older",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One path's change on one side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    side: Side,
    path: RelPath,
    kind: ChangeKind,
    /// Record from the current listing (absent for `Deleted`)
    current: Option<FileRecord>,
    /// Record from the previous listing (absent for `New`)
    previous: Option<FileRecord>,
}

impl Change {
    pub fn new(
        side: Side,
        path: RelPath,
        kind: ChangeKind,
        current: Option<FileRecord>,
        previous: Option<FileRecord>,
    ) -> Self {
        Self {
            side,
            path,
            kind,
            current,
            previous,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn path(&self) -> &RelPath {
        &self.path
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn current(&self) -> Option<&FileRecord> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&FileRecord> {
        self.previous.as_ref()
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.side, self.kind, self.path)
    }
}
