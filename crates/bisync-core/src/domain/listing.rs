//! Listing domain entities
//!
//! A [`PathListing`] is an immutable snapshot of one side's tree at one
//! instant. It is produced from backend output, persisted as that side's
//! history, and compared against the next snapshot of the same side.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ContentHash, RelPath};

/// One of the two synchronized trees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Path1,
    Path2,
}

impl Side {
    /// Both sides, in canonical order
    pub const BOTH: [Side; 2] = [Side::Path1, Side::Path2];

    /// Returns the opposite side
    pub fn other(self) -> Side {
        match self {
            Side::Path1 => Side::Path2,
            Side::Path2 => Side::Path1,
        }
    }

    /// Lowercase name used in file names and log fields
    pub fn name(self) -> &'static str {
        match self {
            Side::Path1 => "path1",
            Side::Path2 => "path2",
        }
    }

    /// Parses the lowercase name produced by [`Side::name`]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "path1" => Some(Side::Path1),
            "path2" => Some(Side::Path2),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Metadata of a single file as seen on one side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    path: RelPath,
    size: u64,
    modified: DateTime<Utc>,
    hash: Option<ContentHash>,
}

impl FileRecord {
    /// Creates a new FileRecord
    pub fn new(path: RelPath, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            path,
            size,
            modified,
            hash: None,
        }
    }

    /// Attaches a content hash
    pub fn with_hash(mut self, hash: ContentHash) -> Self {
        self.hash = Some(hash);
        self
    }

    pub fn path(&self) -> &RelPath {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn hash(&self) -> Option<&ContentHash> {
        self.hash.as_ref()
    }

    /// Returns true when both records carry hashes and the hashes differ
    pub fn hash_differs(&self, other: &FileRecord) -> bool {
        matches!((&self.hash, &other.hash), (Some(a), Some(b)) if a != b)
    }
}

/// Immutable snapshot of one side's tree
///
/// Records are keyed and ordered by relative path. Once built a listing is
/// never edited; derived listings (for example after filtering) are new
/// values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathListing {
    side: Side,
    timestamp: DateTime<Utc>,
    records: BTreeMap<RelPath, FileRecord>,
}

impl PathListing {
    /// Builds a listing, rejecting duplicate paths
    pub fn new(
        side: Side,
        timestamp: DateTime<Utc>,
        records: impl IntoIterator<Item = FileRecord>,
    ) -> Result<Self, DomainError> {
        let mut map = BTreeMap::new();
        for record in records {
            let path = record.path().clone();
            if map.insert(path.clone(), record).is_some() {
                return Err(DomainError::DuplicatePath {
                    side: side.to_string(),
                    path: path.to_string(),
                });
            }
        }
        Ok(Self {
            side,
            timestamp,
            records: map,
        })
    }

    /// An empty listing stamped with the current time
    pub fn empty(side: Side) -> Self {
        Self {
            side,
            timestamp: Utc::now(),
            records: BTreeMap::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, path: &RelPath) -> Option<&FileRecord> {
        self.records.get(path)
    }

    pub fn contains(&self, path: &RelPath) -> bool {
        self.records.contains_key(path)
    }

    /// Records in path order
    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    /// Paths in order
    pub fn paths(&self) -> impl Iterator<Item = &RelPath> {
        self.records.keys()
    }

    /// Returns a new listing holding only the records accepted by `keep`
    pub fn filtered<F>(&self, mut keep: F) -> PathListing
    where
        F: FnMut(&FileRecord) -> bool,
    {
        PathListing {
            side: self.side,
            timestamp: self.timestamp,
            records: self
                .records
                .iter()
                .filter(|(_, r)| keep(r))
                .map(|(p, r)| (p.clone(), r.clone()))
                .collect(),
        }
    }
}
