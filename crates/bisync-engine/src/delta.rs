//! Per-side change classification
//!
//! Joins a side's previous and current listings on relative path and emits
//! one [`Change`] per path, in path order. `Unchanged` entries are emitted
//! too: the resolver needs the current record of the untouched side to
//! decide whether a deletion has anything left to delete.

use chrono::Duration;
use tracing::{debug, warn};

use bisync_core::domain::{Change, ChangeKind, DomainError, FileRecord, PathListing};

use crate::BisyncError;

/// Classifies one side's changes between two listings
#[derive(Debug, Clone, Copy)]
pub struct DeltaClassifier {
    tolerance: Duration,
}

impl DeltaClassifier {
    pub fn new(tolerance: std::time::Duration) -> Self {
        Self {
            tolerance: Duration::from_std(tolerance).unwrap_or_else(|_| Duration::zero()),
        }
    }

    /// Classifies a record present in both listings
    fn compare(&self, previous: &FileRecord, current: &FileRecord) -> ChangeKind {
        let drift = current.modified() - previous.modified();
        if drift > self.tolerance {
            ChangeKind::Newer
        } else if drift < -self.tolerance {
            ChangeKind::Older
        } else if current.size() != previous.size() || current.hash_differs(previous) {
            // Content wins over an ambiguous clock
            ChangeKind::Newer
        } else {
            ChangeKind::Unchanged
        }
    }

    /// Produces the ordered change set for one side
    ///
    /// Fails with [`BisyncError::EmptyListing`] when `current` is empty but
    /// `previous` is not; an empty listing is far more likely to be a failed
    /// list call than a tree whose every file was deleted.
    pub fn classify(
        &self,
        previous: &PathListing,
        current: &PathListing,
    ) -> Result<Vec<Change>, BisyncError> {
        let side = current.side();
        if previous.side() != side {
            return Err(DomainError::ValidationFailed(format!(
                "cannot compare a {} listing against {} history",
                side,
                previous.side()
            ))
            .into());
        }

        if current.is_empty() && !previous.is_empty() {
            warn!(side = %side, previous = previous.len(), "Current listing is empty");
            return Err(BisyncError::EmptyListing(side));
        }

        let mut changes = Vec::with_capacity(current.len().max(previous.len()));
        let mut prev_iter = previous.records().peekable();
        let mut cur_iter = current.records().peekable();

        // Both iterators are path-ordered; walk them as a sorted merge.
        loop {
            let change = match (prev_iter.peek(), cur_iter.peek()) {
                (None, None) => break,
                (Some(p), None) => {
                    let p = (*p).clone();
                    prev_iter.next();
                    Change::new(side, p.path().clone(), ChangeKind::Deleted, None, Some(p))
                }
                (None, Some(c)) => {
                    let c = (*c).clone();
                    cur_iter.next();
                    Change::new(side, c.path().clone(), ChangeKind::New, Some(c), None)
                }
                (Some(p), Some(c)) => match p.path().cmp(c.path()) {
                    std::cmp::Ordering::Less => {
                        let p = (*p).clone();
                        prev_iter.next();
                        Change::new(side, p.path().clone(), ChangeKind::Deleted, None, Some(p))
                    }
                    std::cmp::Ordering::Greater => {
                        let c = (*c).clone();
                        cur_iter.next();
                        Change::new(side, c.path().clone(), ChangeKind::New, Some(c), None)
                    }
                    std::cmp::Ordering::Equal => {
                        let kind = self.compare(p, c);
                        let (p, c) = ((*p).clone(), (*c).clone());
                        prev_iter.next();
                        cur_iter.next();
                        Change::new(side, c.path().clone(), kind, Some(c), Some(p))
                    }
                },
            };
            changes.push(change);
        }

        debug!(
            side = %side,
            changed = changes.iter().filter(|c| c.kind() != ChangeKind::Unchanged).count(),
            total = changes.len(),
            "Delta classified"
        );
        Ok(changes)
    }
}

impl Default for DeltaClassifier {
    fn default() -> Self {
        Self::new(std::time::Duration::from_millis(
            bisync_core::config::DEFAULT_MODTIME_TOLERANCE_MS,
        ))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use bisync_core::domain::{ContentHash, RelPath, Side};

    use super::*;

    fn rec(p: &str, size: u64, millis: i64) -> FileRecord {
        FileRecord::new(
            RelPath::new(p).unwrap(),
            size,
            Utc.timestamp_millis_opt(1_700_000_000_000 + millis).unwrap(),
        )
    }

    fn listing(records: Vec<FileRecord>) -> PathListing {
        PathListing::new(Side::Path1, Utc::now(), records).unwrap()
    }

    fn kind_of(changes: &[Change], p: &str) -> ChangeKind {
        changes
            .iter()
            .find(|c| c.path().as_str() == p)
            .map(|c| c.kind())
            .unwrap()
    }

    #[test]
    fn test_new_and_deleted() {
        let prev = listing(vec![rec("gone", 1, 0), rec("kept", 1, 0)]);
        let cur = listing(vec![rec("kept", 1, 0), rec("fresh", 1, 0)]);
        let changes = DeltaClassifier::default().classify(&prev, &cur).unwrap();

        assert_eq!(changes.len(), 3);
        assert_eq!(kind_of(&changes, "gone"), ChangeKind::Deleted);
        assert_eq!(kind_of(&changes, "fresh"), ChangeKind::New);
        assert_eq!(kind_of(&changes, "kept"), ChangeKind::Unchanged);
    }

    #[test]
    fn test_changes_are_path_ordered() {
        let prev = listing(vec![rec("b", 1, 0), rec("d", 1, 0)]);
        let cur = listing(vec![rec("a", 1, 0), rec("c", 1, 0), rec("d", 1, 0)]);
        let changes = DeltaClassifier::default().classify(&prev, &cur).unwrap();
        let paths: Vec<&str> = changes.iter().map(|c| c.path().as_str()).collect();
        assert_eq!(paths, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_newer_and_older_beyond_tolerance() {
        let prev = listing(vec![rec("up", 1, 0), rec("down", 1, 0)]);
        let cur = listing(vec![rec("up", 1, 5_000), rec("down", 1, -5_000)]);
        let changes = DeltaClassifier::default().classify(&prev, &cur).unwrap();
        assert_eq!(kind_of(&changes, "up"), ChangeKind::Newer);
        assert_eq!(kind_of(&changes, "down"), ChangeKind::Older);
    }

    #[test]
    fn test_skew_within_tolerance_is_unchanged() {
        let prev = listing(vec![rec("a", 1, 0)]);
        let cur = listing(vec![rec("a", 1, 900)]);
        let changes = DeltaClassifier::default().classify(&prev, &cur).unwrap();
        assert_eq!(kind_of(&changes, "a"), ChangeKind::Unchanged);
    }

    #[test]
    fn test_zero_tolerance_detects_small_skew() {
        let classifier = DeltaClassifier::new(std::time::Duration::ZERO);
        let prev = listing(vec![rec("a", 1, 0)]);
        let cur = listing(vec![rec("a", 1, 1)]);
        let changes = classifier.classify(&prev, &cur).unwrap();
        assert_eq!(kind_of(&changes, "a"), ChangeKind::Newer);
    }

    #[test]
    fn test_size_change_with_same_time_is_newer() {
        let prev = listing(vec![rec("a", 1, 0)]);
        let cur = listing(vec![rec("a", 2, 0)]);
        let changes = DeltaClassifier::default().classify(&prev, &cur).unwrap();
        assert_eq!(kind_of(&changes, "a"), ChangeKind::Newer);
    }

    #[test]
    fn test_hash_change_with_same_time_is_newer() {
        let prev = listing(vec![rec("a", 1, 0).with_hash(ContentHash::new("aa").unwrap())]);
        let cur = listing(vec![rec("a", 1, 0).with_hash(ContentHash::new("bb").unwrap())]);
        let changes = DeltaClassifier::default().classify(&prev, &cur).unwrap();
        assert_eq!(kind_of(&changes, "a"), ChangeKind::Newer);
    }

    #[test]
    fn test_empty_current_with_history_fails() {
        let prev = listing(vec![rec("a", 1, 0)]);
        let cur = listing(vec![]);
        let result = DeltaClassifier::default().classify(&prev, &cur);
        assert!(matches!(result, Err(BisyncError::EmptyListing(Side::Path1))));
    }

    #[test]
    fn test_both_empty_is_fine() {
        let changes = DeltaClassifier::default()
            .classify(&listing(vec![]), &listing(vec![]))
            .unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_side_mismatch_rejected() {
        let prev = PathListing::empty(Side::Path2);
        let cur = listing(vec![rec("a", 1, 0)]);
        assert!(DeltaClassifier::default().classify(&prev, &cur).is_err());
    }
}
