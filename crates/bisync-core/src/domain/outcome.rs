//! Run outcomes and history trust
//!
//! [`ExitStatus`] is what a run surfaces to its caller. [`HistoryTrust`] is
//! the typed view of whether the persisted listings may be used as a
//! baseline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::RunId;

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    /// Deletions on one side exceeded the configured percentage
    AbortedMaxDelete,
    /// The access marker file was not found at matching places on both sides
    AbortedCheckAccess,
    /// The filter definition changed since the last run
    AbortedFiltersChanged,
    /// History is poisoned; only a resync can clear it
    CriticalLockout,
    /// A current listing came back empty while its history was not
    EmptyListing,
    /// No prior listings exist
    MissingHistory,
    /// The two sides do not hold the same set of paths after the run
    IntegrityMismatch,
}

impl ExitStatus {
    pub fn is_success(self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn is_critical(self) -> bool {
        matches!(self, ExitStatus::CriticalLockout)
    }

    /// Process exit code: 0 success, 1 recoverable refusal, 2 critical
    pub fn exit_code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::CriticalLockout => 2,
            _ => 1,
        }
    }

    /// What the user must do next
    pub fn recovery_hint(self) -> Option<&'static str> {
        match self {
            ExitStatus::Success => None,
            ExitStatus::AbortedMaxDelete => {
                Some("review the deletions, then re-run with --force or a higher --max-delete")
            }
            ExitStatus::AbortedCheckAccess => {
                Some("make sure both paths are reachable and contain matching check files")
            }
            ExitStatus::AbortedFiltersChanged => {
                Some("filters changed: run with --resync to rebuild the listings")
            }
            ExitStatus::CriticalLockout => {
                Some("history cannot be trusted: inspect both paths, then run with --resync")
            }
            ExitStatus::EmptyListing => {
                Some("a path listed as empty: check it is mounted, or run with --resync if intended")
            }
            ExitStatus::MissingHistory => Some("no prior listings: run with --resync first"),
            ExitStatus::IntegrityMismatch => {
                Some("paths differ between the sides: a --resync is advisable")
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExitStatus::Success => "success",
            ExitStatus::AbortedMaxDelete => "aborted_max_delete",
            ExitStatus::AbortedCheckAccess => "aborted_check_access",
            ExitStatus::AbortedFiltersChanged => "aborted_filters_changed",
            ExitStatus::CriticalLockout => "critical_lockout",
            ExitStatus::EmptyListing => "empty_listing",
            ExitStatus::MissingHistory => "missing_history",
            ExitStatus::IntegrityMismatch => "integrity_mismatch",
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why and when history was poisoned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutRecord {
    pub reason: String,
    pub run_id: RunId,
    pub at: DateTime<Utc>,
}

impl LockoutRecord {
    pub fn new(reason: impl Into<String>, run_id: RunId) -> Self {
        Self {
            reason: reason.into(),
            run_id,
            at: Utc::now(),
        }
    }
}

/// Whether persisted listings may be used as the comparison baseline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum HistoryTrust {
    /// Both listings present and not poisoned
    Trusted,
    /// No listings (first run, or removed by hand)
    Missing,
    /// A critical failure poisoned the listings
    Poisoned { record: Option<LockoutRecord> },
}

impl HistoryTrust {
    pub fn is_trusted(&self) -> bool {
        matches!(self, HistoryTrust::Trusted)
    }

    pub fn is_poisoned(&self) -> bool {
        matches!(self, HistoryTrust::Poisoned { .. })
    }
}
