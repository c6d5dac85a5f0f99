//! Pre-mutation safety vetoes
//!
//! Three independent checks run before anything is propagated:
//!
//! - **max-delete**: per side, `deleted / prior * 100` must not exceed the
//!   configured percentage (bypassed by `force`)
//! - **check-access**: the access marker file must sit at the same relative
//!   locations on both sides
//! - **filters-changed**: the filter fingerprint must match the one stored
//!   by the last resync
//!
//! All checks are evaluated so the report lists every reason. A veto is an
//! expected refusal: nothing is mutated and history stays trusted.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::warn;

use bisync_core::config::SafetyConfig;
use bisync_core::domain::{Change, ExitStatus, PathListing, RelPath, Side};

/// One reason to refuse the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "check")]
pub enum Veto {
    MaxDelete {
        side: Side,
        deleted: usize,
        prior: usize,
        limit: u8,
    },
    CheckAccess {
        filename: String,
        missing_on: Vec<Side>,
        mismatched: Vec<RelPath>,
    },
    FiltersChanged,
}

impl Veto {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Veto::MaxDelete { .. } => ExitStatus::AbortedMaxDelete,
            Veto::CheckAccess { .. } => ExitStatus::AbortedCheckAccess,
            Veto::FiltersChanged => ExitStatus::AbortedFiltersChanged,
        }
    }

    /// Rank used to pick the reported status when several checks veto
    fn precedence(&self) -> u8 {
        match self {
            Veto::FiltersChanged => 0,
            Veto::CheckAccess { .. } => 1,
            Veto::MaxDelete { .. } => 2,
        }
    }
}

impl fmt::Display for Veto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Veto::MaxDelete {
                side,
                deleted,
                prior,
                limit,
            } => write!(
                f,
                "{deleted} of {prior} files deleted on {side}, more than the {limit}% limit"
            ),
            Veto::CheckAccess {
                filename,
                missing_on,
                mismatched,
            } => {
                if !missing_on.is_empty() {
                    let sides: Vec<&str> = missing_on.iter().map(|s| s.name()).collect();
                    write!(f, "access marker {filename} not found on {}", sides.join(" and "))
                } else {
                    write!(
                        f,
                        "access marker {filename} present on only one side at {} location(s)",
                        mismatched.len()
                    )
                }
            }
            Veto::FiltersChanged => {
                write!(f, "filters changed since the last resync")
            }
        }
    }
}

/// Result of the safety phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SafetyVerdict {
    vetoes: Vec<Veto>,
}

impl SafetyVerdict {
    pub fn passed(&self) -> bool {
        self.vetoes.is_empty()
    }

    pub fn vetoes(&self) -> &[Veto] {
        &self.vetoes
    }

    /// Status to report: filters changed, then check-access, then max-delete
    pub fn status(&self) -> ExitStatus {
        self.vetoes
            .iter()
            .min_by_key(|v| v.precedence())
            .map(Veto::exit_status)
            .unwrap_or(ExitStatus::Success)
    }

    pub fn message(&self) -> String {
        self.vetoes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Everything the gate inspects
#[derive(Debug, Clone, Copy)]
pub struct SafetyInput<'a> {
    pub prior1: &'a PathListing,
    pub prior2: &'a PathListing,
    pub current1: &'a PathListing,
    pub current2: &'a PathListing,
    pub changes1: &'a [Change],
    pub changes2: &'a [Change],
    pub filters_changed: bool,
}

/// Evaluates the three vetoes
#[derive(Debug, Clone)]
pub struct SafetyGate {
    max_delete: u8,
    force: bool,
    check_access: bool,
    check_filename: String,
}

impl SafetyGate {
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            max_delete: config.max_delete,
            force: config.force,
            check_access: config.check_access,
            check_filename: config.check_filename.clone(),
        }
    }

    /// Deletion-ratio check for one side
    pub fn check_max_delete(
        &self,
        side: Side,
        prior: &PathListing,
        changes: &[Change],
    ) -> Option<Veto> {
        if self.force || prior.is_empty() {
            return None;
        }
        let deleted = changes.iter().filter(|c| c.kind().is_deleted()).count();
        let percent = deleted as f64 / prior.len() as f64 * 100.0;
        (percent > f64::from(self.max_delete)).then(|| Veto::MaxDelete {
            side,
            deleted,
            prior: prior.len(),
            limit: self.max_delete,
        })
    }

    fn markers(&self, listing: &PathListing) -> BTreeSet<RelPath> {
        listing
            .paths()
            .filter(|p| p.file_name() == self.check_filename)
            .cloned()
            .collect()
    }

    /// Access-marker check over the filtered current listings
    pub fn check_access(&self, current1: &PathListing, current2: &PathListing) -> Option<Veto> {
        if !self.check_access {
            return None;
        }
        let m1 = self.markers(current1);
        let m2 = self.markers(current2);

        let missing_on: Vec<Side> = [(Side::Path1, &m1), (Side::Path2, &m2)]
            .into_iter()
            .filter(|(_, set)| set.is_empty())
            .map(|(side, _)| side)
            .collect();
        let mismatched: Vec<RelPath> = m1.symmetric_difference(&m2).cloned().collect();

        (!missing_on.is_empty() || !mismatched.is_empty()).then(|| Veto::CheckAccess {
            filename: self.check_filename.clone(),
            missing_on,
            mismatched,
        })
    }

    pub fn evaluate(&self, input: SafetyInput<'_>) -> SafetyVerdict {
        let mut vetoes = Vec::new();

        if input.filters_changed {
            vetoes.push(Veto::FiltersChanged);
        }
        if let Some(v) = self.check_access(input.current1, input.current2) {
            vetoes.push(v);
        }
        for (side, prior, changes) in [
            (Side::Path1, input.prior1, input.changes1),
            (Side::Path2, input.prior2, input.changes2),
        ] {
            if let Some(v) = self.check_max_delete(side, prior, changes) {
                vetoes.push(v);
            }
        }

        for veto in &vetoes {
            warn!(reason = %veto, status = %veto.exit_status(), "Safety check vetoed the run");
        }
        SafetyVerdict { vetoes }
    }
}
