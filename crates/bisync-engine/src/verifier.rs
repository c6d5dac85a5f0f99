//! Path-set comparison of the two sides
//!
//! Only presence is compared. Transports may legitimately change size or
//! modification time, so content equality is not asserted.

use serde::Serialize;
use tracing::{info, warn};

use bisync_core::domain::{PathListing, RelPath};

/// Outcome of comparing the two sides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub only_on_path1: Vec<RelPath>,
    pub only_on_path2: Vec<RelPath>,
}

impl VerificationReport {
    pub fn matched(&self) -> bool {
        self.only_on_path1.is_empty() && self.only_on_path2.is_empty()
    }

    pub fn message(&self) -> String {
        if self.matched() {
            return "path sets match".to_string();
        }
        let sample = self
            .only_on_path1
            .iter()
            .chain(&self.only_on_path2)
            .take(3)
            .map(RelPath::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{} path(s) only on path1, {} only on path2 (e.g. {sample})",
            self.only_on_path1.len(),
            self.only_on_path2.len()
        )
    }
}

/// Checks that both sides hold the same set of relative paths
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    pub fn verify(&self, path1: &PathListing, path2: &PathListing) -> VerificationReport {
        let report = VerificationReport {
            only_on_path1: path1
                .paths()
                .filter(|p| !path2.contains(p))
                .cloned()
                .collect(),
            only_on_path2: path2
                .paths()
                .filter(|p| !path1.contains(p))
                .cloned()
                .collect(),
        };

        if report.matched() {
            info!(files = path1.len(), "Integrity check passed");
        } else {
            warn!(
                only_on_path1 = report.only_on_path1.len(),
                only_on_path2 = report.only_on_path2.len(),
                "Integrity check found differing path sets; a resync is advised"
            );
        }
        report
    }
}
