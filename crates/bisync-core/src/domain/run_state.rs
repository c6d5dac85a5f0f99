//! Run state machine
//!
//! ```text
//!  Idle ──► Listing ──► Comparing ──► SafetyCheck ──► Propagating ──► Verifying ──► Committed
//!   ▲          │            │              │               │              │
//!   │          │            │  veto /      │               │              │ check-sync only
//!   ├──────────┴────────────┴──dry-run─────┘               │              │
//!   └──────────────────────────────────────────────────────┼──────────────┘
//!              │                                           │
//!              └────────────────► LockedOut ◄──────────────┘
//! ```
//!
//! `Committed` and `LockedOut` are terminal for a run.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Phase of a single run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Listing,
    Comparing,
    SafetyCheck,
    Propagating,
    Verifying,
    Committed,
    LockedOut,
}

impl RunState {
    pub fn name(self) -> &'static str {
        match self {
            RunState::Idle => "Idle",
            RunState::Listing => "Listing",
            RunState::Comparing => "Comparing",
            RunState::SafetyCheck => "SafetyCheck",
            RunState::Propagating => "Propagating",
            RunState::Verifying => "Verifying",
            RunState::Committed => "Committed",
            RunState::LockedOut => "LockedOut",
        }
    }

    /// Returns true once the run can no longer change state
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Committed | RunState::LockedOut)
    }

    /// Returns true if trees may have been mutated in this state
    pub fn has_mutated(self) -> bool {
        matches!(
            self,
            RunState::Propagating | RunState::Verifying | RunState::Committed
        )
    }

    pub fn can_transition_to(self, target: RunState) -> bool {
        use RunState::*;

        match (self, target) {
            (Idle, Listing) => true,

            (Listing, Comparing) => true,
            (Listing, Verifying) => true,
            (Listing, Idle) => true,
            (Listing, LockedOut) => true,

            (Comparing, SafetyCheck) => true,
            (Comparing, Idle) => true,

            (SafetyCheck, Propagating) => true,
            (SafetyCheck, Idle) => true,

            (Propagating, Verifying) => true,
            (Propagating, LockedOut) => true,

            (Verifying, Committed) => true,
            (Verifying, Idle) => true,
            (Verifying, LockedOut) => true,

            _ => false,
        }
    }

    /// Validated transition
    pub fn transition(self, target: RunState) -> Result<RunState, DomainError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(DomainError::InvalidState {
                from: self.name().to_string(),
                to: target.name().to_string(),
            })
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
