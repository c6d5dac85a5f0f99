//! Domain entities and business logic
//!
//! This module contains the core domain types for bisync:
//! - Newtypes for validated paths, hashes and identifiers
//! - Listings (per-side snapshots) and their file records
//! - Per-side changes and the cross-side action plan
//! - The run state machine and run outcomes
//! - Domain-specific error types

pub mod action;
pub mod change;
pub mod errors;
pub mod listing;
pub mod newtypes;
pub mod outcome;
pub mod run_state;

// Re-export commonly used types
pub use action::{Action, ActionKind, ActionPlan, Conflict, ConflictKind, PlanSummary};
pub use change::{Change, ChangeKind};
pub use errors::DomainError;
pub use listing::{FileRecord, PathListing, Side};
pub use newtypes::*;
pub use outcome::{ExitStatus, HistoryTrust, LockoutRecord};
pub use run_state::RunState;
