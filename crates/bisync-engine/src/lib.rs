//! Bisync Engine - Bidirectional tree synchronization
//!
//! Provides:
//! - Per-side delta classification against persisted history
//! - Safety vetoes (max-delete, access marker, filter fingerprint)
//! - Bounded-concurrency propagation with sticky lockout on failure
//! - Post-propagation integrity verification
//!
//! ## Modules
//!
//! - [`coordinator`] - Run state machine tying every phase together
//! - [`delta`] - Listing-vs-listing change classification
//! - [`filter`] - Include/exclude rules and their fingerprint sidecar
//! - [`safety`] - The three pre-mutation vetoes
//! - [`history`] - Listing files in the working directory
//! - [`lockout`] - Poisoned-history detection and recovery
//! - [`lock`] - Run-scope mutual exclusion
//! - [`propagator`] - Dispatch of the action plan to the backends
//! - [`verifier`] - Path-set comparison of the two sides
//! - [`filesystem`] - Local directory tree adapter

pub mod coordinator;
pub mod delta;
pub mod filesystem;
pub mod filter;
pub mod history;
pub mod lock;
pub mod lockout;
pub mod propagator;
pub mod safety;
pub mod verifier;

use std::path::PathBuf;

use thiserror::Error;

use bisync_conflict::ConflictError;
use bisync_core::domain::{DomainError, Side};

pub use coordinator::{RunCoordinator, RunReport};
pub use filesystem::LocalTreeAdapter;

/// Errors that can occur during a bisync run
#[derive(Debug, Error)]
pub enum BisyncError {
    /// Another run holds the lock for this path pair
    #[error("another run is in progress (lock file {0})")]
    AlreadyRunning(PathBuf),

    /// An I/O error on engine-owned files (working directory, filters)
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A backend call failed; the state of the affected item is unknown
    #[error("{side} backend failed to {operation}: {source:#}")]
    Backend {
        side: Side,
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// A persisted listing could not be parsed
    #[error("corrupt listing {path} at line {line}: {reason}")]
    CorruptListing {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A side listed empty while its history was not
    #[error("{0} listed no files but its previous listing was not empty")]
    EmptyListing(Side),

    /// A filter definition could not be parsed
    #[error("invalid filter at {path}:{line}: {reason}")]
    InvalidFilter {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// The configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The run was cancelled before anything was mutated
    #[error("run cancelled before propagation")]
    Cancelled,

    /// A domain rule was violated
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    /// Merging the change sets failed
    #[error("conflict resolution failed: {0}")]
    Conflict(#[from] ConflictError),
}

impl BisyncError {
    /// Wraps an I/O error with the path it concerns
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wraps a backend failure
    pub fn backend(side: Side, operation: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Backend {
            side,
            operation: operation.into(),
            source,
        }
    }

    /// Whether this error leaves history untrustworthy and must force lockout
    ///
    /// Only meaningful once the lockout check has passed: backend failures
    /// and unreadable history are critical. Everything else is either an
    /// expected refusal or an infrastructure problem that never touched the
    /// trees.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::CorruptListing { .. })
    }
}
