//! Error types for the conflict engine

use thiserror::Error;

use bisync_core::domain::DomainError;

/// Errors that can occur while merging the two change sets
#[derive(Debug, Error)]
pub enum ConflictError {
    /// Every candidate name for a preserved version is already taken
    #[error("no free conflict name for {path} ({side})")]
    NamesExhausted { path: String, side: String },

    /// A change set carried two entries for one path
    #[error("duplicate {side} change for {path}")]
    DuplicateChange { path: String, side: String },

    /// A change set was handed to the wrong side of the merge
    #[error("change for {path} belongs to {actual}, expected {expected}")]
    WrongSide {
        path: String,
        expected: String,
        actual: String,
    },

    /// A content change arrived without the record it describes
    #[error("{side} change for {path} carries no current record")]
    MissingRecord { path: String, side: String },

    /// A derived name failed path validation
    #[error("invalid conflict name: {0}")]
    InvalidName(#[from] DomainError),
}
