//! Tree backend port (driven/secondary port)
//!
//! This module defines the interface the engine uses to observe and mutate
//! one side of the sync. A run holds one backend per side.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are adapter-specific
//!   and don't need domain-level classification.
//! - Uses `#[async_trait]` for async trait methods.
//! - Retry and backoff belong to the adapter; the engine calls each method
//!   once and treats a failure as final.
//! - Cross-side copies are composed by the engine from `read_file` on one
//!   backend and `write_file` on the other.

use chrono::{DateTime, Utc};

use crate::domain::listing::FileRecord;
use crate::domain::newtypes::RelPath;

/// Listing and transfer primitives for one side's tree
#[async_trait::async_trait]
pub trait ITreeBackend: Send + Sync {
    /// Human-readable location of the tree root, used in logs and for
    /// deriving history file names
    fn location(&self) -> String;

    /// Lists every regular file under the root
    ///
    /// Paths are relative to the root. Order is not significant.
    async fn list(&self) -> anyhow::Result<Vec<FileRecord>>;

    /// Reads the full content of a file
    async fn read_file(&self, path: &RelPath) -> anyhow::Result<Vec<u8>>;

    /// Writes a file, creating parent directories, and sets its
    /// modification time to `modified`
    ///
    /// Returns the record of the file as written.
    async fn write_file(
        &self,
        path: &RelPath,
        data: &[u8],
        modified: DateTime<Utc>,
    ) -> anyhow::Result<FileRecord>;

    /// Deletes a file
    async fn delete_file(&self, path: &RelPath) -> anyhow::Result<()>;

    /// Renames a file within this tree
    async fn rename(&self, from: &RelPath, to: &RelPath) -> anyhow::Result<()>;

    /// Removes directories left empty, returning how many were removed
    async fn remove_empty_dirs(&self) -> anyhow::Result<usize>;
}
