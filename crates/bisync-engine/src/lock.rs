//! Run-scope mutual exclusion
//!
//! A run creates `<base>.lck` with `create_new`; a second run against the
//! same path pair fails immediately instead of waiting. The file holds the
//! owning process id and run id for diagnosis and is removed when the guard
//! drops, on every exit path.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use bisync_core::domain::RunId;

use crate::BisyncError;

/// Held for the duration of a run
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Takes the lock or fails with [`BisyncError::AlreadyRunning`]
    pub fn acquire(path: impl Into<PathBuf>, run_id: RunId) -> Result<Self, BisyncError> {
        let path = path.into();
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!(lock = %path.display(), "Lock already held");
                return Err(BisyncError::AlreadyRunning(path));
            }
            Err(e) => return Err(BisyncError::io(path, e)),
        };

        writeln!(file, "pid {}\nrun {}", std::process::id(), run_id)
            .map_err(|e| BisyncError::io(&path, e))?;
        debug!(lock = %path.display(), "Lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(lock = %self.path.display(), "Lock released"),
            Err(e) => warn!(lock = %self.path.display(), error = %e, "Failed to release lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_second_acquire_fails_fast() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pair.lck");

        let guard = RunLock::acquire(&path, RunId::new()).unwrap();
        assert!(path.exists());

        let second = RunLock::acquire(&path, RunId::new());
        assert!(matches!(second, Err(BisyncError::AlreadyRunning(_))));

        drop(guard);
        assert!(!path.exists());
        RunLock::acquire(&path, RunId::new()).unwrap();
    }

    #[test]
    fn test_released_on_early_return() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pair.lck");

        let attempt = || -> Result<(), BisyncError> {
            let _lock = RunLock::acquire(&path, RunId::new())?;
            Err(BisyncError::Cancelled)
        };
        assert!(attempt().is_err());
        assert!(!path.exists());
    }
}
