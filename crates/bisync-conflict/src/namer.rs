//! Conflict naming for keep-both resolution
//!
//! Generates side-tagged names for preserved conflict versions, following
//! the pattern `<path><separator><suffix>`, e.g. `notes.txt..path1`.

use bisync_core::config::ConflictsConfig;
use bisync_core::domain::{RelPath, Side};

use crate::error::ConflictError;

/// Highest counter tried before giving up on a free name
const MAX_COUNTER: u32 = 99;

/// Generates side-tagged conflict names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictNamer {
    separator: String,
    path1_suffix: String,
    path2_suffix: String,
}

impl ConflictNamer {
    pub fn new(
        separator: impl Into<String>,
        path1_suffix: impl Into<String>,
        path2_suffix: impl Into<String>,
    ) -> Self {
        Self {
            separator: separator.into(),
            path1_suffix: path1_suffix.into(),
            path2_suffix: path2_suffix.into(),
        }
    }

    pub fn from_config(config: &ConflictsConfig) -> Self {
        Self::new(
            config.separator.as_str(),
            config.path1_suffix.as_str(),
            config.path2_suffix.as_str(),
        )
    }

    fn suffix(&self, side: Side) -> &str {
        match side {
            Side::Path1 => &self.path1_suffix,
            Side::Path2 => &self.path2_suffix,
        }
    }

    /// The plain side-tagged name for `path`
    ///
    /// Given "docs/report.txt" and `Side::Path1`, produces
    /// "docs/report.txt..path1" with the default settings.
    pub fn generate(&self, path: &RelPath, side: Side) -> Result<RelPath, ConflictError> {
        Ok(path.with_suffix(&format!("{}{}", self.separator, self.suffix(side)))?)
    }

    /// Like [`generate`](Self::generate), but appends an incrementing
    /// counter while `exists` reports the candidate as taken
    pub fn generate_unique<F>(
        &self,
        path: &RelPath,
        side: Side,
        mut exists: F,
    ) -> Result<RelPath, ConflictError>
    where
        F: FnMut(&RelPath) -> bool,
    {
        let candidate = self.generate(path, side)?;
        if !exists(&candidate) {
            return Ok(candidate);
        }

        for i in 2..=MAX_COUNTER {
            let numbered = candidate.with_suffix(&format!(" {i}"))?;
            if !exists(&numbered) {
                return Ok(numbered);
            }
        }

        Err(ConflictError::NamesExhausted {
            path: path.to_string(),
            side: side.to_string(),
        })
    }
}

impl Default for ConflictNamer {
    fn default() -> Self {
        Self::from_config(&ConflictsConfig::default())
    }
}
