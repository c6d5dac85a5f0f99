//! Include/exclude filtering and the filter fingerprint
//!
//! A filter file holds one rule per line:
//!
//! ```text
//! # comment
//! - *.tmp
//! - /build/**
//! + docs/**
//! ```
//!
//! `+` includes, `-` excludes, first matching rule wins, unmatched paths are
//! included. A pattern without `/` matches the file name at any depth; a
//! pattern with `/` matches the whole relative path (a leading `/` is
//! dropped). `*` does not cross directories, `**` does.
//!
//! The fingerprint is the hex SHA-256 of the filter file bytes. It is stored
//! next to the filter file as `<filters_file>.sha256` after every resync, and
//! a normal run refuses to proceed when the two disagree.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use bisync_core::domain::{Fingerprint, PathListing, RelPath};

use crate::BisyncError;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Extension appended to the filter file path for the fingerprint sidecar
pub const SIDECAR_EXTENSION: &str = "sha256";

#[derive(Debug, Clone)]
enum Rule {
    Include(Pattern),
    Exclude(Pattern),
}

impl Rule {
    fn pattern(&self) -> &Pattern {
        match self {
            Rule::Include(p) | Rule::Exclude(p) => p,
        }
    }

    fn matches(&self, path: &RelPath) -> bool {
        let pattern = self.pattern();
        if pattern.as_str().contains('/') {
            pattern.matches_with(path.as_str(), MATCH_OPTIONS)
        } else {
            pattern.matches_with(path.file_name(), MATCH_OPTIONS)
        }
    }
}

/// Compiled filter rules plus the fingerprint of their source
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    rules: Vec<Rule>,
    source: Option<PathBuf>,
    fingerprint: Option<Fingerprint>,
}

impl FilterSet {
    /// A filter set that includes everything and has no source file
    pub fn none() -> Self {
        Self::default()
    }

    /// Parses filter text; `source` is used for error messages and the sidecar
    pub fn parse(bytes: &[u8], source: Option<PathBuf>) -> Result<Self, BisyncError> {
        let label = source.clone().unwrap_or_else(|| PathBuf::from("<filters>"));
        let text = std::str::from_utf8(bytes).map_err(|e| BisyncError::InvalidFilter {
            path: label.clone(),
            line: 0,
            reason: format!("not UTF-8: {e}"),
        })?;

        let mut rules = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let invalid = |reason: String| BisyncError::InvalidFilter {
                path: label.clone(),
                line: idx + 1,
                reason,
            };

            let (include, rest) = if let Some(rest) = line.strip_prefix('+') {
                (true, rest)
            } else if let Some(rest) = line.strip_prefix('-') {
                (false, rest)
            } else {
                return Err(invalid(format!("expected '+' or '-', got {line:?}")));
            };
            let glob = rest.trim().trim_start_matches('/');
            if glob.is_empty() {
                return Err(invalid("empty pattern".to_string()));
            }
            let pattern = Pattern::new(glob).map_err(|e| invalid(e.to_string()))?;
            rules.push(if include {
                Rule::Include(pattern)
            } else {
                Rule::Exclude(pattern)
            });
        }

        Ok(Self {
            rules,
            source,
            fingerprint: Some(fingerprint(bytes)?),
        })
    }

    /// Reads and parses a filter file
    pub async fn load(path: &Path) -> Result<Self, BisyncError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| BisyncError::io(path, e))?;
        let set = Self::parse(&bytes, Some(path.to_path_buf()))?;
        debug!(path = %path.display(), rules = set.rules.len(), "Filters loaded");
        Ok(set)
    }

    /// Loads the configured filter file, or an empty set when none is configured
    pub async fn from_config(path: Option<&Path>) -> Result<Self, BisyncError> {
        match path {
            Some(p) => Self::load(p).await,
            None => Ok(Self::none()),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    /// Whether a path survives the filters
    pub fn includes(&self, path: &RelPath) -> bool {
        for rule in &self.rules {
            if rule.matches(path) {
                return matches!(rule, Rule::Include(_));
            }
        }
        true
    }

    /// Returns a new listing holding only included paths
    pub fn apply(&self, listing: &PathListing) -> PathListing {
        if self.rules.is_empty() {
            return listing.clone();
        }
        listing.filtered(|record| self.includes(record.path()))
    }

    /// Location of the fingerprint sidecar, if a filter file is in use
    pub fn sidecar_path(&self) -> Option<PathBuf> {
        self.source.as_ref().map(|src| {
            let mut p = src.as_os_str().to_owned();
            p.push(".");
            p.push(SIDECAR_EXTENSION);
            PathBuf::from(p)
        })
    }

    /// Reads the fingerprint recorded by the last resync
    pub async fn stored_fingerprint(&self) -> Result<Option<Fingerprint>, BisyncError> {
        let Some(sidecar) = self.sidecar_path() else {
            return Ok(None);
        };
        match tokio::fs::read_to_string(&sidecar).await {
            Ok(text) => Ok(Some(Fingerprint::new(text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BisyncError::io(sidecar, e)),
        }
    }

    /// Records the active fingerprint in the sidecar
    pub async fn store_fingerprint(&self) -> Result<(), BisyncError> {
        let (Some(sidecar), Some(fp)) = (self.sidecar_path(), self.fingerprint.as_ref()) else {
            return Ok(());
        };
        tokio::fs::write(&sidecar, format!("{}\n", fp.as_str()))
            .await
            .map_err(|e| BisyncError::io(&sidecar, e))?;
        info!(sidecar = %sidecar.display(), "Filter fingerprint stored");
        Ok(())
    }

    /// Whether the active filters differ from the stored fingerprint
    ///
    /// No filter file means nothing to compare. A filter file without a
    /// sidecar counts as changed.
    pub async fn changed_since_last_resync(&self) -> Result<bool, BisyncError> {
        let Some(active) = self.fingerprint.as_ref() else {
            return Ok(false);
        };
        Ok(match self.stored_fingerprint().await? {
            Some(stored) => &stored != active,
            None => true,
        })
    }
}

/// Hex SHA-256 of filter file content
pub fn fingerprint(bytes: &[u8]) -> Result<Fingerprint, BisyncError> {
    let digest = Sha256::digest(bytes);
    Ok(Fingerprint::new(format!("{digest:x}"))?)
}
