//! Listing persistence in the working directory
//!
//! Every path pair owns a set of files named after a base derived from the
//! two tree locations:
//!
//! | File                      | Contents                                   |
//! |---------------------------|--------------------------------------------|
//! | `<base>.path1.lst`        | trusted history for Path1                  |
//! | `<base>.path2.lst`        | trusted history for Path2                  |
//! | `<base>.path1.lst-err`    | poisoned history (after a critical failure)|
//! | `<base>.path1.lst-new`    | snapshot taken during the current run      |
//! | `<base>.lockout.json`     | why and when history was poisoned          |
//! | `<base>.lck`              | run lock                                   |
//!
//! ## Listing format
//!
//! ```text
//! # bisync listing v1
//! # side: path1
//! # timestamp: 2024-05-01T10:00:00.000000000Z
//! 1024 - 2024-04-30T08:12:45.123456789Z "docs/report.txt"
//! 17 9f86d08...0f00a08 2024-04-30T08:12:45Z "a \"quoted\" name"
//! ```
//!
//! One record per line, sorted by path: size, content hash (or `-`),
//! modification time (RFC 3339, nanoseconds), quoted and escaped path.
//! Files are replaced atomically and never edited in place.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, instrument};

use bisync_core::domain::{ContentHash, FileRecord, PathListing, RelPath, Side};

use crate::BisyncError;

const HEADER: &str = "# bisync listing v1";
const SIDE_PREFIX: &str = "# side: ";
const TIMESTAMP_PREFIX: &str = "# timestamp: ";

/// Which copy of a side's listing to address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingKind {
    /// Trusted history
    History,
    /// History renamed aside by a lockout
    Poisoned,
    /// In-run snapshot
    Working,
}

impl ListingKind {
    fn extension(self) -> &'static str {
        match self {
            ListingKind::History => "lst",
            ListingKind::Poisoned => "lst-err",
            ListingKind::Working => "lst-new",
        }
    }
}

/// Reads and writes the listing files of one path pair
#[derive(Debug, Clone)]
pub struct ListingStore {
    workdir: PathBuf,
    base: String,
}

impl ListingStore {
    pub fn new(workdir: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
            base: base.into(),
        }
    }

    /// Store for the pair of tree locations `path1` and `path2`
    pub fn for_locations(workdir: impl Into<PathBuf>, path1: &str, path2: &str) -> Self {
        Self::new(workdir, base_name(path1, path2))
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn listing_path(&self, side: Side, kind: ListingKind) -> PathBuf {
        self.workdir
            .join(format!("{}.{}.{}", self.base, side.name(), kind.extension()))
    }

    pub fn lockout_path(&self) -> PathBuf {
        self.workdir.join(format!("{}.lockout.json", self.base))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.workdir.join(format!("{}.lck", self.base))
    }

    /// Creates the working directory if needed
    pub async fn ensure_workdir(&self) -> Result<(), BisyncError> {
        tokio::fs::create_dir_all(&self.workdir)
            .await
            .map_err(|e| BisyncError::io(&self.workdir, e))
    }

    pub async fn exists(&self, side: Side, kind: ListingKind) -> Result<bool, BisyncError> {
        let path = self.listing_path(side, kind);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| BisyncError::io(path, e))
    }

    /// Loads a listing, or `None` if the file does not exist
    #[instrument(skip(self), fields(base = %self.base))]
    pub async fn load(
        &self,
        side: Side,
        kind: ListingKind,
    ) -> Result<Option<PathListing>, BisyncError> {
        let path = self.listing_path(side, kind);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BisyncError::io(path, e)),
        };
        let listing = decode(&text, &path)?;
        if listing.side() != side {
            return Err(BisyncError::CorruptListing {
                path,
                line: 2,
                reason: format!("expected side {side}, found {}", listing.side()),
            });
        }
        debug!(side = %side, records = listing.len(), "Listing loaded");
        Ok(Some(listing))
    }

    /// Writes a listing atomically (temp file + rename)
    #[instrument(skip(self, listing), fields(base = %self.base, side = %listing.side()))]
    pub async fn save(&self, listing: &PathListing, kind: ListingKind) -> Result<(), BisyncError> {
        let path = self.listing_path(listing.side(), kind);
        let tmp = path.with_extension(format!("{}.tmp", kind.extension()));

        tokio::fs::write(&tmp, encode(listing))
            .await
            .map_err(|e| BisyncError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| BisyncError::io(&path, e))?;

        debug!(records = listing.len(), path = %path.display(), "Listing saved");
        Ok(())
    }

    /// Moves a side's listing from one kind to another, if it exists
    pub async fn relabel(
        &self,
        side: Side,
        from: ListingKind,
        to: ListingKind,
    ) -> Result<bool, BisyncError> {
        let source = self.listing_path(side, from);
        let target = self.listing_path(side, to);
        match tokio::fs::rename(&source, &target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BisyncError::io(source, e)),
        }
    }

    /// Removes a side's listing of the given kind, if present
    pub async fn remove(&self, side: Side, kind: ListingKind) -> Result<(), BisyncError> {
        let path = self.listing_path(side, kind);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BisyncError::io(path, e)),
        }
    }

    /// Removes both sides' in-run snapshots
    pub async fn remove_working(&self) -> Result<(), BisyncError> {
        for side in Side::BOTH {
            self.remove(side, ListingKind::Working).await?;
        }
        Ok(())
    }
}

/// File-name-safe base for a pair of tree locations
///
/// Path separators and `:` become `_`, leading separators are dropped, and
/// the two halves are joined with `..`.
pub fn base_name(path1: &str, path2: &str) -> String {
    format!("{}..{}", sanitize(path1), sanitize(path2))
}

fn sanitize(location: &str) -> String {
    let trimmed = location.trim_start_matches(['/', '\\']).trim_end_matches(['/', '\\']);
    let safe: String = trimmed
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect();
    if safe.is_empty() {
        "root".to_string()
    } else {
        safe
    }
}

// ============================================================================
// Encoding
// ============================================================================

fn escape_path(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn unescape_path(s: &str) -> Option<String> {
    let inner = s.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '\\' => out.push('\\'),
                '"' => out.push('"'),
                't' => out.push('\t'),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Serializes a listing to its text form
pub fn encode(listing: &PathListing) -> String {
    let mut out = String::with_capacity(64 + listing.len() * 64);
    out.push_str(HEADER);
    out.push('\n');
    out.push_str(SIDE_PREFIX);
    out.push_str(listing.side().name());
    out.push('\n');
    out.push_str(TIMESTAMP_PREFIX);
    out.push_str(&format_time(listing.timestamp()));
    out.push('\n');

    for record in listing.records() {
        let hash = record.hash().map(ContentHash::as_str).unwrap_or("-");
        out.push_str(&format!(
            "{} {} {} {}\n",
            record.size(),
            hash,
            format_time(record.modified()),
            escape_path(record.path().as_str())
        ));
    }
    out
}

/// Parses the text form of a listing; `origin` is only used in errors
pub fn decode(text: &str, origin: &Path) -> Result<PathListing, BisyncError> {
    let corrupt = |line: usize, reason: String| BisyncError::CorruptListing {
        path: origin.to_path_buf(),
        line,
        reason,
    };

    let mut lines = text.lines().enumerate();
    match lines.next() {
        Some((_, HEADER)) => {}
        _ => return Err(corrupt(1, "missing listing header".to_string())),
    }

    let mut side = None;
    let mut timestamp = None;
    let mut records = Vec::new();

    for (idx, line) in lines {
        let lineno = idx + 1;
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix(SIDE_PREFIX) {
            side = Some(
                Side::from_name(rest.trim())
                    .ok_or_else(|| corrupt(lineno, format!("unknown side {rest:?}")))?,
            );
            continue;
        }
        if let Some(rest) = line.strip_prefix(TIMESTAMP_PREFIX) {
            let parsed = DateTime::parse_from_rfc3339(rest.trim())
                .map_err(|e| corrupt(lineno, format!("bad timestamp: {e}")))?;
            timestamp = Some(parsed.with_timezone(&Utc));
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let mut fields = line.splitn(4, ' ');
        let (Some(size), Some(hash), Some(modified), Some(path)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(corrupt(lineno, "expected 4 fields".to_string()));
        };

        let size: u64 = size
            .parse()
            .map_err(|_| corrupt(lineno, format!("bad size {size:?}")))?;
        let modified = DateTime::parse_from_rfc3339(modified)
            .map_err(|e| corrupt(lineno, format!("bad modification time: {e}")))?
            .with_timezone(&Utc);
        let path = unescape_path(path)
            .ok_or_else(|| corrupt(lineno, format!("bad quoted path {path}")))?;
        let path = RelPath::new(path).map_err(|e| corrupt(lineno, e.to_string()))?;

        let mut record = FileRecord::new(path, size, modified);
        if hash != "-" {
            let hash = ContentHash::new(hash).map_err(|e| corrupt(lineno, e.to_string()))?;
            record = record.with_hash(hash);
        }
        records.push(record);
    }

    let side = side.ok_or_else(|| corrupt(2, "missing side header".to_string()))?;
    let timestamp = timestamp.ok_or_else(|| corrupt(3, "missing timestamp header".to_string()))?;
    PathListing::new(side, timestamp, records).map_err(|e| corrupt(0, e.to_string()))
}
