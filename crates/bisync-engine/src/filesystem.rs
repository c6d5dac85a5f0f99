//! Local directory tree adapter (secondary/driven adapter)
//!
//! Implements [`ITreeBackend`] over a root directory using `tokio::fs`.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: content goes to a sibling temp file which is renamed
//!   into place, so a crash never leaves a half-written target.
//! - **Modification times**: written files take the source file's mtime so
//!   the next run classifies them as unchanged.
//! - **Hashing**: SHA-256 of file content, only when enabled, since it
//!   requires reading every file during listing.
//! - **Symlinks and special files** are not followed and not listed.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use bisync_core::domain::{ContentHash, FileRecord, RelPath};
use bisync_core::ports::ITreeBackend;

/// Suffix for in-flight writes
const TEMP_SUFFIX: &str = ".bisync-tmp";

/// Adapter that exposes a local directory as one side of a sync
#[derive(Debug, Clone)]
pub struct LocalTreeAdapter {
    root: PathBuf,
    hash_content: bool,
}

impl LocalTreeAdapter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hash_content: false,
        }
    }

    /// Enables SHA-256 hashing of every listed file
    #[must_use]
    pub fn with_hashing(mut self, enabled: bool) -> Self {
        self.hash_content = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &RelPath) -> PathBuf {
        path.as_str()
            .split('/')
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }

    fn relative(&self, full: &Path) -> anyhow::Result<Option<RelPath>> {
        let rel = full
            .strip_prefix(&self.root)
            .with_context(|| format!("{} escapes root {}", full.display(), self.root.display()))?;
        let mut parts = Vec::new();
        for component in rel.components() {
            match component.as_os_str().to_str() {
                Some(s) => parts.push(s),
                None => {
                    warn!(path = %full.display(), "Skipping non UTF-8 path");
                    return Ok(None);
                }
            }
        }
        match RelPath::new(parts.join("/")) {
            Ok(p) => Ok(Some(p)),
            Err(e) => {
                warn!(path = %full.display(), error = %e, "Skipping unrepresentable path");
                Ok(None)
            }
        }
    }
}

fn hash_bytes(data: &[u8]) -> anyhow::Result<ContentHash> {
    let digest = Sha256::digest(data);
    Ok(ContentHash::new(format!("{digest:x}"))?)
}

fn temp_path(target: &Path) -> PathBuf {
    let mut p = target.as_os_str().to_owned();
    p.push(TEMP_SUFFIX);
    PathBuf::from(p)
}

#[async_trait::async_trait]
impl ITreeBackend for LocalTreeAdapter {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn list(&self) -> anyhow::Result<Vec<FileRecord>> {
        let mut records = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("reading directory {}", dir.display()))?;

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let full = entry.path();

                if file_type.is_dir() {
                    pending.push(full);
                    continue;
                }
                if !file_type.is_file() {
                    debug!(path = %full.display(), "Skipping non-regular file");
                    continue;
                }
                if full.as_os_str().to_string_lossy().ends_with(TEMP_SUFFIX) {
                    continue;
                }

                let Some(rel) = self.relative(&full)? else {
                    continue;
                };
                let metadata = entry.metadata().await?;
                let modified: DateTime<Utc> = metadata.modified()?.into();
                let mut record = FileRecord::new(rel, metadata.len(), modified);

                if self.hash_content {
                    let data = tokio::fs::read(&full)
                        .await
                        .with_context(|| format!("hashing {}", full.display()))?;
                    record = record.with_hash(hash_bytes(&data)?);
                }
                records.push(record);
            }
        }

        debug!(files = records.len(), "Listing complete");
        Ok(records)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn read_file(&self, path: &RelPath) -> anyhow::Result<Vec<u8>> {
        let full = self.resolve(path);
        let data = tokio::fs::read(&full)
            .await
            .with_context(|| format!("reading {}", full.display()))?;
        debug!(bytes = data.len(), "File read");
        Ok(data)
    }

    #[instrument(skip(self, data), fields(path = %path, bytes = data.len()))]
    async fn write_file(
        &self,
        path: &RelPath,
        data: &[u8],
        modified: DateTime<Utc>,
    ) -> anyhow::Result<FileRecord> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let tmp = temp_path(&target);
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;

        let mtime: SystemTime = modified.into();
        let tmp_for_mtime = tmp.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let file = std::fs::OpenOptions::new().write(true).open(&tmp_for_mtime)?;
            file.set_modified(mtime)
        })
        .await?
        .with_context(|| format!("setting mtime on {}", tmp.display()))?;

        tokio::fs::rename(&tmp, &target)
            .await
            .with_context(|| format!("renaming into {}", target.display()))?;

        let metadata = tokio::fs::metadata(&target).await?;
        let mut record = FileRecord::new(path.clone(), metadata.len(), metadata.modified()?.into());
        if self.hash_content {
            record = record.with_hash(hash_bytes(data)?);
        }
        debug!("Write complete");
        Ok(record)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn delete_file(&self, path: &RelPath) -> anyhow::Result<()> {
        let full = self.resolve(path);
        tokio::fs::remove_file(&full)
            .await
            .with_context(|| format!("deleting {}", full.display()))?;
        debug!("File deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn rename(&self, from: &RelPath, to: &RelPath) -> anyhow::Result<()> {
        let source = self.resolve(from);
        let target = self.resolve(to);
        if tokio::fs::try_exists(&target).await? {
            bail!("rename target {} already exists", target.display());
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&source, &target)
            .await
            .with_context(|| format!("renaming {} to {}", source.display(), target.display()))?;
        debug!("File renamed");
        Ok(())
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn remove_empty_dirs(&self) -> anyhow::Result<usize> {
        let mut dirs = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    let path = entry.path();
                    dirs.push(path.clone());
                    pending.push(path);
                }
            }
        }

        // Deepest first so parents emptied by this pass go too
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

        let mut removed = 0;
        for dir in dirs {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            if entries.next_entry().await?.is_none() {
                tokio::fs::remove_dir(&dir)
                    .await
                    .with_context(|| format!("removing {}", dir.display()))?;
                removed += 1;
            }
        }

        debug!(removed, "Empty directories removed");
        Ok(removed)
    }
}
