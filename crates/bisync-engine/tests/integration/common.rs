//! Shared helpers for engine integration tests
//!
//! Each test gets two temporary trees plus a temporary working directory,
//! wired to a [`RunCoordinator`] through [`LocalTreeAdapter`]s.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use bisync_core::config::{Config, ConfigBuilder};
use bisync_core::domain::{FileRecord, RelPath};
use bisync_core::ports::ITreeBackend;
use bisync_engine::{LocalTreeAdapter, RunCoordinator, RunReport};

/// Two trees and a working directory, cleaned up on drop
pub struct Fixture {
    pub path1: TempDir,
    pub path2: TempDir,
    pub workdir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            path1: TempDir::new().expect("path1 tempdir"),
            path2: TempDir::new().expect("path2 tempdir"),
            workdir: TempDir::new().expect("workdir tempdir"),
        }
    }

    /// A builder with both roots and the workdir already set
    pub fn builder(&self) -> ConfigBuilder {
        ConfigBuilder::new()
            .path1(self.path1.path())
            .path2(self.path2.path())
            .workdir(self.workdir.path())
    }

    pub fn coordinator(&self, config: Config) -> RunCoordinator {
        RunCoordinator::new(
            config,
            Arc::new(LocalTreeAdapter::new(self.path1.path())),
            Arc::new(LocalTreeAdapter::new(self.path2.path())),
        )
        .expect("valid config")
    }

    /// Runs with the given config and unwraps the infrastructure result
    pub async fn run(&self, config: Config) -> RunReport {
        self.coordinator(config).run().await.expect("run completes")
    }

    pub async fn resync(&self) -> RunReport {
        self.run(self.builder().resync(true).build()).await
    }

    pub async fn sync(&self) -> RunReport {
        self.run(self.builder().build()).await
    }
}

/// Writes `content` at `rel` under `root` with an mtime `age` in the past
pub fn write_aged(root: &Path, rel: &str, content: &str, age: Duration) {
    let full = root.join(rel);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(&full, content).expect("write file");
    let file = File::options().write(true).open(&full).expect("open file");
    file.set_modified(SystemTime::now() - age)
        .expect("set mtime");
}

/// Writes a file last modified an hour ago
pub fn write_old(root: &Path, rel: &str, content: &str) {
    write_aged(root, rel, content, Duration::from_secs(3600));
}

/// Writes a file modified just now
pub fn write_new(root: &Path, rel: &str, content: &str) {
    write_aged(root, rel, content, Duration::ZERO);
}

pub fn read(root: &Path, rel: &str) -> Option<String> {
    std::fs::read_to_string(root.join(rel)).ok()
}

pub fn exists(root: &Path, rel: &str) -> bool {
    root.join(rel).is_file()
}

/// Sorted relative paths of every file under `root`
pub fn tree(root: &Path) -> Vec<String> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::from(root)];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).expect("read dir") {
            let path = entry.expect("dir entry").path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let rel = path.strip_prefix(root).expect("under root");
                let parts: Vec<_> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push(parts.join("/"));
            }
        }
    }
    files.sort();
    files
}

/// Backend operation a [`FailingBackend`] can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum FailOn {
    List,
    Write,
    Delete,
    Rename,
    /// Reports a successful write without storing anything
    DropWrite,
}

/// Wraps a backend and fails one operation on one path
pub struct FailingBackend {
    inner: LocalTreeAdapter,
    op: FailOn,
    path: Option<RelPath>,
}

impl FailingBackend {
    pub fn new(root: &Path, op: FailOn, path: Option<&str>) -> Self {
        Self {
            inner: LocalTreeAdapter::new(root),
            op,
            path: path.map(|p| RelPath::new(p).expect("valid path")),
        }
    }

    fn trips(&self, op: FailOn, path: Option<&RelPath>) -> bool {
        self.op == op && (self.path.is_none() || self.path.as_ref() == path)
    }
}

#[async_trait]
impl ITreeBackend for FailingBackend {
    fn location(&self) -> String {
        self.inner.location()
    }

    async fn list(&self) -> anyhow::Result<Vec<FileRecord>> {
        if self.trips(FailOn::List, None) {
            anyhow::bail!("injected list failure");
        }
        self.inner.list().await
    }

    async fn read_file(&self, path: &RelPath) -> anyhow::Result<Vec<u8>> {
        self.inner.read_file(path).await
    }

    async fn write_file(
        &self,
        path: &RelPath,
        data: &[u8],
        modified: DateTime<Utc>,
    ) -> anyhow::Result<FileRecord> {
        if self.trips(FailOn::Write, Some(path)) {
            anyhow::bail!("injected write failure for {path}");
        }
        if self.trips(FailOn::DropWrite, Some(path)) {
            return Ok(FileRecord::new(path.clone(), data.len() as u64, modified));
        }
        self.inner.write_file(path, data, modified).await
    }

    async fn delete_file(&self, path: &RelPath) -> anyhow::Result<()> {
        if self.trips(FailOn::Delete, Some(path)) {
            anyhow::bail!("injected delete failure for {path}");
        }
        self.inner.delete_file(path).await
    }

    async fn rename(&self, from: &RelPath, to: &RelPath) -> anyhow::Result<()> {
        if self.trips(FailOn::Rename, Some(from)) {
            anyhow::bail!("injected rename failure for {from}");
        }
        self.inner.rename(from, to).await
    }

    async fn remove_empty_dirs(&self) -> anyhow::Result<usize> {
        self.inner.remove_empty_dirs().await
    }
}

/// Cancels `token` as soon as the first write arrives, then finishes it
pub struct CancellingBackend {
    inner: LocalTreeAdapter,
    token: CancellationToken,
}

impl CancellingBackend {
    pub fn new(root: &Path, token: CancellationToken) -> Self {
        Self {
            inner: LocalTreeAdapter::new(root),
            token,
        }
    }
}

#[async_trait]
impl ITreeBackend for CancellingBackend {
    fn location(&self) -> String {
        self.inner.location()
    }

    async fn list(&self) -> anyhow::Result<Vec<FileRecord>> {
        self.inner.list().await
    }

    async fn read_file(&self, path: &RelPath) -> anyhow::Result<Vec<u8>> {
        self.inner.read_file(path).await
    }

    async fn write_file(
        &self,
        path: &RelPath,
        data: &[u8],
        modified: DateTime<Utc>,
    ) -> anyhow::Result<FileRecord> {
        self.token.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.inner.write_file(path, data, modified).await
    }

    async fn delete_file(&self, path: &RelPath) -> anyhow::Result<()> {
        self.inner.delete_file(path).await
    }

    async fn rename(&self, from: &RelPath, to: &RelPath) -> anyhow::Result<()> {
        self.inner.rename(from, to).await
    }

    async fn remove_empty_dirs(&self) -> anyhow::Result<usize> {
        self.inner.remove_empty_dirs().await
    }
}
