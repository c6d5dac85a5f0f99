//! Status command - Display history state for a path pair
//!
//! Provides the `bisync status` CLI command which:
//! 1. Reports whether the history is trusted, missing, or poisoned
//! 2. Shows where each listing lives and how many files it records
//! 3. Shows the lockout record and the recovery step when poisoned

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use bisync_core::domain::{HistoryTrust, Side};
use bisync_engine::history::{ListingKind, ListingStore};
use bisync_engine::lockout::LockoutManager;

use crate::output::{Counted, OutputFormat};
use crate::Invocation;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// First tree root
    pub path1: PathBuf,

    /// Second tree root
    pub path2: PathBuf,

    /// Directory holding the listings
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,
}

impl StatusCommand {
    pub async fn execute(&self, invocation: Invocation) -> Result<ExitCode> {
        let formatter = invocation.format.formatter(invocation.quiet);

        let workdir = self
            .workdir
            .clone()
            .unwrap_or(invocation.config.paths.workdir);
        let store = ListingStore::for_locations(
            workdir,
            &resolve(&self.path1).display().to_string(),
            &resolve(&self.path2).display().to_string(),
        );
        let lockout = LockoutManager::new(store.clone());

        info!(base = %store.base(), "Showing status for path pair");

        let trust = lockout
            .check()
            .await
            .context("Failed to read lockout state")?;

        let mut listings = Vec::new();
        for side in Side::BOTH {
            let kind = if trust.is_poisoned() {
                ListingKind::Poisoned
            } else {
                ListingKind::History
            };
            let path = store.listing_path(side, kind);
            let count = match store.load(side, kind).await {
                Ok(Some(listing)) => Some(listing.len()),
                Ok(None) => None,
                Err(e) => {
                    formatter.warn(&format!("{side} listing unreadable: {e}"));
                    None
                }
            };
            listings.push((side, path, count));
        }

        if matches!(invocation.format, OutputFormat::Json) {
            let json = serde_json::json!({
                "workdir": store.workdir().display().to_string(),
                "base": store.base(),
                "history": trust,
                "listings": listings
                    .iter()
                    .map(|(side, path, count)| serde_json::json!({
                        "side": side.name(),
                        "path": path.display().to_string(),
                        "files": count,
                    }))
                    .collect::<Vec<_>>(),
            });
            formatter.print_json(&json);
            return Ok(ExitCode::from(exit_code(&trust)));
        }

        match &trust {
            HistoryTrust::Trusted => formatter.success("History is trusted"),
            HistoryTrust::Missing => {
                formatter.warn("No history for this path pair");
                formatter.info("Next: run with --resync first");
            }
            HistoryTrust::Poisoned { record } => {
                formatter.error("History is locked out");
                if let Some(record) = record {
                    formatter.info(&format!(
                        "Poisoned at {} by run {}",
                        record.at.format("%Y-%m-%d %H:%M:%S UTC"),
                        record.run_id.short()
                    ));
                    formatter.info(&format!("Reason: {}", record.reason));
                }
                formatter.info("Next: inspect both paths, then run with --resync");
            }
        }

        formatter.info(&format!("Working directory: {}", store.workdir().display()));
        for (side, path, count) in &listings {
            match count {
                Some(n) => formatter.info(&format!(
                    "{side}: {} ({})",
                    Counted::new(*n, "file"),
                    path.display()
                )),
                None => formatter.info(&format!("{side}: no listing")),
            }
        }

        Ok(ExitCode::from(exit_code(&trust)))
    }
}

/// Canonical form when the root exists, as given otherwise
fn resolve(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Same scale as a run: 0 trusted, 1 missing, 2 locked out
fn exit_code(trust: &HistoryTrust) -> u8 {
    match trust {
        HistoryTrust::Trusted => 0,
        HistoryTrust::Missing => 1,
        HistoryTrust::Poisoned { .. } => 2,
    }
}
