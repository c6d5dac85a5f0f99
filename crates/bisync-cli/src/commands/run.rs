//! Run command - Synchronize two directory trees
//!
//! Provides the `bisync run` CLI command which:
//! 1. Merges command-line switches over the loaded configuration
//! 2. Creates a local tree adapter for each root
//! 3. Runs the coordinator, cancelling cleanly on Ctrl-C
//! 4. Displays the report and exits with the run's status code

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bisync_core::config::{CheckSyncMode, Config, ConfigBuilder};
use bisync_engine::{LocalTreeAdapter, RunCoordinator, RunReport};

use crate::output::{Counted, OutputFormat, OutputFormatter};
use crate::Invocation;

/// Switches for a single run; each one overrides the configuration file
#[derive(Debug, Args)]
pub struct RunCommand {
    /// First tree root
    pub path1: PathBuf,

    /// Second tree root
    pub path2: PathBuf,

    /// Rebuild the listings from the current state of both trees
    #[arg(long)]
    pub resync: bool,

    /// Show what would be done without making changes
    #[arg(long)]
    pub dry_run: bool,

    /// Require matching check files on both sides
    #[arg(long)]
    pub check_access: bool,

    /// Name of the check file
    #[arg(long, value_name = "NAME")]
    pub check_filename: Option<String>,

    /// Abort if more than this percentage of one side was deleted
    #[arg(long, value_name = "PERCENT")]
    pub max_delete: Option<u8>,

    /// Proceed even if the max-delete limit is exceeded
    #[arg(long)]
    pub force: bool,

    /// Post-run integrity check: enabled, disabled or only
    #[arg(long, value_name = "MODE")]
    pub check_sync: Option<CheckSyncMode>,

    /// Filter definition file
    #[arg(long, value_name = "FILE")]
    pub filters_file: Option<PathBuf>,

    /// Directory for listings and lock files
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Remove directories left empty after the run
    #[arg(long)]
    pub remove_empty_dirs: bool,

    /// Keep the working listings after the run
    #[arg(long)]
    pub no_cleanup: bool,

    /// Concurrent transfers
    #[arg(long, value_name = "N")]
    pub transfers: Option<u32>,

    /// Compare content hashes in addition to size and modification time
    #[arg(long)]
    pub compare_hash: bool,
}

impl RunCommand {
    pub async fn execute(&self, invocation: Invocation) -> Result<ExitCode> {
        let formatter = invocation.format.formatter(invocation.quiet);

        let path1 = canonical_root(&self.path1).await?;
        let path2 = canonical_root(&self.path2).await?;
        if path1 == path2 {
            bail!("path1 and path2 resolve to the same directory");
        }

        let config = self.apply(invocation.config, &path1, &path2);
        info!(
            config_path = %invocation.config_path.display(),
            workdir = %config.paths.workdir.display(),
            "Loaded configuration"
        );

        let hashing = config.compare.compare_hash;
        let coordinator = RunCoordinator::new(
            config,
            Arc::new(LocalTreeAdapter::new(&path1).with_hashing(hashing)),
            Arc::new(LocalTreeAdapter::new(&path2).with_hashing(hashing)),
        )?
        .with_cancellation(cancel_on_ctrl_c());

        if self.dry_run {
            formatter.info("Dry run mode - no changes will be made");
        }
        let report = coordinator.run().await?;

        match invocation.format {
            OutputFormat::Json => {
                let json = serde_json::to_value(&report).context("Failed to serialize report")?;
                formatter.print_json(&json);
            }
            OutputFormat::Human => display(&report, &*formatter),
        }

        Ok(ExitCode::from(report.status.exit_code() as u8))
    }

    /// Overlays the command-line switches onto `config`
    fn apply(&self, config: Config, path1: &Path, path2: &Path) -> Config {
        let mut builder = ConfigBuilder::from_config(config).path1(path1).path2(path2);

        if self.resync {
            builder = builder.resync(true);
        }
        if self.dry_run {
            builder = builder.dry_run(true);
        }
        if self.check_access {
            builder = builder.check_access(true);
        }
        if let Some(name) = &self.check_filename {
            builder = builder.check_filename(name.clone());
        }
        if let Some(percent) = self.max_delete {
            builder = builder.max_delete(percent);
        }
        if self.force {
            builder = builder.force(true);
        }
        if let Some(mode) = self.check_sync {
            builder = builder.check_sync(mode);
        }
        if let Some(file) = &self.filters_file {
            builder = builder.filters_file(file);
        }
        if let Some(dir) = &self.workdir {
            builder = builder.workdir(dir);
        }
        if self.remove_empty_dirs {
            builder = builder.remove_empty_dirs(true);
        }
        if self.no_cleanup {
            builder = builder.retain_working_files(true);
        }
        if let Some(n) = self.transfers {
            builder = builder.transfers(n);
        }
        if self.compare_hash {
            builder = builder.compare_hash(true);
        }

        builder.build()
    }
}

/// Resolves a root to an absolute path, refusing anything but a directory
///
/// A missing root must fail here: listing it inside a run would count as a
/// backend failure and poison the history.
async fn canonical_root(path: &Path) -> Result<PathBuf> {
    let resolved = tokio::fs::canonicalize(path)
        .await
        .with_context(|| format!("Cannot access {}", path.display()))?;
    if !resolved.is_dir() {
        bail!("{} is not a directory", resolved.display());
    }
    Ok(resolved)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight transfers");
            trigger.cancel();
        }
    });
    token
}

fn display(report: &RunReport, formatter: &dyn OutputFormatter) {
    let duration = if report.duration_ms >= 1000 {
        format!("{:.1}s", report.duration_ms as f64 / 1000.0)
    } else {
        format!("{}ms", report.duration_ms)
    };
    let summary = &report.summary;

    if report.status.is_success() {
        if report.dry_run {
            formatter.success(&format!("Dry run completed in {duration}"));
        } else if summary.mutating() == 0 {
            formatter.success("Already in sync");
        } else {
            formatter.success(&format!("Sync completed in {duration}"));
        }
    } else if report.status.is_critical() {
        formatter.error(&format!("Run locked out ({})", report.status));
    } else {
        formatter.warn(&format!("Run aborted ({})", report.status));
    }

    if let Some(message) = &report.message {
        formatter.info(message);
    }

    for (label, count) in [
        ("Copied to path1:  ", summary.copies_to_path1),
        ("Copied to path2:  ", summary.copies_to_path2),
        ("Deleted on path1: ", summary.deletes_on_path1),
        ("Deleted on path2: ", summary.deletes_on_path2),
        ("Conflicts:        ", summary.conflicts),
    ] {
        if count > 0 {
            formatter.info(&format!("{label}{}", Counted::new(count, "file")));
        }
    }

    for conflict in report.plan.conflicts() {
        formatter.info(&format!("  - conflict: {}", conflict.path()));
    }
    for veto in &report.vetoes {
        formatter.info(&format!("  - {veto}"));
    }

    if let Some(outcome) = &report.propagation {
        if !outcome.failures.is_empty() {
            formatter.error(&format!(
                "{} occurred:",
                Counted::new(outcome.failures.len(), "error")
            ));
            for failure in &outcome.failures {
                formatter.info(&format!("  - {}: {}", failure.path, failure.reason));
            }
        }
    }

    if report.removed_dirs > 0 {
        formatter.info(&format!(
            "Removed {}",
            Counted::new(report.removed_dirs, "empty directory").plural("empty directories")
        ));
    }

    if let Some(hint) = report.recovery_hint() {
        formatter.info(&format!("Next: {hint}"));
    }
}
