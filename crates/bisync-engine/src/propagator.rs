//! Dispatch of the action plan to the two backends
//!
//! Mutating actions run concurrently, at most `transfers` at a time. Actions
//! touch disjoint paths, except that a conflict owns its side-tagged names,
//! which the resolver guarantees are unique within the plan.
//!
//! There are no retries here. A failed action leaves its item in an unknown
//! state, so the outcome reports it and the coordinator locks the pair out.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use bisync_core::domain::{
    Action, ActionKind, ActionPlan, ConflictKind, FileRecord, PathListing, RelPath, Side,
};
use bisync_core::ports::ITreeBackend;

use crate::BisyncError;

/// One action that did not complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionFailure {
    pub path: RelPath,
    pub action: ActionKind,
    pub reason: String,
    /// For conflicts: some of the steps had already been applied
    pub partial: bool,
}

/// What propagation did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropagationOutcome {
    pub succeeded: usize,
    pub failures: Vec<ActionFailure>,
    /// Actions never dispatched because the run was cancelled
    pub skipped: usize,
    pub cancelled: bool,
}

impl PropagationOutcome {
    /// Every mutating action applied, nothing cancelled
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    /// Conflicts where only some of the preserved versions were written
    pub fn partial_conflicts(&self) -> impl Iterator<Item = &ActionFailure> {
        self.failures.iter().filter(|f| f.partial)
    }

    /// Short description of why propagation was not clean
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(first) = self.failures.first() {
            parts.push(format!(
                "{} action(s) failed, first: {} {}: {}",
                self.failures.len(),
                first.action,
                first.path,
                first.reason
            ));
        }
        if self.cancelled {
            parts.push(format!("cancelled with {} action(s) not dispatched", self.skipped));
        }
        parts.join("; ")
    }
}

/// The two backends a propagation works against
#[derive(Clone)]
struct Sides {
    path1: Arc<dyn ITreeBackend>,
    path2: Arc<dyn ITreeBackend>,
}

impl Sides {
    fn get(&self, side: Side) -> &Arc<dyn ITreeBackend> {
        match side {
            Side::Path1 => &self.path1,
            Side::Path2 => &self.path2,
        }
    }

    async fn copy(
        &self,
        from: Side,
        source: &RelPath,
        target: &RelPath,
        record: Option<&FileRecord>,
    ) -> Result<(), BisyncError> {
        let data = self
            .get(from)
            .read_file(source)
            .await
            .map_err(|e| BisyncError::backend(from, format!("read {source}"), e))?;
        let modified = record.map(FileRecord::modified).unwrap_or_else(Utc::now);
        let to = from.other();
        self.get(to)
            .write_file(target, &data, modified)
            .await
            .map_err(|e| BisyncError::backend(to, format!("write {target}"), e))?;
        Ok(())
    }

    async fn rename(&self, side: Side, from: &RelPath, to: &RelPath) -> Result<(), BisyncError> {
        self.get(side)
            .rename(from, to)
            .await
            .map_err(|e| BisyncError::backend(side, format!("rename {from} to {to}"), e))
    }
}

/// A mutating action plus the source records it needs
struct Job {
    action: Action,
    source_record: Option<FileRecord>,
}

/// Applies an [`ActionPlan`] to the backends
pub struct ActionPropagator {
    sides: Sides,
    transfers: usize,
}

impl ActionPropagator {
    pub fn new(
        path1: Arc<dyn ITreeBackend>,
        path2: Arc<dyn ITreeBackend>,
        transfers: usize,
    ) -> Self {
        Self {
            sides: Sides { path1, path2 },
            transfers: transfers.max(1),
        }
    }

    /// Runs every mutating action of `plan`
    ///
    /// `current1`/`current2` are the listings the plan was built from; copy
    /// sources take their modification time from them. Cancellation stops
    /// new dispatches and waits for in-flight actions.
    #[instrument(skip_all, fields(actions = plan.mutating().count(), transfers = self.transfers))]
    pub async fn propagate(
        &self,
        plan: &ActionPlan,
        current1: &PathListing,
        current2: &PathListing,
        cancel: &CancellationToken,
    ) -> PropagationOutcome {
        let semaphore = Arc::new(Semaphore::new(self.transfers));
        let mut tasks: JoinSet<(RelPath, ActionKind, Result<(), (BisyncError, bool)>)> =
            JoinSet::new();
        let mut outcome = PropagationOutcome::default();
        let mut in_flight: HashMap<RelPath, ActionKind> = HashMap::new();

        let jobs: Vec<Job> = plan
            .mutating()
            .map(|action| {
                let listing = match action.source_side() {
                    Side::Path1 => current1,
                    Side::Path2 => current2,
                };
                Job {
                    source_record: listing.get(action.path()).cloned(),
                    action: action.clone(),
                }
            })
            .collect();
        let total = jobs.len();

        for (dispatched, job) in jobs.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                outcome.cancelled = true;
                outcome.skipped = total - dispatched;
                warn!(skipped = outcome.skipped, "Propagation cancelled");
                break;
            };

            in_flight.insert(job.action.path().clone(), job.action.kind());
            let sides = self.sides.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let path = job.action.path().clone();
                let kind = job.action.kind();
                let result = execute(&sides, &job).await;
                (path, kind, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((path, _, Ok(()))) => {
                    debug!(path = %path, "Action applied");
                    in_flight.remove(&path);
                    outcome.succeeded += 1;
                }
                Ok((path, kind, Err((err, partial)))) => {
                    error!(path = %path, action = %kind, partial, error = %err, "Action failed");
                    in_flight.remove(&path);
                    outcome.failures.push(ActionFailure {
                        path,
                        action: kind,
                        reason: err.to_string(),
                        partial,
                    });
                }
                Err(join_err) => error!(error = %join_err, "Propagation task aborted"),
            }
        }

        // Whatever is left belonged to a task that never reported back
        for (path, kind) in in_flight {
            outcome.failures.push(ActionFailure {
                path,
                action: kind,
                reason: "propagation task aborted".to_string(),
                partial: kind == ActionKind::RenameConflictBoth,
            });
        }

        outcome.failures.sort_by(|a, b| a.path.cmp(&b.path));
        info!(
            succeeded = outcome.succeeded,
            failed = outcome.failures.len(),
            skipped = outcome.skipped,
            "Propagation finished"
        );
        outcome
    }
}

/// Applies one action; the flag on error marks a partially applied conflict
async fn execute(sides: &Sides, job: &Job) -> Result<(), (BisyncError, bool)> {
    let action = &job.action;
    let path = action.path();

    match action.kind() {
        ActionKind::NoOp => Ok(()),
        ActionKind::CopyToOther => sides
            .copy(action.source_side(), path, path, job.source_record.as_ref())
            .await
            .map_err(|e| (e, false)),
        ActionKind::DeleteOnOther => {
            let target = action.target_side();
            sides
                .get(target)
                .delete_file(path)
                .await
                .map_err(|e| (BisyncError::backend(target, format!("delete {path}"), e), false))
        }
        ActionKind::RenameConflictBoth => {
            let Some(conflict) = action.conflict_record() else {
                return Err((
                    BisyncError::InvalidConfig(format!("conflict action for {path} has no record")),
                    false,
                ));
            };
            match conflict.kind() {
                ConflictKind::DeletedVsChanged { deleted } => {
                    let survivor = deleted.other();
                    sides
                        .copy(survivor, path, path, conflict.record(survivor))
                        .await
                        .map_err(|e| (e, false))
                }
                ConflictKind::BothChanged => {
                    let (Some(name1), Some(name2)) =
                        (conflict.renamed(Side::Path1), conflict.renamed(Side::Path2))
                    else {
                        return Err((
                            BisyncError::InvalidConfig(format!(
                                "conflict for {path} has no preserved names"
                            )),
                            false,
                        ));
                    };

                    let mut applied = 0usize;
                    let steps = async {
                        sides.rename(Side::Path1, path, name1).await?;
                        applied += 1;
                        sides.rename(Side::Path2, path, name2).await?;
                        applied += 1;
                        sides
                            .copy(Side::Path1, name1, name1, conflict.record(Side::Path1))
                            .await?;
                        applied += 1;
                        sides
                            .copy(Side::Path2, name2, name2, conflict.record(Side::Path2))
                            .await?;
                        Ok::<(), BisyncError>(())
                    };
                    let result = steps.await;
                    result.map_err(|e| (e, applied > 0))
                }
            }
        }
    }
}
