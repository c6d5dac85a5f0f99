//! Run coordination
//!
//! The [`RunCoordinator`] drives one run through the state machine:
//!
//! 1. **Listing**: check history trust, load history, list both sides
//!    concurrently, apply filters
//! 2. **Comparing**: classify each side against its history and merge the
//!    two change sets into an action plan
//! 3. **SafetyCheck**: evaluate every veto (skipped on resync); a dry run
//!    stops here and reports the plan
//! 4. **Propagating**: apply the plan; any failure poisons history
//! 5. **Verifying**: re-list, optionally compare path sets, commit listings;
//!    a mismatch ends the run without committing
//!
//! A critical failure poisons history, except during a dry run, which never
//! touches persisted listings.
//!
//! Expected refusals come back as a [`RunReport`] with a non-success
//! [`ExitStatus`]. Only infrastructure failures (lock contention, working
//! directory I/O, bad configuration, cancellation before propagation) are
//! returned as `Err`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use bisync_conflict::{ConflictNamer, ConflictResolver};
use bisync_core::config::{CheckSyncMode, Config};
use bisync_core::domain::{
    ActionPlan, Change, ExitStatus, HistoryTrust, PathListing, PlanSummary, RelPath, RunId,
    RunState, Side,
};
use bisync_core::ports::ITreeBackend;

use crate::delta::DeltaClassifier;
use crate::filter::FilterSet;
use crate::history::{ListingKind, ListingStore};
use crate::lock::RunLock;
use crate::lockout::LockoutManager;
use crate::propagator::{ActionPropagator, PropagationOutcome};
use crate::safety::{SafetyGate, SafetyInput, Veto};
use crate::verifier::{IntegrityVerifier, VerificationReport};
use crate::BisyncError;

// ============================================================================
// RunReport
// ============================================================================

/// Everything a caller needs to know about a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: ExitStatus,
    /// State the run ended in
    pub final_state: RunState,
    pub resync: bool,
    pub dry_run: bool,
    pub plan: ActionPlan,
    pub summary: PlanSummary,
    pub vetoes: Vec<Veto>,
    pub propagation: Option<PropagationOutcome>,
    pub verification: Option<VerificationReport>,
    /// Empty directories removed after propagation, both sides together
    pub removed_dirs: usize,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    /// What the user must do next, if anything
    pub fn recovery_hint(&self) -> Option<&'static str> {
        self.status.recovery_hint()
    }
}

// ============================================================================
// RunContext
// ============================================================================

/// State owned by a single run
struct RunContext {
    run_id: RunId,
    state: RunState,
    started: Instant,
    started_at: DateTime<Utc>,
    resync: bool,
    dry_run: bool,
    plan: ActionPlan,
    vetoes: Vec<Veto>,
    propagation: Option<PropagationOutcome>,
    verification: Option<VerificationReport>,
    removed_dirs: usize,
}

impl RunContext {
    fn new(resync: bool, dry_run: bool) -> Self {
        Self {
            run_id: RunId::new(),
            state: RunState::Idle,
            started: Instant::now(),
            started_at: Utc::now(),
            resync,
            dry_run,
            plan: ActionPlan::default(),
            vetoes: Vec::new(),
            propagation: None,
            verification: None,
            removed_dirs: 0,
        }
    }

    fn advance(&mut self, to: RunState) -> Result<(), BisyncError> {
        let from = self.state;
        self.state = from.transition(to)?;
        debug!(from = %from, to = %to, "Run state changed");
        Ok(())
    }

    fn finish(self, status: ExitStatus, message: Option<String>) -> RunReport {
        let summary = self.plan.summary();
        RunReport {
            run_id: self.run_id,
            status,
            final_state: self.state,
            resync: self.resync,
            dry_run: self.dry_run,
            plan: self.plan,
            summary,
            vetoes: self.vetoes,
            propagation: self.propagation,
            verification: self.verification,
            removed_dirs: self.removed_dirs,
            message,
            started_at: self.started_at,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Why a phase ended the run early
enum Stop {
    /// Expected refusal; history stays as it was
    Refuse(ExitStatus, String),
    /// History is already poisoned from an earlier run
    LockedOut(String),
    /// History must be poisoned now
    Critical(String),
    /// Infrastructure failure, surfaced as `Err`
    Fail(BisyncError),
}

impl From<BisyncError> for Stop {
    fn from(error: BisyncError) -> Self {
        if error.is_critical() {
            Stop::Critical(error.to_string())
        } else {
            Stop::Fail(error)
        }
    }
}

type Finished = (ExitStatus, Option<String>);

// ============================================================================
// RunCoordinator
// ============================================================================

/// Runs bisync between two tree backends
pub struct RunCoordinator {
    config: Config,
    path1: Arc<dyn ITreeBackend>,
    path2: Arc<dyn ITreeBackend>,
    store: ListingStore,
    lockout: LockoutManager,
    classifier: DeltaClassifier,
    resolver: ConflictResolver,
    gate: SafetyGate,
    verifier: IntegrityVerifier,
    cancel: CancellationToken,
}

impl RunCoordinator {
    /// Creates a coordinator after validating `config`
    pub fn new(
        config: Config,
        path1: Arc<dyn ITreeBackend>,
        path2: Arc<dyn ITreeBackend>,
    ) -> Result<Self, BisyncError> {
        let errors = config.validate();
        if !errors.is_empty() {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(BisyncError::InvalidConfig(joined));
        }

        let store = ListingStore::for_locations(
            config.paths.workdir.clone(),
            &path1.location(),
            &path2.location(),
        );
        let tolerance = config.modtime_tolerance();

        Ok(Self {
            lockout: LockoutManager::new(store.clone()),
            store,
            classifier: DeltaClassifier::new(tolerance),
            resolver: ConflictResolver::new(
                ConflictNamer::from_config(&config.conflicts),
                tolerance,
            ),
            gate: SafetyGate::new(&config.safety),
            verifier: IntegrityVerifier,
            cancel: CancellationToken::new(),
            config,
            path1,
            path2,
        })
    }

    /// Uses `token` to interrupt the run
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn store(&self) -> &ListingStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current trust state of this pair's history
    pub async fn status(&self) -> Result<HistoryTrust, BisyncError> {
        self.lockout.check().await
    }

    /// Executes one run
    pub async fn run(&self) -> Result<RunReport, BisyncError> {
        self.store.ensure_workdir().await?;
        let mut ctx = RunContext::new(self.config.run.resync, self.config.run.dry_run);
        let _lock = RunLock::acquire(self.store.lock_path(), ctx.run_id)?;

        let span = info_span!("bisync_run", run_id = %ctx.run_id.short());
        async move {
            info!(
                path1 = %self.path1.location(),
                path2 = %self.path2.location(),
                resync = ctx.resync,
                dry_run = ctx.dry_run,
                check_sync = %self.config.check_sync,
                "Run started"
            );

            let outcome = if self.config.check_sync == CheckSyncMode::Only {
                self.verify_only(&mut ctx).await
            } else {
                self.execute(&mut ctx).await
            };

            let result = match outcome {
                Ok((status, message)) => Ok(ctx.finish(status, message)),
                Err(Stop::Refuse(status, message)) => {
                    if ctx.state.can_transition_to(RunState::Idle) {
                        ctx.advance(RunState::Idle)?;
                    }
                    Ok(ctx.finish(status, Some(message)))
                }
                Err(Stop::LockedOut(message)) => {
                    ctx.advance(RunState::LockedOut)?;
                    Ok(ctx.finish(ExitStatus::CriticalLockout, Some(message)))
                }
                Err(Stop::Critical(reason)) if ctx.dry_run => {
                    if ctx.state.can_transition_to(RunState::Idle) {
                        ctx.advance(RunState::Idle)?;
                    }
                    let message = format!("dry run: {reason}; history left untouched");
                    Ok(ctx.finish(ExitStatus::CriticalLockout, Some(message)))
                }
                Err(Stop::Critical(reason)) => {
                    self.lockout.poison(reason.clone(), ctx.run_id).await?;
                    ctx.advance(RunState::LockedOut)?;
                    Ok(ctx.finish(ExitStatus::CriticalLockout, Some(reason)))
                }
                Err(Stop::Fail(e)) => Err(e),
            };

            if !self.config.run.retain_working_files {
                if let Err(e) = self.store.remove_working().await {
                    warn!(error = %e, "Failed to remove working listings");
                }
            }

            match &result {
                Ok(report) if report.status.is_success() => info!(
                    status = %report.status,
                    changes = report.summary.mutating(),
                    conflicts = report.summary.conflicts,
                    duration_ms = report.duration_ms,
                    "Run finished"
                ),
                Ok(report) if report.status.is_critical() => error!(
                    status = %report.status,
                    reason = report.message.as_deref().unwrap_or(""),
                    recovery = report.recovery_hint().unwrap_or(""),
                    "Run locked out"
                ),
                Ok(report) => warn!(
                    status = %report.status,
                    reason = report.message.as_deref().unwrap_or(""),
                    recovery = report.recovery_hint().unwrap_or(""),
                    "Run aborted"
                ),
                Err(e) => error!(error = %e, "Run failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    // ------------------------------------------------------------------------
    // Phases
    // ------------------------------------------------------------------------

    async fn execute(&self, ctx: &mut RunContext) -> Result<Finished, Stop> {
        // Listing; trust is settled before anything else can fail
        ctx.advance(RunState::Listing)?;
        let (prior1, prior2) = if ctx.resync {
            (PathListing::empty(Side::Path1), PathListing::empty(Side::Path2))
        } else {
            self.load_history().await?
        };
        let filters = FilterSet::from_config(self.config.paths.filters_file.as_deref())
            .await
            .map_err(Stop::Fail)?;
        let (current1, current2) = self.list_both(&filters, ctx.dry_run).await?;
        if self.cancel.is_cancelled() {
            ctx.advance(RunState::Idle)?;
            return Err(Stop::Fail(BisyncError::Cancelled));
        }

        // Comparing
        ctx.advance(RunState::Comparing)?;
        if ctx.resync {
            ctx.plan = self.resolver.resync_plan(&current1, &current2);
            ctx.advance(RunState::SafetyCheck)?;
            info!("Resync: safety checks skipped");
        } else {
            let changes1 = self.classify(&prior1, &current1)?;
            let changes2 = self.classify(&prior2, &current2)?;
            ctx.plan = self
                .resolver
                .resolve(&changes1, &changes2)
                .map_err(|e| Stop::Fail(e.into()))?;

            // SafetyCheck
            ctx.advance(RunState::SafetyCheck)?;
            let filters_changed = filters
                .changed_since_last_resync()
                .await
                .map_err(Stop::Fail)?;
            let verdict = self.gate.evaluate(SafetyInput {
                prior1: &prior1,
                prior2: &prior2,
                current1: &current1,
                current2: &current2,
                changes1: &changes1,
                changes2: &changes2,
                filters_changed,
            });
            if !verdict.passed() {
                ctx.vetoes = verdict.vetoes().to_vec();
                return Err(Stop::Refuse(verdict.status(), verdict.message()));
            }
        }

        let planned = ctx.plan.summary().mutating();
        if ctx.dry_run {
            for action in ctx.plan.mutating() {
                info!(action = %action, "Dry run: would apply");
            }
            ctx.advance(RunState::Idle)?;
            return Ok((
                ExitStatus::Success,
                Some(format!("dry run: {planned} change(s) planned")),
            ));
        }
        if self.cancel.is_cancelled() {
            ctx.advance(RunState::Idle)?;
            return Err(Stop::Fail(BisyncError::Cancelled));
        }

        // Propagating
        ctx.advance(RunState::Propagating)?;
        let propagator = ActionPropagator::new(
            self.path1.clone(),
            self.path2.clone(),
            self.config.propagation.transfers as usize,
        );
        let outcome = propagator
            .propagate(&ctx.plan, &current1, &current2, &self.cancel)
            .await;
        for partial in outcome.partial_conflicts() {
            warn!(path = %partial.path, "Conflict only partially resolved");
        }
        let clean = outcome.is_clean();
        let failure = outcome.summary();
        ctx.propagation = Some(outcome);
        if !clean {
            return Err(Stop::Critical(format!(
                "propagation did not complete: {failure}"
            )));
        }

        if self.config.propagation.remove_empty_dirs {
            ctx.removed_dirs = self.remove_empty_dirs().await;
        }

        // Verifying
        ctx.advance(RunState::Verifying)?;
        let (after1, after2) = self.list_both(&filters, true).await?;

        if self.config.check_sync == CheckSyncMode::Enabled {
            let report = self.verifier.verify(&after1, &after2);
            let matched = report.matched();
            let message = report.message();
            ctx.verification = Some(report);
            if !matched {
                // Prior listings stay the baseline for the next run
                ctx.advance(RunState::Idle)?;
                return Ok((ExitStatus::IntegrityMismatch, Some(message)));
            }
        }

        let touched = touched_paths(&ctx.plan);
        let commit1 = settle(&current1, &after1, &touched);
        let commit2 = settle(&current2, &after2, &touched);

        if ctx.resync {
            filters.store_fingerprint().await.map_err(Stop::Fail)?;
        }
        self.lockout
            .commit(&commit1, &commit2)
            .await
            .map_err(|e| Stop::Critical(format!("could not commit listings: {e}")))?;
        ctx.advance(RunState::Committed)?;

        let message = (planned > 0).then(|| format!("{planned} change(s) applied"));
        Ok((ExitStatus::Success, message))
    }

    /// Compares the two persisted listings without listing or mutating
    async fn verify_only(&self, ctx: &mut RunContext) -> Result<Finished, Stop> {
        ctx.advance(RunState::Listing)?;
        let (history1, history2) = self.load_history().await?;

        ctx.advance(RunState::Verifying)?;
        let report = self.verifier.verify(&history1, &history2);
        let finished = if report.matched() {
            (ExitStatus::Success, Some(report.message()))
        } else {
            (ExitStatus::IntegrityMismatch, Some(report.message()))
        };
        ctx.verification = Some(report);
        ctx.advance(RunState::Idle)?;
        Ok(finished)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Checks trust and loads both history listings
    async fn load_history(&self) -> Result<(PathListing, PathListing), Stop> {
        match self.lockout.check().await.map_err(Stop::Fail)? {
            HistoryTrust::Trusted => {}
            HistoryTrust::Missing => {
                return Err(Stop::Refuse(
                    ExitStatus::MissingHistory,
                    "no prior listings for this path pair".to_string(),
                ))
            }
            HistoryTrust::Poisoned { record } => {
                let reason = match record {
                    Some(r) => format!(
                        "history poisoned at {} by run {}: {}",
                        r.at.to_rfc3339(),
                        r.run_id.short(),
                        r.reason
                    ),
                    None => "history poisoned by an earlier run".to_string(),
                };
                return Err(Stop::LockedOut(reason));
            }
        }

        let h1 = self.store.load(Side::Path1, ListingKind::History).await?;
        let h2 = self.store.load(Side::Path2, ListingKind::History).await?;
        match (h1, h2) {
            (Some(h1), Some(h2)) => Ok((h1, h2)),
            _ => Err(Stop::Refuse(
                ExitStatus::MissingHistory,
                "a prior listing disappeared".to_string(),
            )),
        }
    }

    fn classify(
        &self,
        prior: &PathListing,
        current: &PathListing,
    ) -> Result<Vec<Change>, Stop> {
        self.classifier.classify(prior, current).map_err(|e| match e {
            BisyncError::EmptyListing(_) => Stop::Refuse(ExitStatus::EmptyListing, e.to_string()),
            other => Stop::from(other),
        })
    }

    fn backend(&self, side: Side) -> &Arc<dyn ITreeBackend> {
        match side {
            Side::Path1 => &self.path1,
            Side::Path2 => &self.path2,
        }
    }

    async fn list_side(&self, side: Side, filters: &FilterSet) -> Result<PathListing, BisyncError> {
        let records = self
            .backend(side)
            .list()
            .await
            .map_err(|e| BisyncError::backend(side, "list", e))?;
        let listing = PathListing::new(side, Utc::now(), records)?;
        let filtered = filters.apply(&listing);
        debug!(
            side = %side,
            listed = listing.len(),
            kept = filtered.len(),
            "Side listed"
        );
        Ok(filtered)
    }

    /// Lists both sides concurrently; snapshots are kept unless `ephemeral`
    async fn list_both(
        &self,
        filters: &FilterSet,
        ephemeral: bool,
    ) -> Result<(PathListing, PathListing), Stop> {
        let (l1, l2) = tokio::join!(
            self.list_side(Side::Path1, filters),
            self.list_side(Side::Path2, filters)
        );
        let (l1, l2) = (l1?, l2?);

        if !ephemeral {
            self.store
                .save(&l1, ListingKind::Working)
                .await
                .map_err(Stop::Fail)?;
            self.store
                .save(&l2, ListingKind::Working)
                .await
                .map_err(Stop::Fail)?;
        }
        Ok((l1, l2))
    }

    async fn remove_empty_dirs(&self) -> usize {
        let mut removed = 0;
        for side in Side::BOTH {
            match self.backend(side).remove_empty_dirs().await {
                Ok(n) => removed += n,
                Err(e) => warn!(side = %side, error = %e, "Failed to remove empty directories"),
            }
        }
        removed
    }
}

/// Every path a mutating action may have changed, on either side
fn touched_paths(plan: &ActionPlan) -> HashSet<RelPath> {
    let mut touched = HashSet::new();
    for action in plan.mutating() {
        touched.insert(action.path().clone());
        if let Some(conflict) = action.conflict_record() {
            for side in Side::BOTH {
                if let Some(name) = conflict.renamed(side) {
                    touched.insert(name.clone());
                }
            }
        }
    }
    touched
}

/// The listing to commit for one side
///
/// Paths the plan touched take their post-propagation record. Everything
/// else keeps the record the plan was built from, so an edit made while the
/// run was in progress still shows up as a change next time.
fn settle(before: &PathListing, after: &PathListing, touched: &HashSet<RelPath>) -> PathListing {
    let untouched = before
        .records()
        .filter(|r| !touched.contains(r.path()))
        .cloned();
    let updated = after
        .records()
        .filter(|r| touched.contains(r.path()))
        .cloned();
    PathListing::new(after.side(), after.timestamp(), untouched.chain(updated))
        .unwrap_or_else(|_| after.clone())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use bisync_core::domain::{Action, ActionKind, ChangeKind, FileRecord};

    use super::*;

    fn rel(p: &str) -> RelPath {
        RelPath::new(p).unwrap()
    }

    fn rec(p: &str, secs: i64) -> FileRecord {
        FileRecord::new(rel(p), 1, Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap())
    }

    fn listing(records: Vec<FileRecord>) -> PathListing {
        PathListing::new(Side::Path1, Utc::now(), records).unwrap()
    }

    #[test]
    fn test_touched_paths_ignores_noops() {
        let plan = ActionPlan::new(vec![
            Action::new(ActionKind::NoOp, rel("same"), Side::Path1, None, None),
            Action::new(ActionKind::CopyToOther, rel("new"), Side::Path2, None, Some(ChangeKind::New)),
        ]);
        let touched = touched_paths(&plan);
        assert_eq!(touched.len(), 1);
        assert!(touched.contains(&rel("new")));
    }

    #[test]
    fn test_settle_keeps_untouched_records_from_before() {
        let before = listing(vec![rec("edited-during-run", 0), rec("copied", 0)]);
        let after = listing(vec![
            rec("edited-during-run", 500),
            rec("copied", 42),
            rec("appeared-during-run", 0),
        ]);
        let touched: HashSet<RelPath> = [rel("copied")].into_iter().collect();

        let settled = settle(&before, &after, &touched);
        assert_eq!(settled.len(), 2);
        assert_eq!(
            settled.get(&rel("edited-during-run")).unwrap().modified(),
            rec("edited-during-run", 0).modified()
        );
        assert_eq!(
            settled.get(&rel("copied")).unwrap().modified(),
            rec("copied", 42).modified()
        );
        assert!(!settled.contains(&rel("appeared-during-run")));
    }

    #[test]
    fn test_settle_drops_deleted_touched_paths() {
        let before = listing(vec![rec("removed", 0)]);
        let after = listing(vec![]);
        let touched: HashSet<RelPath> = [rel("removed")].into_iter().collect();
        assert!(settle(&before, &after, &touched).is_empty());
    }
}
