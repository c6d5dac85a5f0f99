//! Critical failures, cancellation and integrity mismatches, and how each affects history

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use bisync_core::config::Config;
use bisync_core::domain::{ExitStatus, HistoryTrust, RelPath, RunState, Side};
use bisync_engine::history::ListingKind;
use bisync_engine::{BisyncError, LocalTreeAdapter, RunCoordinator};

use crate::common::{
    exists, tree, write_new, write_old, CancellingBackend, FailOn, FailingBackend, Fixture,
};

fn failing_path2(fx: &Fixture, op: FailOn, path: Option<&str>) -> RunCoordinator {
    failing_path2_with(fx, fx.builder().build(), op, path)
}

fn failing_path2_with(
    fx: &Fixture,
    config: Config,
    op: FailOn,
    path: Option<&str>,
) -> RunCoordinator {
    RunCoordinator::new(
        config,
        Arc::new(LocalTreeAdapter::new(fx.path1.path())),
        Arc::new(FailingBackend::new(fx.path2.path(), op, path)),
    )
    .unwrap()
}

#[tokio::test]
async fn test_propagation_failure_locks_out_until_resync() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");
    fx.resync().await;
    write_new(fx.path1.path(), "good.txt", "copied fine");
    write_new(fx.path1.path(), "bad.txt", "never lands");

    let failing = failing_path2(&fx, FailOn::Write, Some("bad.txt"));
    let report = failing.run().await.unwrap();

    assert_eq!(report.status, ExitStatus::CriticalLockout);
    assert_eq!(report.status.exit_code(), 2);
    assert_eq!(report.final_state, RunState::LockedOut);
    let propagation = report.propagation.as_ref().unwrap();
    assert_eq!(propagation.failures.len(), 1);
    assert_eq!(propagation.failures[0].path.as_str(), "bad.txt");
    assert!(exists(fx.path2.path(), "good.txt"));

    match failing.status().await.unwrap() {
        HistoryTrust::Poisoned { record: Some(record) } => {
            assert_eq!(record.run_id, report.run_id);
            assert!(record.reason.contains("propagation did not complete"));
        }
        other => panic!("expected poisoned history, got {other:?}"),
    }
    let store = failing.store();
    assert!(store.exists(Side::Path1, ListingKind::Poisoned).await.unwrap());
    assert!(!store.exists(Side::Path1, ListingKind::History).await.unwrap());

    // A healthy backend does not lift the lockout on its own
    let sticky = fx.sync().await;
    assert_eq!(sticky.status, ExitStatus::CriticalLockout);
    assert!(sticky.message.unwrap().contains("history poisoned"));
    assert!(!exists(fx.path2.path(), "bad.txt"));

    let recovered = fx.resync().await;
    assert_eq!(recovered.status, ExitStatus::Success);
    assert!(exists(fx.path2.path(), "bad.txt"));
    assert_eq!(failing.status().await.unwrap(), HistoryTrust::Trusted);

    let after = fx.sync().await;
    assert_eq!(after.status, ExitStatus::Success);
    assert_eq!(after.summary.mutating(), 0);
}

#[tokio::test]
async fn test_listing_failure_is_critical() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");
    fx.resync().await;

    let report = failing_path2(&fx, FailOn::List, None).run().await.unwrap();

    assert_eq!(report.status, ExitStatus::CriticalLockout);
    assert!(report.message.unwrap().contains("path2 backend failed to list"));
}

#[tokio::test]
async fn test_failed_conflict_rename_is_critical() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "doc.txt", "base");
    fx.resync().await;
    write_new(fx.path1.path(), "doc.txt", "left edit");
    write_new(fx.path2.path(), "doc.txt", "right edit, longer");

    let report = failing_path2(&fx, FailOn::Rename, Some("doc.txt"))
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, ExitStatus::CriticalLockout);
    // The path2 version is untouched where the rename failed
    assert_eq!(
        std::fs::read_to_string(fx.path2.path().join("doc.txt")).unwrap(),
        "right edit, longer"
    );
}

#[tokio::test]
async fn test_corrupt_history_is_critical() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");
    fx.resync().await;

    let coordinator = fx.coordinator(fx.builder().build());
    let history = coordinator
        .store()
        .listing_path(Side::Path2, ListingKind::History);
    std::fs::write(&history, "not a listing\n").unwrap();

    let report = coordinator.run().await.unwrap();

    assert_eq!(report.status, ExitStatus::CriticalLockout);
    assert!(coordinator.status().await.unwrap().is_poisoned());

    let recovered = fx.resync().await;
    assert_eq!(recovered.status, ExitStatus::Success);
}

#[tokio::test]
async fn test_refusals_leave_history_trusted() {
    let fx = Fixture::new();
    for name in ["a.txt", "b.txt", "c.txt"] {
        write_old(fx.path1.path(), name, name);
    }
    fx.resync().await;
    for name in ["a.txt", "b.txt"] {
        std::fs::remove_file(fx.path1.path().join(name)).unwrap();
    }

    let coordinator = fx.coordinator(fx.builder().build());
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.status, ExitStatus::AbortedMaxDelete);
    assert_eq!(coordinator.status().await.unwrap(), HistoryTrust::Trusted);
}

#[tokio::test]
async fn test_dry_run_listing_failure_leaves_history_trusted() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");
    fx.resync().await;

    let config = fx.builder().dry_run(true).build();
    let dry = failing_path2_with(&fx, config, FailOn::List, None);
    let report = dry.run().await.unwrap();

    assert_eq!(report.status, ExitStatus::CriticalLockout);
    assert_eq!(report.final_state, RunState::Idle);
    assert!(report.message.unwrap().contains("history left untouched"));
    assert_eq!(dry.status().await.unwrap(), HistoryTrust::Trusted);
    assert!(!dry.store().exists(Side::Path1, ListingKind::Poisoned).await.unwrap());

    let real = fx.sync().await;
    assert_eq!(real.status, ExitStatus::Success);
}

#[tokio::test]
async fn test_integrity_mismatch_keeps_prior_history() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");
    fx.resync().await;
    write_new(fx.path1.path(), "new.txt", "lost on the way");

    let lossy = failing_path2(&fx, FailOn::DropWrite, Some("new.txt"));
    let report = lossy.run().await.unwrap();

    assert_eq!(report.status, ExitStatus::IntegrityMismatch);
    assert_eq!(report.status.exit_code(), 1);
    assert_eq!(report.final_state, RunState::Idle);
    assert!(!report.verification.as_ref().unwrap().matched());
    assert!(!exists(fx.path2.path(), "new.txt"));
    assert_eq!(lossy.status().await.unwrap(), HistoryTrust::Trusted);

    let history1 = lossy
        .store()
        .load(Side::Path1, ListingKind::History)
        .await
        .unwrap()
        .unwrap();
    assert!(!history1.contains(&RelPath::new("new.txt").unwrap()));
    assert!(history1.contains(&RelPath::new("a.txt").unwrap()));

    // The next healthy run still sees the file as new
    let retry = fx.sync().await;
    assert_eq!(retry.status, ExitStatus::Success);
    assert_eq!(retry.summary.mutating(), 1);
    assert!(exists(fx.path2.path(), "new.txt"));
}

#[tokio::test]
async fn test_cancel_before_run_returns_error_and_keeps_history() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");
    fx.resync().await;
    write_new(fx.path1.path(), "b.txt", "b");

    let token = CancellationToken::new();
    token.cancel();
    let coordinator = fx
        .coordinator(fx.builder().build())
        .with_cancellation(token);
    let result = coordinator.run().await;

    assert!(matches!(result, Err(BisyncError::Cancelled)));
    assert_eq!(coordinator.status().await.unwrap(), HistoryTrust::Trusted);
    assert_eq!(tree(fx.path2.path()), vec!["a.txt"]);
}

#[tokio::test]
async fn test_cancel_during_propagation_locks_out() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");
    fx.resync().await;
    write_new(fx.path1.path(), "b.txt", "b");
    write_new(fx.path1.path(), "c.txt", "c");

    let token = CancellationToken::new();
    let coordinator = RunCoordinator::new(
        fx.builder().transfers(1).build(),
        Arc::new(LocalTreeAdapter::new(fx.path1.path())),
        Arc::new(CancellingBackend::new(fx.path2.path(), token.clone())),
    )
    .unwrap()
    .with_cancellation(token);
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.status, ExitStatus::CriticalLockout);
    assert_eq!(report.final_state, RunState::LockedOut);
    let propagation = report.propagation.as_ref().unwrap();
    assert!(propagation.cancelled);
    assert_eq!(propagation.succeeded, 1);
    assert_eq!(propagation.skipped, 1);
    assert!(report.message.unwrap().contains("cancelled"));
    assert!(coordinator.status().await.unwrap().is_poisoned());

    let recovered = fx.resync().await;
    assert_eq!(recovered.status, ExitStatus::Success);
    assert_eq!(tree(fx.path2.path()), vec!["a.txt", "b.txt", "c.txt"]);
}

#[tokio::test]
async fn test_lockout_is_reported_before_filters_are_read() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");
    fx.resync().await;
    write_new(fx.path1.path(), "bad.txt", "never lands");
    let failed = failing_path2(&fx, FailOn::Write, Some("bad.txt")).run().await.unwrap();
    assert_eq!(failed.status, ExitStatus::CriticalLockout);

    let missing_filters = fx.workdir.path().join("no-such-filters.txt");
    let report = fx
        .run(fx.builder().filters_file(missing_filters).build())
        .await;

    assert_eq!(report.status, ExitStatus::CriticalLockout);
    assert_eq!(report.final_state, RunState::LockedOut);
    assert!(report.message.unwrap().contains("history poisoned"));
}
