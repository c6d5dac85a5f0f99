//! Resync, normal propagation, conflicts, dry runs and verify-only mode

use bisync_core::config::CheckSyncMode;
use bisync_core::domain::{ExitStatus, RunState, Side};
use bisync_engine::history::ListingKind;
use bisync_engine::BisyncError;

use crate::common::{exists, read, tree, write_new, write_old, Fixture};

#[tokio::test]
async fn test_resync_merges_both_trees() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "shared.txt", "from path1");
    write_old(fx.path1.path(), "docs/only1.md", "one");
    write_old(fx.path2.path(), "shared.txt", "from path2, longer");
    write_old(fx.path2.path(), "only2.txt", "two");

    let report = fx.resync().await;

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.final_state, RunState::Committed);
    assert!(report.resync);
    assert_eq!(tree(fx.path1.path()), tree(fx.path2.path()));
    assert_eq!(
        tree(fx.path1.path()),
        vec!["docs/only1.md", "only2.txt", "shared.txt"]
    );
    // path1 wins where both sides hold the same path
    assert_eq!(read(fx.path2.path(), "shared.txt").unwrap(), "from path1");

    let store = fx.coordinator(fx.builder().build()).store().clone();
    for side in Side::BOTH {
        assert!(store.exists(side, ListingKind::History).await.unwrap());
        assert!(!store.exists(side, ListingKind::Working).await.unwrap());
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_backslash_in_file_name_syncs() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "x\\y.txt", "not a directory");

    let report = fx.resync().await;

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(tree(fx.path2.path()), vec!["x\\y.txt"]);
    assert_eq!(read(fx.path2.path(), "x\\y.txt").unwrap(), "not a directory");

    let again = fx.sync().await;
    assert_eq!(again.status, ExitStatus::Success);
    assert_eq!(again.summary.mutating(), 0);
}

#[tokio::test]
async fn test_second_run_after_resync_is_noop() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");
    write_old(fx.path2.path(), "b.txt", "b");
    fx.resync().await;

    let report = fx.sync().await;

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.summary.mutating(), 0);
    assert!(report.plan.is_noop());
    assert!(report.verification.as_ref().unwrap().matched());
}

#[tokio::test]
async fn test_changes_propagate_in_both_directions() {
    let fx = Fixture::new();
    for name in ["keep.txt", "edit.txt", "remove.txt", "other.txt"] {
        write_old(fx.path1.path(), name, name);
    }
    fx.resync().await;

    write_new(fx.path1.path(), "edit.txt", "edited on path1");
    std::fs::remove_file(fx.path1.path().join("remove.txt")).unwrap();
    write_new(fx.path2.path(), "sub/new.txt", "created on path2");

    let report = fx.sync().await;

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.summary.copies_to_path1, 1);
    assert_eq!(report.summary.copies_to_path2, 1);
    assert_eq!(report.summary.deletes_on_path2, 1);
    assert_eq!(
        read(fx.path2.path(), "edit.txt").unwrap(),
        "edited on path1"
    );
    assert!(!exists(fx.path2.path(), "remove.txt"));
    assert_eq!(
        read(fx.path1.path(), "sub/new.txt").unwrap(),
        "created on path2"
    );
    assert_eq!(tree(fx.path1.path()), tree(fx.path2.path()));

    let again = fx.sync().await;
    assert_eq!(again.status, ExitStatus::Success);
    assert_eq!(again.summary.mutating(), 0);
}

#[tokio::test]
async fn test_deleted_on_one_side_changed_on_other_keeps_changed() {
    let fx = Fixture::new();
    for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
        write_old(fx.path1.path(), name, name);
    }
    fx.resync().await;

    std::fs::remove_file(fx.path1.path().join("a.txt")).unwrap();
    write_new(fx.path2.path(), "a.txt", "still wanted");

    let report = fx.sync().await;

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.summary.conflicts, 1);
    assert_eq!(read(fx.path1.path(), "a.txt").unwrap(), "still wanted");
    assert_eq!(read(fx.path2.path(), "a.txt").unwrap(), "still wanted");
}

#[tokio::test]
async fn test_conflict_keeps_both_versions_byte_for_byte() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "report.txt", "original");
    write_old(fx.path1.path(), "other.txt", "other");
    fx.resync().await;

    write_new(fx.path1.path(), "report.txt", "path1 rewrite");
    write_new(fx.path2.path(), "report.txt", "a different path2 rewrite");

    let report = fx.sync().await;

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.summary.conflicts, 1);
    for root in [fx.path1.path(), fx.path2.path()] {
        assert!(!exists(root, "report.txt"));
        assert_eq!(read(root, "report.txt..path1").unwrap(), "path1 rewrite");
        assert_eq!(
            read(root, "report.txt..path2").unwrap(),
            "a different path2 rewrite"
        );
    }

    let again = fx.sync().await;
    assert_eq!(again.summary.mutating(), 0);
}

#[tokio::test]
async fn test_identical_edits_on_both_sides_do_not_conflict() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "same.txt", "before");
    fx.resync().await;

    write_new(fx.path1.path(), "same.txt", "after");
    write_new(fx.path2.path(), "same.txt", "after");

    let report = fx.sync().await;

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.summary.conflicts, 0);
    assert_eq!(tree(fx.path1.path()), vec!["same.txt"]);
}

#[tokio::test]
async fn test_dry_run_mutates_nothing() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");
    fx.resync().await;
    write_new(fx.path1.path(), "planned.txt", "not yet");

    let report = fx.run(fx.builder().dry_run(true).build()).await;

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.final_state, RunState::Idle);
    assert_eq!(report.summary.copies_to_path2, 1);
    assert_eq!(
        report.message.as_deref(),
        Some("dry run: 1 change(s) planned")
    );
    assert!(!exists(fx.path2.path(), "planned.txt"));

    // History was not advanced, so a real run still sees the new file
    let real = fx.sync().await;
    assert_eq!(real.summary.copies_to_path2, 1);
    assert!(exists(fx.path2.path(), "planned.txt"));
}

#[tokio::test]
async fn test_first_normal_run_reports_missing_history() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");

    let report = fx.sync().await;

    assert_eq!(report.status, ExitStatus::MissingHistory);
    assert_eq!(report.status.exit_code(), 1);
    assert!(report.recovery_hint().is_some());
    assert!(!exists(fx.path2.path(), "a.txt"));
}

#[tokio::test]
async fn test_verify_only_compares_stored_listings() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");
    fx.resync().await;
    write_new(fx.path1.path(), "unsynced.txt", "ignored by verify-only");

    let report = fx
        .run(fx.builder().check_sync(CheckSyncMode::Only).build())
        .await;

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.final_state, RunState::Idle);
    assert!(report.verification.unwrap().matched());
    assert!(!exists(fx.path2.path(), "unsynced.txt"));
}

#[tokio::test]
async fn test_check_sync_disabled_skips_verification() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");

    let report = fx
        .run(
            fx.builder()
                .resync(true)
                .check_sync(CheckSyncMode::Disabled)
                .build(),
        )
        .await;

    assert_eq!(report.status, ExitStatus::Success);
    assert!(report.verification.is_none());
}

#[tokio::test]
async fn test_empty_dirs_removed_when_enabled() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "keep.txt", "k");
    write_old(fx.path1.path(), "folder/a.txt", "a");
    write_old(fx.path1.path(), "folder/b.txt", "b");
    write_old(fx.path1.path(), "x.txt", "x");
    write_old(fx.path1.path(), "y.txt", "y");
    fx.resync().await;

    std::fs::remove_file(fx.path1.path().join("folder/a.txt")).unwrap();
    std::fs::remove_file(fx.path1.path().join("folder/b.txt")).unwrap();
    std::fs::remove_dir(fx.path1.path().join("folder")).unwrap();

    let report = fx.run(fx.builder().remove_empty_dirs(true).build()).await;

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.removed_dirs, 1);
    assert!(!fx.path2.path().join("folder").exists());
}

#[tokio::test]
async fn test_retained_working_listings() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");

    let config = fx
        .builder()
        .resync(true)
        .retain_working_files(true)
        .build();
    let coordinator = fx.coordinator(config);
    coordinator.run().await.unwrap();

    for side in Side::BOTH {
        assert!(coordinator
            .store()
            .exists(side, ListingKind::Working)
            .await
            .unwrap());
    }
}

#[tokio::test]
async fn test_concurrent_run_is_refused() {
    let fx = Fixture::new();
    write_old(fx.path1.path(), "a.txt", "a");
    let coordinator = fx.coordinator(fx.builder().resync(true).build());
    std::fs::write(coordinator.store().lock_path(), "someone else").unwrap();

    let result = coordinator.run().await;

    assert!(matches!(result, Err(BisyncError::AlreadyRunning(_))));
    assert!(!exists(fx.path2.path(), "a.txt"));
}

#[tokio::test]
async fn test_invalid_config_rejected_at_construction() {
    let fx = Fixture::new();
    let config = fx.builder().transfers(0).build();

    let result = bisync_engine::RunCoordinator::new(
        config,
        std::sync::Arc::new(bisync_engine::LocalTreeAdapter::new(fx.path1.path())),
        std::sync::Arc::new(bisync_engine::LocalTreeAdapter::new(fx.path2.path())),
    );

    assert!(matches!(result, Err(BisyncError::InvalidConfig(_))));
}
