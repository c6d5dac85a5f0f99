//! Vetoes and the empty-listing guard

use bisync_core::domain::{ExitStatus, HistoryTrust, RunState};
use bisync_engine::safety::Veto;

use crate::common::{exists, tree, write_new, write_old, Fixture};

fn seed(fx: &Fixture, names: &[&str]) {
    for name in names {
        write_old(fx.path1.path(), name, name);
    }
}

#[tokio::test]
async fn test_max_delete_vetoes_then_force_overrides() {
    let fx = Fixture::new();
    seed(&fx, &["a.txt", "b.txt", "c.txt", "d.txt"]);
    fx.resync().await;
    for name in ["a.txt", "b.txt", "c.txt"] {
        std::fs::remove_file(fx.path1.path().join(name)).unwrap();
    }

    let vetoed = fx.sync().await;

    assert_eq!(vetoed.status, ExitStatus::AbortedMaxDelete);
    assert_eq!(vetoed.status.exit_code(), 1);
    assert_eq!(vetoed.final_state, RunState::Idle);
    assert!(matches!(
        vetoed.vetoes.as_slice(),
        [Veto::MaxDelete { deleted: 3, prior: 4, limit: 50, .. }]
    ));
    assert_eq!(tree(fx.path2.path()).len(), 4);

    let forced = fx.run(fx.builder().force(true).build()).await;

    assert_eq!(forced.status, ExitStatus::Success);
    assert_eq!(forced.summary.deletes_on_path2, 3);
    assert_eq!(tree(fx.path2.path()), vec!["d.txt"]);
}

#[tokio::test]
async fn test_deletions_at_the_limit_pass() {
    let fx = Fixture::new();
    seed(&fx, &["a.txt", "b.txt", "c.txt", "d.txt"]);
    fx.resync().await;
    for name in ["a.txt", "b.txt"] {
        std::fs::remove_file(fx.path2.path().join(name)).unwrap();
    }

    let report = fx.sync().await;

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.summary.deletes_on_path1, 2);
}

#[tokio::test]
async fn test_emptied_side_is_refused_without_poisoning() {
    let fx = Fixture::new();
    seed(&fx, &["a.txt", "b.txt"]);
    fx.resync().await;
    for name in ["a.txt", "b.txt"] {
        std::fs::remove_file(fx.path1.path().join(name)).unwrap();
    }

    let coordinator = fx.coordinator(fx.builder().force(true).build());
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.status, ExitStatus::EmptyListing);
    assert_eq!(tree(fx.path2.path()).len(), 2);
    assert_eq!(coordinator.status().await.unwrap(), HistoryTrust::Trusted);
}

#[tokio::test]
async fn test_check_access_requires_markers_on_both_sides() {
    let fx = Fixture::new();
    seed(&fx, &["BISYNC_CHECK", "docs/BISYNC_CHECK", "a.txt", "b.txt", "c.txt"]);
    fx.resync().await;

    let passing = fx.run(fx.builder().check_access(true).build()).await;
    assert_eq!(passing.status, ExitStatus::Success);

    std::fs::remove_file(fx.path2.path().join("docs/BISYNC_CHECK")).unwrap();
    let report = fx.run(fx.builder().check_access(true).build()).await;

    assert_eq!(report.status, ExitStatus::AbortedCheckAccess);
    assert!(matches!(report.vetoes.as_slice(), [Veto::CheckAccess { .. }]));
    assert!(exists(fx.path1.path(), "docs/BISYNC_CHECK"));
}

#[tokio::test]
async fn test_check_access_outranks_max_delete() {
    let fx = Fixture::new();
    seed(&fx, &["BISYNC_CHECK", "a.txt", "b.txt"]);
    fx.resync().await;
    for name in ["BISYNC_CHECK", "a.txt"] {
        std::fs::remove_file(fx.path2.path().join(name)).unwrap();
    }

    let report = fx.run(fx.builder().check_access(true).build()).await;

    assert_eq!(report.status, ExitStatus::AbortedCheckAccess);
    assert_eq!(report.vetoes.len(), 2);
}

#[tokio::test]
async fn test_changed_filters_require_resync() {
    let fx = Fixture::new();
    let filters = fx.workdir.path().join("filters.txt");
    std::fs::write(&filters, "- *.tmp\n").unwrap();
    seed(&fx, &["a.txt", "scratch.tmp"]);

    let resync = fx
        .run(fx.builder().filters_file(&filters).resync(true).build())
        .await;
    assert_eq!(resync.status, ExitStatus::Success);
    assert!(!exists(fx.path2.path(), "scratch.tmp"));

    let steady = fx.run(fx.builder().filters_file(&filters).build()).await;
    assert_eq!(steady.status, ExitStatus::Success);

    std::fs::write(&filters, "- *.tmp\n- *.bak\n").unwrap();
    write_new(fx.path1.path(), "b.txt", "b");
    let vetoed = fx.run(fx.builder().filters_file(&filters).build()).await;

    assert_eq!(vetoed.status, ExitStatus::AbortedFiltersChanged);
    assert!(matches!(vetoed.vetoes.as_slice(), [Veto::FiltersChanged]));
    assert!(!exists(fx.path2.path(), "b.txt"));

    let accepted = fx
        .run(fx.builder().filters_file(&filters).resync(true).build())
        .await;
    assert_eq!(accepted.status, ExitStatus::Success);
    assert!(exists(fx.path2.path(), "b.txt"));
}

#[tokio::test]
async fn test_filter_without_resync_is_vetoed() {
    let fx = Fixture::new();
    seed(&fx, &["a.txt"]);
    fx.resync().await;
    let filters = fx.workdir.path().join("filters.txt");
    std::fs::write(&filters, "- *.tmp\n").unwrap();

    let report = fx.run(fx.builder().filters_file(&filters).build()).await;

    assert_eq!(report.status, ExitStatus::AbortedFiltersChanged);
}
