//! Local targets: git history, plain directories and missing paths.

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use common::ScratchRepo;
use testpulse_core::extract::coverage::LINE_PCT;
use testpulse_core::source::LocalSource;
use testpulse_core::{
    open_source, Analyzer, AnalyzerConfig, ExtractorRegistry, PulseError, RateLimitState,
    RevisionSource, RevisionTree, SourceError, TargetDescriptor,
};

fn three_commit_repo() -> (ScratchRepo, Vec<String>) {
    let repo = ScratchRepo::init();
    repo.write("src/app.py", "def run():\n    return 1\n");
    let c1 = repo.commit("initial", "2022-01-15T10:00:00 +0000");
    repo.write("src/app.py", "def run():\n    return 2\n")
        .write("tests/test_app.py", "def test_run():\n    assert True\n");
    let c2 = repo.commit("add tests", "2022-06-01T10:00:00 +0000");
    repo.write("README.md", "# app\n");
    let c3 = repo.commit("docs", "2023-03-10T10:00:00 +0000");
    (repo, vec![c1, c2, c3])
}

#[tokio::test]
async fn history_is_chronological_with_branch() {
    let (repo, shas) = three_commit_repo();
    let source = LocalSource::open(repo.path(), None).await.unwrap();
    assert!(source.has_history());

    let revisions = source.revisions().await.unwrap();
    let ids: Vec<&str> = revisions.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, shas.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(
        revisions[0].timestamp,
        Utc.with_ymd_and_hms(2022, 1, 15, 10, 0, 0).unwrap()
    );
    assert!(revisions.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert!(revisions.iter().all(|r| r.branch.as_deref() == Some("main")));
}

#[tokio::test]
async fn trees_read_content_at_each_revision() {
    let (repo, _) = three_commit_repo();
    let source = LocalSource::open(repo.path(), None).await.unwrap();
    let revisions = source.revisions().await.unwrap();

    let first = source.tree(&revisions[0], None);
    assert_eq!(first.list_files().await.unwrap(), vec!["src/app.py"]);
    assert_eq!(
        first.read_to_string("src/app.py").await.unwrap().as_deref(),
        Some("def run():\n    return 1\n")
    );
    assert_eq!(first.read_to_string("tests/test_app.py").await.unwrap(), None);

    let second = source.tree(&revisions[1], Some(&revisions[0]));
    let changes = second.diff_stats().await.unwrap().unwrap();
    let app = changes.iter().find(|c| c.path == "src/app.py").unwrap();
    assert_eq!((app.added, app.deleted), (1, 1));
    let test = changes.iter().find(|c| c.path == "tests/test_app.py").unwrap();
    assert_eq!((test.added, test.deleted), (2, 0));

    // Later commits do not leak into earlier trees.
    let third = source.tree(&revisions[2], Some(&revisions[1]));
    assert!(third.list_files().await.unwrap().contains(&"README.md".to_string()));
    assert!(!first.list_files().await.unwrap().contains(&"README.md".to_string()));
}

#[tokio::test]
async fn diff_spans_every_commit_since_the_previous_tree() {
    let (repo, _) = three_commit_repo();
    let source = LocalSource::open(repo.path(), None).await.unwrap();
    let revisions = source.revisions().await.unwrap();

    // Comparing the third commit with the first includes the second one's edits.
    let thinned = source.tree(&revisions[2], Some(&revisions[0]));
    let mut paths: Vec<String> = thinned
        .diff_stats()
        .await
        .unwrap()
        .unwrap()
        .into_iter()
        .map(|c| c.path)
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["README.md", "src/app.py", "tests/test_app.py"]);

    let adjacent = source.tree(&revisions[2], None);
    let changes = adjacent.diff_stats().await.unwrap().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].path, "README.md");
}

#[tokio::test]
async fn identical_files_are_fetched_once_per_tree() {
    let repo = ScratchRepo::init();
    let body = "def shared():\n    return 1\n";
    repo.write("a/shared.py", body).write("b/shared.py", body);
    repo.commit("twins", "2022-01-15T10:00:00 +0000");
    let source = LocalSource::open(repo.path(), None).await.unwrap();
    let revisions = source.revisions().await.unwrap();
    let tree = source.tree(&revisions[0], None);
    assert_eq!(tree.read_to_string("a/shared.py").await.unwrap().as_deref(), Some(body));

    // Both paths name one blob; the second read never reaches git.
    std::fs::remove_dir_all(repo.path().join(".git")).unwrap();
    assert_eq!(tree.read_to_string("b/shared.py").await.unwrap().as_deref(), Some(body));
}

#[tokio::test]
async fn first_added_tracks_history() {
    let (repo, _) = three_commit_repo();
    let source = LocalSource::open(repo.path(), None).await.unwrap();
    let revisions = source.revisions().await.unwrap();
    let added = source.tree(&revisions[2], None).first_added().await.unwrap().unwrap();
    assert_eq!(
        added["src/app.py"],
        Utc.with_ymd_and_hms(2022, 1, 15, 10, 0, 0).unwrap()
    );
    assert_eq!(
        added["tests/test_app.py"],
        Utc.with_ymd_and_hms(2022, 6, 1, 10, 0, 0).unwrap()
    );
}

fn monorepo() -> ScratchRepo {
    let repo = ScratchRepo::init();
    repo.write("README.md", "# mono\n")
        .write("other/lib.py", "def other():\n    return 0\n")
        .write("pkg/app.py", "def run():\n    return 1\n")
        .write("pkg/tests/test_app.py", "def test_run():\n    assert True\n")
        .write("pkg/lcov.info", "TN:\nSF:app.py\nLH:3\nLF:4\nend_of_record\n");
    repo.commit("initial", "2022-01-15T10:00:00 +0000");
    repo.write("pkg/app.py", "def run():\n    return 2\n")
        .write("other/lib.py", "def other():\n    return 1\n");
    repo.commit("touch both", "2022-06-01T10:00:00 +0000");
    repo
}

#[tokio::test]
async fn subdirectory_target_is_scoped_to_that_directory() {
    let repo = monorepo();
    let source = LocalSource::open(&repo.path().join("pkg"), None).await.unwrap();
    assert!(source.has_history());
    let revisions = source.revisions().await.unwrap();
    assert_eq!(revisions.len(), 2);

    let tree = source.tree(&revisions[1], Some(&revisions[0]));
    assert_eq!(
        tree.list_files().await.unwrap(),
        vec!["app.py", "lcov.info", "tests/test_app.py"]
    );
    assert_eq!(
        tree.read_to_string("app.py").await.unwrap().as_deref(),
        Some("def run():\n    return 2\n")
    );
    assert_eq!(tree.read_to_string("README.md").await.unwrap(), None);

    // Edits outside the directory do not count as churn.
    let changes = tree.diff_stats().await.unwrap().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].path, "app.py");
    assert_eq!((changes[0].added, changes[0].deleted), (1, 1));

    let added = tree.first_added().await.unwrap().unwrap();
    assert!(added.contains_key("tests/test_app.py"));
    assert!(!added.contains_key("other/lib.py"));
}

#[tokio::test]
async fn subdirectory_run_extracts_without_failures() {
    let repo = monorepo();
    let analyzer = Analyzer::new(ExtractorRegistry::standard(), AnalyzerConfig::default()).unwrap();
    let target = TargetDescriptor::Local {
        path: repo.path().join("pkg"),
    };
    let report = analyzer.run(&target).await.unwrap();

    assert_eq!(report.summary.revisions_analyzed, 2);
    assert_eq!(report.summary.failures().count(), 0);
    assert_eq!(report.buckets[0].numeric(LINE_PCT), Some(75.0));
}

#[tokio::test]
async fn since_filters_older_revisions() {
    let (repo, shas) = three_commit_repo();
    let since = Utc.with_ymd_and_hms(2022, 3, 1, 0, 0, 0).unwrap();
    let source = LocalSource::open(repo.path(), Some(since)).await.unwrap();
    let revisions = source.revisions().await.unwrap();
    assert_eq!(revisions.len(), 2);
    assert_eq!(revisions[0].id, shas[1]);
}

#[tokio::test]
async fn plain_directory_snapshot_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("lib.rs"), "pub fn f() {}\n").unwrap();

    let a = LocalSource::open(dir.path(), None).await.unwrap();
    let b = LocalSource::open(dir.path(), None).await.unwrap();
    let (ra, rb) = (a.revisions().await.unwrap(), b.revisions().await.unwrap());
    assert_eq!(ra.len(), 1);
    assert_eq!(ra[0].id, rb[0].id);
    assert!(ra[0].branch.is_none());

    std::fs::write(dir.path().join("extra.rs"), "\n").unwrap();
    let c = LocalSource::open(dir.path(), None).await.unwrap();
    assert_ne!(c.revisions().await.unwrap()[0].id, ra[0].id);
}

#[tokio::test]
async fn nonexistent_path_is_target_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let target = TargetDescriptor::parse(
        dir.path().join("missing").to_str().unwrap(),
        None,
        None,
    )
    .unwrap();
    let limiter = Arc::new(RateLimitState::new());
    let err = open_source(&target, &AnalyzerConfig::default(), limiter.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SourceError::TargetNotFound(_)));
    // Local targets never touch the network.
    assert_eq!(limiter.retries(), 0);
    assert_eq!(limiter.remaining(), None);
}

#[test]
fn branch_with_local_target_is_rejected() {
    let err = TargetDescriptor::parse("./project", Some("develop".into()), None).unwrap_err();
    assert!(matches!(err, PulseError::InvalidConfig(_)));
}
