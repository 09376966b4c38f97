//! End-to-end orchestrator tests against in-process registries

use crate::common::{FakeRegistry, Harness, REGISTRY};
use skill_observatory::crawler::{manifest_path, read_manifest, FsContentSink};
use skill_observatory::store::CrawlStore;
use skill_observatory::{content_hash, CrawlMode, ObservatoryError, RunStatus};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_raising_item_does_not_abort_run() {
    let harness = Harness::new();
    let source = Arc::new(FakeRegistry::new(10).raising("skill-004"));
    let crawler = harness.crawler(source.clone(), 1, CrawlMode::Incremental);

    let stats = crawler.crawl().await.unwrap();

    assert_eq!(stats.discovered, 10);
    assert_eq!(stats.downloaded, 9);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.skipped, 0);
    assert_eq!(source.downloads.load(Ordering::SeqCst), 10);

    let mut store = harness.store.lock().unwrap();
    let runs = store.recent_runs(Some(REGISTRY), 5).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].stats, stats);
    assert!(runs[0].finished_at.is_some());
    assert!(runs[0].error.is_none());

    // Registered but never fetched
    let failed = store.get_item(REGISTRY, "skill-004").unwrap().unwrap();
    assert!(failed.content_hash.is_none());
    assert_eq!(failed.name.as_deref(), Some("SKILL-004"));
}

#[tokio::test]
async fn test_discovery_failure_is_recorded_in_ledger() {
    let harness = Harness::new();
    let source = Arc::new(FakeRegistry::new(3).failing_discovery());
    let crawler = harness.crawler(source.clone(), 1, CrawlMode::Full);

    let err = crawler.crawl().await.unwrap_err();

    assert!(matches!(err, ObservatoryError::Discovery { .. }));
    assert_eq!(source.downloads.load(Ordering::SeqCst), 0);

    let mut store = harness.store.lock().unwrap();
    let runs = store.recent_runs(Some(REGISTRY), 5).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].mode, CrawlMode::Full);
    assert!(runs[0].finished_at.is_some());
    assert!(runs[0]
        .error
        .as_deref()
        .unwrap()
        .contains("registry index unavailable"));
    assert_eq!(store.count_items(REGISTRY).unwrap().active, 0);
}

#[tokio::test]
async fn test_manifest_lists_only_changed_items() {
    let harness = Harness::new();
    let source = Arc::new(FakeRegistry::new(5));
    let manifest = manifest_path(&harness.manifest_dir(), REGISTRY);

    let first = harness
        .crawler(source.clone(), 1, CrawlMode::Incremental)
        .crawl()
        .await
        .unwrap();
    assert_eq!(first.changed, 5);
    let mut listed = read_manifest(&manifest).unwrap();
    listed.sort();
    assert_eq!(listed, source.slugs());

    // Same content again: nothing changed, so no manifest
    let second = harness
        .crawler(source.clone(), 1, CrawlMode::Incremental)
        .crawl()
        .await
        .unwrap();
    assert_eq!(second.skipped, 5);
    assert_eq!(second.changed, 0);
    assert!(!manifest.exists());

    source.bump_version();
    let third = harness
        .crawler(source.clone(), 1, CrawlMode::Incremental)
        .crawl()
        .await
        .unwrap();
    assert_eq!(third.changed, 5);
    assert_eq!(read_manifest(&manifest).unwrap().len(), 5);
}

#[tokio::test]
async fn test_content_is_written_per_registry() {
    let harness = Harness::new();
    let source = Arc::new(FakeRegistry::with_slugs(vec![
        "owner/tool".to_string(),
        "owner:tool".to_string(),
        "owner_tool".to_string(),
        "plain".to_string(),
    ]));

    harness
        .crawler(source.clone(), 1, CrawlMode::Full)
        .crawl()
        .await
        .unwrap();

    let registry_dir = harness.content_dir().join(REGISTRY);
    let nested = std::fs::read_to_string(registry_dir.join("owner%2Ftool.md")).unwrap();
    assert_eq!(nested, source.content_of("owner/tool"));
    for slug in ["owner:tool", "owner_tool"] {
        let path = FsContentSink::new(harness.content_dir()).path_for(REGISTRY, slug);
        assert_eq!(std::fs::read_to_string(path).unwrap(), source.content_of(slug));
    }
    assert!(registry_dir.join("plain.md").exists());
}

#[tokio::test]
async fn test_concurrent_counters_add_up() {
    let harness = Harness::new();
    let source = Arc::new(
        FakeRegistry::new(40)
            .raising("skill-003")
            .raising("skill-017")
            .raising("skill-031")
            .slow(Duration::from_millis(10)),
    );
    let crawler = harness.crawler(source.clone(), 8, CrawlMode::Incremental);

    let stats = crawler.crawl().await.unwrap();

    assert_eq!(stats.discovered, 40);
    assert_eq!(stats.downloaded, 37);
    assert_eq!(stats.failed, 3);
    assert_eq!(
        stats.downloaded + stats.skipped + stats.failed,
        stats.discovered
    );
    assert_eq!(source.downloads.load(Ordering::SeqCst), 40);

    let max_in_flight = source.max_in_flight.load(Ordering::SeqCst);
    assert!(max_in_flight <= 8, "{} downloads overlapped", max_in_flight);
    assert!(max_in_flight > 1);

    let counts = harness.store.lock().unwrap().count_items(REGISTRY).unwrap();
    assert_eq!(counts.active, 40);
    assert_eq!(counts.pending, 3);
}

#[tokio::test]
async fn test_incremental_rerun_skips_unchanged_content() {
    let harness = Harness::new();
    let source = Arc::new(FakeRegistry::new(4));
    let crawler = harness.crawler(source.clone(), 2, CrawlMode::Incremental);

    crawler.crawl().await.unwrap();

    let current = content_hash(source.content_of("skill-001"));
    assert!(!crawler.is_content_changed("skill-001", &current).await.unwrap());
    assert!(crawler.is_content_changed("skill-001", "deadbeef").await.unwrap());
    assert!(crawler.is_content_changed("never-seen", &current).await.unwrap());

    let rerun = crawler.crawl().await.unwrap();
    assert_eq!(rerun.discovered, 4);
    assert_eq!(rerun.skipped, 4);
    assert_eq!(rerun.downloaded, 0);

    let runs = harness
        .store
        .lock()
        .unwrap()
        .recent_runs(Some(REGISTRY), 10)
        .unwrap();
    assert_eq!(runs.len(), 2);
    assert_ne!(runs[0].id, runs[1].id);
}

#[tokio::test]
async fn test_resume_fetches_only_pending_items() {
    let harness = Harness::new();
    let flaky = Arc::new(
        FakeRegistry::new(6)
            .raising("skill-001")
            .raising("skill-005"),
    );
    let first = harness
        .crawler(flaky, 1, CrawlMode::Incremental)
        .crawl()
        .await
        .unwrap();
    assert_eq!(first.failed, 2);

    let healthy = Arc::new(FakeRegistry::new(6));
    let resumed = harness
        .crawler(healthy.clone(), 1, CrawlMode::Incremental)
        .resume()
        .await
        .unwrap();

    assert_eq!(resumed.discovered, 2);
    assert_eq!(resumed.downloaded, 2);
    assert_eq!(healthy.downloads.load(Ordering::SeqCst), 2);

    let mut store = harness.store.lock().unwrap();
    assert!(store.pending_items(REGISTRY).unwrap().is_empty());
    assert_eq!(store.recent_runs(Some(REGISTRY), 10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_full_crawl_soft_deletes_and_reactivates() {
    let harness = Harness::new();
    let all = Arc::new(FakeRegistry::new(3));
    harness
        .crawler(all.clone(), 1, CrawlMode::Full)
        .crawl()
        .await
        .unwrap();

    let fewer = Arc::new(FakeRegistry::with_slugs(vec![
        "skill-000".to_string(),
        "skill-001".to_string(),
    ]));
    harness
        .crawler(fewer, 1, CrawlMode::Full)
        .crawl()
        .await
        .unwrap();
    {
        let mut store = harness.store.lock().unwrap();
        assert!(store.get_item(REGISTRY, "skill-002").unwrap().unwrap().deleted);
        assert_eq!(store.count_items(REGISTRY).unwrap().deleted, 1);
    }

    harness
        .crawler(all, 1, CrawlMode::Full)
        .crawl()
        .await
        .unwrap();
    let mut store = harness.store.lock().unwrap();
    assert!(!store.get_item(REGISTRY, "skill-002").unwrap().unwrap().deleted);
    assert_eq!(store.count_items(REGISTRY).unwrap().deleted, 0);
}
