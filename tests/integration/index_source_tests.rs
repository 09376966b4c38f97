//! HTTP index registry tests
//!
//! These tests use wiremock to serve a registry index and its content
//! documents, and run the source through the orchestrator.

use crate::common::{Harness, REGISTRY};
use skill_observatory::config::UserAgentConfig;
use skill_observatory::crawler::{build_http_client, fetch_url, FetchResult, HttpIndexSource};
use skill_observatory::store::CrawlStore;
use skill_observatory::CrawlMode;
use std::sync::Arc;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_source(server: &MockServer) -> HttpIndexSource {
    let client = build_http_client(&UserAgentConfig {
        crawler_name: "TestObservatory".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    })
    .expect("Failed to build client");

    HttpIndexSource::new(client, format!("{}/index.json", server.uri()))
        .with_content_url_template(format!("{}/raw/{{slug}}/SKILL.md", server.uri()))
}

async fn mount_index(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Serves the index once, so a later mock can replace it
async fn mount_index_once(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

async fn mount_content(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/raw/[^/]+/SKILL\.md$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("# Skill\n\nDoes things."))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_crawl_downloads_every_item() {
    let server = MockServer::start().await;
    mount_index(
        &server,
        r#"{"items": [{"slug": "alpha", "name": "Alpha"}, {"slug": "bravo", "stars": 12}]}"#,
    )
    .await;
    mount_content(&server).await;

    let harness = Harness::new();
    let crawler = harness.crawler(Arc::new(test_source(&server)), 2, CrawlMode::Full);
    let stats = crawler.crawl().await.unwrap();

    assert_eq!(stats.discovered, 2);
    assert_eq!(stats.downloaded, 2);

    let mut store = harness.store.lock().unwrap();
    let bravo = store.get_item(REGISTRY, "bravo").unwrap().unwrap();
    assert!(bravo.content_hash.is_some());
    assert_eq!(
        bravo.metadata.unwrap().get("stars"),
        Some(&serde_json::json!(12))
    );
    let alpha = store.get_item(REGISTRY, "alpha").unwrap().unwrap();
    assert_eq!(alpha.name.as_deref(), Some("Alpha"));
    assert!(harness.content_dir().join(REGISTRY).join("alpha.md").exists());
}

#[tokio::test]
async fn test_missing_document_counts_as_failed() {
    let server = MockServer::start().await;
    mount_index(&server, r#"[{"slug": "alpha"}, {"slug": "ghost"}]"#).await;

    Mock::given(method("GET"))
        .and(path("/raw/ghost/SKILL.md"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount_content(&server).await;

    let harness = Harness::new();
    let crawler = harness.crawler(Arc::new(test_source(&server)), 1, CrawlMode::Full);
    let stats = crawler.crawl().await.unwrap();

    assert_eq!(stats.downloaded, 1);
    assert_eq!(stats.failed, 1);

    let counts = harness.store.lock().unwrap().count_items(REGISTRY).unwrap();
    assert_eq!(counts.pending, 1);
}

#[tokio::test]
async fn test_server_error_counts_as_failed() {
    let server = MockServer::start().await;
    mount_index(&server, r#"[{"slug": "alpha"}, {"slug": "broken"}]"#).await;

    Mock::given(method("GET"))
        .and(path("/raw/broken/SKILL.md"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_content(&server).await;

    let harness = Harness::new();
    let crawler = harness.crawler(Arc::new(test_source(&server)), 1, CrawlMode::Full);
    let stats = crawler.crawl().await.unwrap();

    assert_eq!(stats.downloaded, 1);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_unreachable_index_fails_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let crawler = harness.crawler(Arc::new(test_source(&server)), 1, CrawlMode::Full);
    assert!(crawler.crawl().await.is_err());

    let runs = harness
        .store
        .lock()
        .unwrap()
        .recent_runs(Some(REGISTRY), 1)
        .unwrap();
    assert!(runs[0].error.as_deref().unwrap().contains("HTTP 503"));
}

#[tokio::test]
async fn test_unchanged_index_skips_discovery() {
    let server = MockServer::start().await;
    mount_index(&server, r#"[{"slug": "alpha"}, {"slug": "bravo"}]"#).await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/raw/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("content"))
        .expect(2)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let source = Arc::new(test_source(&server));

    let first = harness
        .crawler(source.clone(), 1, CrawlMode::Incremental)
        .crawl()
        .await
        .unwrap();
    assert_eq!(first.downloaded, 2);

    let second = harness
        .crawler(source, 1, CrawlMode::Incremental)
        .crawl()
        .await
        .unwrap();
    assert_eq!(second.discovered, 0);
    assert_eq!(second.downloaded, 0);

    // Nothing discovered must not soft-delete the catalog
    let counts = harness.store.lock().unwrap().count_items(REGISTRY).unwrap();
    assert_eq!(counts.active, 2);
}

#[tokio::test]
async fn test_matching_etag_skips_download() {
    let server = MockServer::start().await;
    mount_index_once(&server, r#"[{"slug": "alpha", "stars": 1}]"#).await;
    mount_index(&server, r#"[{"slug": "alpha", "stars": 2}]"#).await;

    Mock::given(method("GET"))
        .and(path("/raw/alpha/SKILL.md"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_string("# Alpha"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/raw/alpha/SKILL.md"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"v1\""))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let source = Arc::new(test_source(&server));

    let first = harness
        .crawler(source.clone(), 1, CrawlMode::Incremental)
        .crawl()
        .await
        .unwrap();
    assert_eq!(first.downloaded, 1);

    let second = harness
        .crawler(source, 1, CrawlMode::Incremental)
        .crawl()
        .await
        .unwrap();
    assert_eq!(second.discovered, 1);
    assert_eq!(second.skipped, 1);
    assert_eq!(second.downloaded, 0);
}

#[tokio::test]
async fn test_unchanged_body_is_skipped_without_etag() {
    let server = MockServer::start().await;
    mount_index_once(&server, r#"[{"slug": "alpha", "rev": 1}]"#).await;
    mount_index(&server, r#"[{"slug": "alpha", "rev": 2}]"#).await;
    mount_content(&server).await;

    let harness = Harness::new();
    let source = Arc::new(test_source(&server));

    harness
        .crawler(source.clone(), 1, CrawlMode::Incremental)
        .crawl()
        .await
        .unwrap();
    let second = harness
        .crawler(source, 1, CrawlMode::Incremental)
        .crawl()
        .await
        .unwrap();

    assert_eq!(second.skipped, 1);
    assert!(!harness
        .manifest_dir()
        .join(format!("{}.changed.txt", REGISTRY))
        .exists());
}

#[tokio::test]
async fn test_watermark_limits_incremental_discovery() {
    let server = MockServer::start().await;
    mount_index_once(
        &server,
        r#"[
            {"slug": "alpha", "updated_at": "2024-01-01T00:00:00Z"},
            {"slug": "bravo", "updated_at": "2024-01-02T00:00:00Z"}
        ]"#,
    )
    .await;
    mount_index(
        &server,
        r#"[
            {"slug": "alpha", "updated_at": "2024-01-01T00:00:00Z"},
            {"slug": "bravo", "updated_at": "2024-01-02T00:00:00Z"},
            {"slug": "charlie", "updated_at": "2024-01-03T00:00:00Z"},
            {"slug": "delta"}
        ]"#,
    )
    .await;
    mount_content(&server).await;

    let harness = Harness::new();
    let source = Arc::new(test_source(&server));

    let first = harness
        .crawler(source.clone(), 1, CrawlMode::Incremental)
        .crawl()
        .await
        .unwrap();
    assert_eq!(first.discovered, 2);

    let second = harness
        .crawler(source, 1, CrawlMode::Incremental)
        .crawl()
        .await
        .unwrap();
    // charlie is newer than the watermark; delta has no date
    assert_eq!(second.discovered, 2);
    assert_eq!(second.downloaded, 2);

    let mut store = harness.store.lock().unwrap();
    assert_eq!(
        store.get_state(REGISTRY, "last_updated_at").unwrap().as_deref(),
        Some("2024-01-03T00:00:00Z")
    );
    assert!(store.get_item(REGISTRY, "delta").unwrap().is_some());
}

#[tokio::test]
async fn test_shard_restricts_discovery() {
    let server = MockServer::start().await;
    mount_index(
        &server,
        r#"[{"slug": "alpha"}, {"slug": "golf"}, {"slug": "Bravo"}, {"slug": "zulu"}]"#,
    )
    .await;
    mount_content(&server).await;

    let harness = Harness::new();
    let source = Arc::new(test_source(&server).with_shard("A-F"));
    let stats = harness
        .crawler(source, 1, CrawlMode::Full)
        .crawl()
        .await
        .unwrap();

    assert_eq!(stats.discovered, 2);

    let mut store = harness.store.lock().unwrap();
    assert!(store.get_item(REGISTRY, "Bravo").unwrap().is_some());
    assert!(store.get_item(REGISTRY, "golf").unwrap().is_none());
}

#[tokio::test]
async fn test_item_content_url_overrides_template() {
    let server = MockServer::start().await;
    mount_index(
        &server,
        &format!(
            r#"[{{"slug": "alpha", "content_url": "{}/custom/alpha.md"}}]"#,
            server.uri()
        ),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/custom/alpha.md"))
        .respond_with(ResponseTemplate::new(200).set_body_string("custom"))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let stats = harness
        .crawler(Arc::new(test_source(&server)), 1, CrawlMode::Full)
        .crawl()
        .await
        .unwrap();

    assert_eq!(stats.downloaded, 1);
}

#[tokio::test]
async fn test_fetch_captures_etag_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/raw/alpha/SKILL.md"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_string("# Alpha"),
        )
        .mount(&server)
        .await;

    let client = build_http_client(&UserAgentConfig {
        crawler_name: "TestObservatory".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    })
    .unwrap();
    let result = fetch_url(&client, &format!("{}/raw/alpha/SKILL.md", server.uri())).await;

    match result {
        FetchResult::Success {
            status_code,
            etag,
            body,
        } => {
            assert_eq!(status_code, 200);
            assert_eq!(etag.as_deref(), Some("\"v1\""));
            assert_eq!(body, b"# Alpha");
        }
        other => panic!("expected success, got {:?}", other),
    }
}
