//! Shared fixtures: fake registries and a crawl harness

use async_trait::async_trait;
use skill_observatory::crawler::{
    ContentSink, CrawlContext, Crawler, CrawlerOptions, FsContentSink, RegistrySource,
};
use skill_observatory::{CrawlMode, DownloadOutcome, ItemDescriptor, Store};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const REGISTRY: &str = "fake-hub";

/// A registry that lists fixed slugs and serves `"<slug>:<version>"` as content
pub struct FakeRegistry {
    slugs: Vec<String>,
    raising: HashSet<String>,
    version: Mutex<u32>,
    fail_discovery: bool,
    download_delay: Duration,
    pub downloads: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeRegistry {
    pub fn new(count: usize) -> Self {
        Self::with_slugs((0..count).map(|i| format!("skill-{:03}", i)).collect())
    }

    pub fn with_slugs(slugs: Vec<String>) -> Self {
        Self {
            slugs,
            raising: HashSet::new(),
            version: Mutex::new(1),
            fail_discovery: false,
            download_delay: Duration::ZERO,
            downloads: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Makes the download of `slug` return an error
    pub fn raising(mut self, slug: &str) -> Self {
        self.raising.insert(slug.to_string());
        self
    }

    pub fn failing_discovery(mut self) -> Self {
        self.fail_discovery = true;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    /// Changes the content of every item
    pub fn bump_version(&self) {
        *self.version.lock().unwrap() += 1;
    }

    pub fn slugs(&self) -> &[String] {
        &self.slugs
    }

    pub fn content_of(&self, slug: &str) -> String {
        format!("{}:{}", slug, *self.version.lock().unwrap())
    }
}

#[async_trait]
impl RegistrySource for FakeRegistry {
    async fn discover(&self, _ctx: &CrawlContext) -> anyhow::Result<Vec<ItemDescriptor>> {
        if self.fail_discovery {
            anyhow::bail!("registry index unavailable");
        }
        Ok(self
            .slugs
            .iter()
            .map(|slug| ItemDescriptor::new(slug.as_str()).with_name(slug.to_uppercase()))
            .collect())
    }

    async fn download(
        &self,
        item: &ItemDescriptor,
        ctx: &CrawlContext,
    ) -> anyhow::Result<DownloadOutcome> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.download_delay.is_zero() {
            tokio::time::sleep(self.download_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.downloads.fetch_add(1, Ordering::SeqCst);

        if self.raising.contains(&item.slug) {
            anyhow::bail!("connection reset while fetching {}", item.slug);
        }

        let outcome = DownloadOutcome::succeeded(self.content_of(&item.slug));
        if let DownloadOutcome::Succeeded { fingerprint, .. } = &outcome {
            if ctx.is_incremental() && !ctx.is_content_changed(&item.slug, fingerprint).await? {
                return Ok(DownloadOutcome::Skipped);
            }
        }
        Ok(outcome)
    }
}

/// Temporary directories plus an in-memory store shared across runs
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<Mutex<Store>>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            store: Arc::new(Mutex::new(Store::open_in_memory().unwrap())),
        }
    }

    pub fn content_dir(&self) -> PathBuf {
        self.dir.path().join("content")
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.dir.path().join("manifests")
    }

    pub fn options(&self, workers: usize, mode: CrawlMode) -> CrawlerOptions {
        CrawlerOptions {
            workers,
            mode,
            rate_limit: Duration::ZERO,
            manifest_dir: Some(self.manifest_dir()),
            ..CrawlerOptions::default()
        }
    }

    pub fn crawler(
        &self,
        source: Arc<dyn RegistrySource>,
        workers: usize,
        mode: CrawlMode,
    ) -> Crawler {
        self.crawler_with(source, self.options(workers, mode))
    }

    pub fn crawler_with(&self, source: Arc<dyn RegistrySource>, options: CrawlerOptions) -> Crawler {
        let sink: Arc<dyn ContentSink> = Arc::new(FsContentSink::new(self.content_dir()));
        Crawler::new(REGISTRY, source, self.store.clone(), sink, options)
    }
}
