//! Crawler coordinator - main crawl orchestration logic
//!
//! This module turns a [`RegistrySource`] into a complete synchronization run:
//! - Opening a ledger row for the run
//! - Discovering and registering items
//! - Downloading items sequentially or through a bounded worker pool
//! - Persisting fingerprints and writing content for changed items
//! - Emitting the changed-items manifest
//! - Closing the ledger row, on success and on failure alike

use crate::config::{Config, RegistryEntry};
use crate::crawler::manifest::write_manifest;
use crate::crawler::rate_limit::RateLimiter;
use crate::crawler::sink::ContentSink;
use crate::crawler::source::{
    with_store, CrawlContext, DownloadOutcome, ItemDescriptor, RegistrySource,
};
use crate::store::{
    item_id, CrawlMode, CrawlStore, ItemRecord, ItemUpsert, RunKind, RunStats, RunStatus,
    RunSummary, Store,
};
use crate::{ObservatoryError, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Processed items between progress log lines
const PROGRESS_EVERY: usize = 100;

/// Tunables of one crawler
#[derive(Debug, Clone)]
pub struct CrawlerOptions {
    /// Concurrent downloads; 1 keeps discovery order
    pub workers: usize,

    pub mode: CrawlMode,

    /// Processed items between intermediate commits
    pub commit_every: usize,

    /// Minimum delay between two downloads
    pub rate_limit: Duration,

    /// Where the changed-items manifest goes; `None` disables it
    pub manifest_dir: Option<PathBuf>,

    /// Soft-delete items a full crawl no longer reports
    pub mark_missing_deleted: bool,
}

impl Default for CrawlerOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            mode: CrawlMode::Incremental,
            commit_every: 500,
            rate_limit: Duration::from_millis(500),
            manifest_dir: None,
            mark_missing_deleted: true,
        }
    }
}

impl CrawlerOptions {
    /// Resolves per-registry overrides against the global crawler settings
    pub fn from_config(config: &Config, entry: &RegistryEntry) -> Self {
        Self {
            workers: entry.workers.unwrap_or(config.crawler.workers).max(1),
            mode: entry.mode.unwrap_or(config.crawler.mode),
            commit_every: config.crawler.commit_every.max(1),
            rate_limit: Duration::from_millis(
                entry.rate_limit_ms.unwrap_or(config.crawler.rate_limit_ms),
            ),
            manifest_dir: Some(PathBuf::from(&config.output.manifest_dir)),
            mark_missing_deleted: config.crawler.mark_missing_deleted,
        }
    }
}

/// Counters and changed slugs, owned by the single outcome consumer
#[derive(Debug, Default)]
struct Progress {
    stats: RunStats,
    changed: Vec<String>,
    processed: usize,
    total: usize,
}

/// Orchestrates crawl runs for one registry
pub struct Crawler {
    source: Arc<dyn RegistrySource>,
    store: Arc<Mutex<Store>>,
    sink: Arc<dyn ContentSink>,
    options: CrawlerOptions,
    context: Arc<CrawlContext>,
}

impl Crawler {
    pub fn new(
        registry_id: impl Into<String>,
        source: Arc<dyn RegistrySource>,
        store: Arc<Mutex<Store>>,
        sink: Arc<dyn ContentSink>,
        options: CrawlerOptions,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(options.rate_limit));
        let context = Arc::new(CrawlContext::new(
            registry_id,
            options.mode,
            rate_limiter,
            store.clone(),
        ));

        Self {
            source,
            store,
            sink,
            options,
            context,
        }
    }

    pub fn registry_id(&self) -> &str {
        self.context.registry_id()
    }

    pub fn options(&self) -> &CrawlerOptions {
        &self.options
    }

    pub fn context(&self) -> &CrawlContext {
        &self.context
    }

    /// False exactly when the stored fingerprint of `slug` equals `fingerprint`
    pub async fn is_content_changed(&self, slug: &str, fingerprint: &str) -> Result<bool> {
        self.context.is_content_changed(slug, fingerprint).await
    }

    /// Runs discover, register and download for the registry
    ///
    /// Per-item download failures are counted, not returned. Any other error
    /// fails the run: the ledger row is closed as `failed` with the counters
    /// gathered so far, and the error is returned.
    pub async fn crawl(&self) -> Result<RunStats> {
        self.execute(RunKind::Crawl).await
    }

    /// Downloads items that were registered but never fetched
    ///
    /// Gets its own ledger row, like [`Crawler::crawl`].
    pub async fn resume(&self) -> Result<RunStats> {
        self.execute(RunKind::Resume).await
    }

    async fn execute(&self, kind: RunKind) -> Result<RunStats> {
        let registry_id = self.registry_id().to_string();
        let started = Instant::now();
        let run_id = self.begin_run(kind).await?;

        tracing::info!(
            "[{}] Starting {} ({}, {} workers), run {}",
            registry_id,
            kind,
            self.options.mode,
            self.options.workers,
            run_id
        );

        let mut progress = Progress::default();
        let result = match kind {
            RunKind::Crawl => self.run_crawl(&mut progress).await,
            RunKind::Resume => self.run_resume(&mut progress).await,
        };
        progress.stats.changed = progress.changed.len() as u64;

        let summary = RunSummary {
            stats: progress.stats,
            duration: started.elapsed(),
            status: if result.is_ok() {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            },
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        let finished = self.finish_run(run_id, summary.clone()).await;

        match result {
            Ok(()) => {
                finished?;
                let stats = progress.stats;
                tracing::info!(
                    "[{}] Crawl complete: {} discovered, {} downloaded, {} skipped, {} failed in {:?}",
                    registry_id,
                    stats.discovered,
                    stats.downloaded,
                    stats.skipped,
                    stats.failed,
                    summary.duration
                );
                Ok(stats)
            }
            Err(e) => {
                if let Err(finish_err) = finished {
                    tracing::error!(
                        "[{}] Could not record failure of run {}: {}",
                        registry_id,
                        run_id,
                        finish_err
                    );
                }
                tracing::error!("[{}] Run {} failed: {}", registry_id, run_id, e);
                Err(e)
            }
        }
    }

    async fn begin_run(&self, kind: RunKind) -> Result<Uuid> {
        let registry_id = self.registry_id().to_string();
        let mode = self.options.mode;
        with_store(&self.store, move |store| {
            let run_id = store.begin_run(&registry_id, mode, kind)?;
            store.commit()?;
            Ok(run_id)
        })
        .await
    }

    async fn finish_run(&self, run_id: Uuid, summary: RunSummary) -> Result<()> {
        with_store(&self.store, move |store| {
            store.finish_run(run_id, &summary)?;
            store.commit()?;
            Ok(())
        })
        .await
    }

    async fn run_crawl(&self, progress: &mut Progress) -> Result<()> {
        let items = self.discover().await?;
        progress.stats.discovered = items.len() as u64;
        tracing::info!("[{}] Discovered {} items", self.registry_id(), items.len());

        self.register(&items).await?;
        self.download_all(items, progress).await?;
        self.finalize(progress).await
    }

    async fn run_resume(&self, progress: &mut Progress) -> Result<()> {
        let registry_id = self.registry_id().to_string();
        let pending = with_store(&self.store, move |store| {
            Ok(store.pending_items(&registry_id)?)
        })
        .await?;
        let items: Vec<ItemDescriptor> = pending.into_iter().map(descriptor_from_record).collect();
        progress.stats.discovered = items.len() as u64;
        tracing::info!(
            "[{}] Resuming {} pending downloads",
            self.registry_id(),
            items.len()
        );

        self.download_all(items, progress).await?;
        self.finalize(progress).await
    }

    async fn discover(&self) -> Result<Vec<ItemDescriptor>> {
        let items = self
            .source
            .discover(&self.context)
            .await
            .map_err(|error| ObservatoryError::Discovery {
                registry: self.registry_id().to_string(),
                error,
            })?;

        let mut seen = HashSet::new();
        let total = items.len();
        let unique: Vec<ItemDescriptor> = items
            .into_iter()
            .filter(|item| seen.insert(item.slug.clone()))
            .collect();
        if unique.len() < total {
            tracing::debug!(
                "[{}] Dropped {} duplicate slugs from discovery",
                self.registry_id(),
                total - unique.len()
            );
        }

        Ok(unique)
    }

    /// Upserts every discovered item, then commits once
    async fn register(&self, items: &[ItemDescriptor]) -> Result<()> {
        let registry_id = self.registry_id().to_string();
        let upserts: Vec<ItemUpsert> = items
            .iter()
            .map(|item| registration(&registry_id, item))
            .collect();
        let seen: Option<HashSet<String>> = (self.options.mode == CrawlMode::Full
            && self.options.mark_missing_deleted
            && !items.is_empty())
        .then(|| items.iter().map(|i| i.slug.clone()).collect());

        with_store(&self.store, move |store| {
            for upsert in &upserts {
                store.upsert_item(upsert)?;
            }

            if let Some(seen) = &seen {
                let flagged = store.mark_missing_deleted(&registry_id, seen)?;
                if flagged > 0 {
                    tracing::info!("[{}] Marked {} vanished items deleted", registry_id, flagged);
                }
            }

            store.commit()?;
            Ok(())
        })
        .await
    }

    async fn download_all(&self, items: Vec<ItemDescriptor>, progress: &mut Progress) -> Result<()> {
        progress.total = items.len();
        if items.is_empty() {
            return Ok(());
        }

        if self.options.workers <= 1 {
            self.download_sequential(items, progress).await
        } else {
            self.download_concurrent(items, progress).await
        }
    }

    async fn download_sequential(
        &self,
        items: Vec<ItemDescriptor>,
        progress: &mut Progress,
    ) -> Result<()> {
        for item in items {
            let (item, outcome) =
                fetch_item(self.source.clone(), self.context.clone(), item).await;
            self.record(&item, outcome, progress).await?;
        }
        Ok(())
    }

    /// Downloads run in parallel; outcomes are recorded one at a time
    async fn download_concurrent(
        &self,
        items: Vec<ItemDescriptor>,
        progress: &mut Progress,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.options.workers));
        let mut tasks = JoinSet::new();

        for item in items {
            let semaphore = semaphore.clone();
            let source = self.source.clone();
            let context = self.context.clone();
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (item, Err(ObservatoryError::PoolClosed.into())),
                };
                fetch_item(source, context, item).await
            });
        }

        // Returning early drops the set, which aborts the remaining tasks
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((item, outcome)) => self.record(&item, outcome, progress).await?,
                Err(e) => {
                    tracing::warn!("[{}] Download task lost: {}", self.registry_id(), e);
                    progress.stats.failed += 1;
                    self.tick(progress).await?;
                }
            }
        }

        Ok(())
    }

    /// Applies one download outcome
    ///
    /// Content reaches the sink before its fingerprint is stored, so a failed
    /// write leaves the item to be downloaded again.
    async fn record(
        &self,
        item: &ItemDescriptor,
        outcome: anyhow::Result<DownloadOutcome>,
        progress: &mut Progress,
    ) -> Result<()> {
        let registry_id = self.registry_id();

        match outcome {
            Ok(DownloadOutcome::Skipped) => {
                tracing::debug!("[{}] Unchanged: {}", registry_id, item.slug);
                progress.stats.skipped += 1;
            }
            Ok(DownloadOutcome::Failed(reason)) => {
                tracing::warn!("[{}] Error for {}: {}", registry_id, item.slug, reason);
                progress.stats.failed += 1;
            }
            Err(e) => {
                tracing::warn!("[{}] Failed to download {}: {:#}", registry_id, item.slug, e);
                progress.stats.failed += 1;
            }
            Ok(DownloadOutcome::Succeeded {
                content,
                fingerprint,
                size,
            }) => {
                let sink = self.sink.clone();
                let (registry, slug) = (registry_id.to_string(), item.slug.clone());
                with_store(&self.store, move |store| {
                    sink.write(&registry, &slug, &content)
                        .map_err(|source| ObservatoryError::Sink {
                            identity: item_id(&registry, &slug),
                            source,
                        })?;

                    let mut update = ItemUpsert::new(registry.as_str(), slug.as_str());
                    update.content_hash = Some(fingerprint);
                    update.content_size = Some(size);
                    store.upsert_item(&update)?;
                    Ok(())
                })
                .await?;

                tracing::debug!("[{}] Downloaded {} ({} bytes)", registry_id, item.slug, size);
                progress.changed.push(item.slug.clone());
                progress.stats.downloaded += 1;
            }
        }

        self.tick(progress).await
    }

    /// Counts a processed item; commits and logs on their cadence
    async fn tick(&self, progress: &mut Progress) -> Result<()> {
        progress.processed += 1;

        if progress.processed % self.options.commit_every == 0 {
            with_store(&self.store, |store| Ok(store.commit()?)).await?;
            tracing::debug!(
                "[{}] Committed after {} items",
                self.registry_id(),
                progress.processed
            );
        }

        if progress.processed % PROGRESS_EVERY == 0 {
            tracing::info!(
                "[{}] Progress: {}/{}",
                self.registry_id(),
                progress.processed,
                progress.total
            );
        }

        Ok(())
    }

    async fn finalize(&self, progress: &Progress) -> Result<()> {
        with_store(&self.store, |store| Ok(store.commit()?)).await?;

        if let Some(dir) = &self.options.manifest_dir {
            match write_manifest(dir, self.registry_id(), &progress.changed)? {
                Some(path) => tracing::info!(
                    "[{}] Wrote {} changed items to {}",
                    self.registry_id(),
                    progress.changed.len(),
                    path.display()
                ),
                None => tracing::debug!("[{}] No changed items", self.registry_id()),
            }
        }

        Ok(())
    }
}

/// Throttles, then downloads one item on its own task
///
/// The inner task turns a panicking download into an error for that item.
async fn fetch_item(
    source: Arc<dyn RegistrySource>,
    context: Arc<CrawlContext>,
    item: ItemDescriptor,
) -> (ItemDescriptor, anyhow::Result<DownloadOutcome>) {
    context.throttle().await;

    let task_item = item.clone();
    let joined = tokio::spawn(async move { source.download(&task_item, &context).await }).await;

    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) => Err(anyhow::anyhow!("download task panicked: {}", e)),
    };
    (item, outcome)
}

fn registration(registry_id: &str, item: &ItemDescriptor) -> ItemUpsert {
    ItemUpsert {
        name: item.name.clone(),
        url: item.url.clone(),
        metadata: item.metadata.clone(),
        ..ItemUpsert::new(registry_id, item.slug.as_str())
    }
}

fn descriptor_from_record(record: ItemRecord) -> ItemDescriptor {
    ItemDescriptor {
        slug: record.slug,
        name: record.name,
        url: record.url,
        metadata: record.metadata,
    }
}
