//! Crawler module for registry synchronization
//!
//! This module contains the core crawling logic, including:
//! - The registry capability seam and the per-run crawl context
//! - Content fingerprints and rate limiting
//! - Crawl orchestration over sequential or concurrent downloads
//! - Content sinks and the changed-items manifest
//! - A generic HTTP/JSON index registry source

mod coordinator;
mod fetcher;
mod hash;
mod index;
mod manifest;
mod rate_limit;
mod sink;
mod source;

pub use coordinator::{Crawler, CrawlerOptions};
pub use fetcher::{build_http_client, check_etag, fetch_url, user_agent_string, FetchResult};
pub use hash::content_hash;
pub use index::{shard_matches, HttpIndexSource};
pub use manifest::{manifest_path, read_manifest, write_manifest};
pub use rate_limit::RateLimiter;
pub use sink::{safe_file_stem, ContentSink, FsContentSink};
pub use source::{CrawlContext, DownloadOutcome, ItemDescriptor, RegistrySource};

pub use crate::store::RunStats;

use crate::config::{Config, RegistryEntry};
use crate::store::{RunStatus, Store};
use crate::{ObservatoryError, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Outcome of one registry run, as reported to the operator
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub registry: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<RunStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    fn from_result(registry: &str, result: Result<RunStats>) -> Self {
        match result {
            Ok(stats) => Self {
                registry: registry.to_string(),
                status: RunStatus::Completed,
                stats: Some(stats),
                error: None,
            },
            Err(e) => Self {
                registry: registry.to_string(),
                status: RunStatus::Failed,
                stats: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }
}

/// Runs the configured registries one after another
///
/// This is the main entry point for a crawl. It will:
/// 1. Open the store and apply the schema
/// 2. Build the HTTP client
/// 3. Crawl (or resume) each selected registry against the shared store
///
/// A failing registry does not stop the others; its failure is in the
/// returned report and in the run ledger.
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `registry_ids` - Registries to run; empty means all configured ones
/// * `resume` - Download pending items instead of crawling
pub async fn crawl(
    config: &Config,
    registry_ids: &[String],
    resume: bool,
) -> Result<Vec<RunReport>> {
    let entries = select_registries(config, registry_ids)?;

    let store_config = config.store.clone();
    let store = tokio::task::spawn_blocking(move || Store::from_config(&store_config)).await??;
    let store = Arc::new(Mutex::new(store));
    let client = build_http_client(&config.user_agent)?;
    let sink: Arc<dyn ContentSink> = Arc::new(FsContentSink::new(&config.output.content_dir));

    let mut reports = Vec::with_capacity(entries.len());
    for entry in entries {
        let source = Arc::new(HttpIndexSource::from_entry(client.clone(), entry));
        let crawler = Crawler::new(
            entry.id.as_str(),
            source,
            store.clone(),
            sink.clone(),
            CrawlerOptions::from_config(config, entry),
        );

        let result = if resume {
            crawler.resume().await
        } else {
            crawler.crawl().await
        };
        reports.push(RunReport::from_result(&entry.id, result));
    }

    source::with_store(&store, |store| Ok(store.close()?)).await?;
    Ok(reports)
}

/// Resolves registry ids against the configuration
pub fn select_registries<'a>(
    config: &'a Config,
    registry_ids: &[String],
) -> Result<Vec<&'a RegistryEntry>> {
    if registry_ids.is_empty() {
        return Ok(config.registries.iter().collect());
    }

    registry_ids
        .iter()
        .map(|id| {
            config
                .registry(id)
                .ok_or_else(|| ObservatoryError::UnknownRegistry(id.clone()))
        })
        .collect()
}
