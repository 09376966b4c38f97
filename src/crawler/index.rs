//! Registry source backed by a JSON index
//!
//! The index is either a bare array of items or an object with an `items`
//! array. Each item carries a `slug` and optionally `name`, `url`,
//! `updated_at` and `content_url`; any other field is kept as metadata.
//!
//! Incremental runs avoid work at three levels: an unchanged index (by hash)
//! yields no items, items not updated since the `last_updated_at` watermark
//! are dropped, and an item whose ETag still matches is skipped with a HEAD
//! request instead of a full download.

use crate::config::RegistryEntry;
use crate::crawler::fetcher::{check_etag, fetch_url, FetchResult};
use crate::crawler::hash::content_hash;
use crate::crawler::source::{CrawlContext, DownloadOutcome, ItemDescriptor, RegistrySource};
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering;

/// State key holding the hash of the last index seen
const INDEX_HASH_KEY: &str = "index_hash:index";

/// State key holding the newest `updated_at` seen
const LAST_UPDATED_KEY: &str = "last_updated_at";

fn etag_key(slug: &str) -> String {
    format!("etag:{}", slug)
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    slug: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    updated_at: Option<JsonValue>,
    #[serde(default)]
    content_url: Option<String>,
    #[serde(flatten)]
    extra: Map<String, JsonValue>,
}

impl IndexEntry {
    /// `updated_at` as a string, whether the index used a number or text
    fn updated_at(&self) -> Option<String> {
        match self.updated_at.as_ref()? {
            JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn into_descriptor(self) -> ItemDescriptor {
        let updated_at = self.updated_at();
        let mut metadata = self.extra;
        if let Some(content_url) = self.content_url {
            metadata.insert("content_url".to_string(), JsonValue::String(content_url));
        }
        if let Some(updated_at) = updated_at {
            metadata.insert("updated_at".to_string(), JsonValue::String(updated_at));
        }

        ItemDescriptor {
            slug: self.slug,
            name: self.name,
            url: self.url,
            metadata: if metadata.is_empty() {
                None
            } else {
                Some(metadata)
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IndexDocument {
    List(Vec<IndexEntry>),
    Wrapped { items: Vec<IndexEntry> },
}

impl IndexDocument {
    fn into_entries(self) -> Vec<IndexEntry> {
        match self {
            Self::List(entries) => entries,
            Self::Wrapped { items } => items,
        }
    }
}

/// Parses an index document
fn parse_index(body: &[u8]) -> anyhow::Result<Vec<IndexEntry>> {
    let document: IndexDocument =
        serde_json::from_slice(body).context("index is not a JSON item list")?;
    Ok(document
        .into_entries()
        .into_iter()
        .filter(|entry| !entry.slug.is_empty())
        .collect())
}

/// Checks whether a slug falls into a letter-range shard such as `"A-F"`
///
/// Matching is case-insensitive on the first character. A malformed shard
/// matches everything.
pub fn shard_matches(slug: &str, shard: &str) -> bool {
    let Some(first) = slug.chars().next() else {
        return true;
    };

    let bounds: Vec<&str> = shard.split('-').collect();
    let (start, end) = match bounds.as_slice() {
        [start, end] => match (single_char(start), single_char(end)) {
            (Some(start), Some(end)) => (start, end),
            _ => return true,
        },
        _ => return true,
    };

    let first = first.to_ascii_uppercase();
    start <= first && first <= end
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c.to_ascii_uppercase()),
        _ => None,
    }
}

/// Orders two watermark values
///
/// Integers (epoch timestamps) compare numerically, RFC 3339 timestamps
/// chronologically, anything else lexically.
fn compare_watermarks(a: &str, b: &str) -> Ordering {
    if let (Ok(a), Ok(b)) = (a.parse::<i64>(), b.parse::<i64>()) {
        return a.cmp(&b);
    }
    if let (Ok(a), Ok(b)) = (
        DateTime::parse_from_rfc3339(a),
        DateTime::parse_from_rfc3339(b),
    ) {
        return a.cmp(&b);
    }
    a.cmp(b)
}

/// Registry source reading a JSON index over HTTP
pub struct HttpIndexSource {
    client: Client,
    index_url: String,
    content_url_template: Option<String>,
    shard: Option<String>,
}

impl HttpIndexSource {
    pub fn new(client: Client, index_url: impl Into<String>) -> Self {
        Self {
            client,
            index_url: index_url.into(),
            content_url_template: None,
            shard: None,
        }
    }

    pub fn from_entry(client: Client, entry: &RegistryEntry) -> Self {
        Self {
            client,
            index_url: entry.index_url.clone(),
            content_url_template: entry.content_url_template.clone(),
            shard: entry.shard.clone(),
        }
    }

    pub fn with_content_url_template(mut self, template: impl Into<String>) -> Self {
        self.content_url_template = Some(template.into());
        self
    }

    pub fn with_shard(mut self, shard: impl Into<String>) -> Self {
        self.shard = Some(shard.into());
        self
    }

    /// Where an item's content lives: its own `content_url`, else the template
    fn content_url(&self, item: &ItemDescriptor) -> Option<String> {
        if let Some(url) = item.metadata_str("content_url") {
            return Some(url.to_string());
        }
        self.content_url_template
            .as_ref()
            .map(|template| template.replace("{slug}", &item.slug))
    }

    /// Returns true when the stored ETag still matches upstream
    async fn etag_unchanged(
        &self,
        url: &str,
        item: &ItemDescriptor,
        ctx: &CrawlContext,
    ) -> anyhow::Result<bool> {
        let Some(stored) = ctx.get_state(&etag_key(&item.slug)).await? else {
            return Ok(false);
        };
        if ctx.stored_fingerprint(&item.slug).await?.is_none() {
            return Ok(false);
        }

        match check_etag(&self.client, url).await {
            Ok(Some(remote)) => Ok(remote == stored),
            Ok(None) => Ok(false),
            Err(e) => {
                tracing::debug!(
                    "[{}] HEAD {} failed ({}), downloading anyway",
                    ctx.registry_id(),
                    url,
                    e.describe()
                );
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl RegistrySource for HttpIndexSource {
    async fn discover(&self, ctx: &CrawlContext) -> anyhow::Result<Vec<ItemDescriptor>> {
        let registry_id = ctx.registry_id();

        ctx.throttle().await;
        let body = match fetch_url(&self.client, &self.index_url).await {
            FetchResult::Success { body, .. } => body,
            failure => bail!(
                "failed to fetch index {}: {}",
                self.index_url,
                failure.describe()
            ),
        };

        if ctx.is_incremental() {
            let index_hash = content_hash(&body);
            if ctx.get_state(INDEX_HASH_KEY).await?.as_deref() == Some(index_hash.as_str()) {
                tracing::info!("[{}] Index unchanged (hash match), nothing to do", registry_id);
                return Ok(Vec::new());
            }
            ctx.set_state(INDEX_HASH_KEY, &index_hash).await?;
        }

        let mut entries = parse_index(&body)
            .with_context(|| format!("failed to parse index {}", self.index_url))?;
        let listed = entries.len();

        if let Some(shard) = &self.shard {
            entries.retain(|entry| shard_matches(&entry.slug, shard));
            tracing::info!(
                "[{}] After shard filter ({}): {} of {} items",
                registry_id,
                shard,
                entries.len(),
                listed
            );
        }

        let newest = entries
            .iter()
            .filter_map(IndexEntry::updated_at)
            .max_by(|a, b| compare_watermarks(a, b));

        if ctx.is_incremental() {
            if let Some(watermark) = ctx.get_state(LAST_UPDATED_KEY).await? {
                // Newest first, so the scan can stop at the first stale item
                entries.sort_by(|a, b| match (a.updated_at(), b.updated_at()) {
                    (Some(a), Some(b)) => compare_watermarks(&b, &a),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                });
                let fresh = entries
                    .iter()
                    .position(|entry| match entry.updated_at() {
                        Some(updated) => {
                            compare_watermarks(&updated, &watermark) != Ordering::Greater
                        }
                        None => false,
                    })
                    .unwrap_or(entries.len());
                let kept_undated: Vec<IndexEntry> = entries
                    .drain(fresh..)
                    .filter(|entry| entry.updated_at().is_none())
                    .collect();
                entries.extend(kept_undated);

                tracing::info!(
                    "[{}] Incremental: {} items updated since {}",
                    registry_id,
                    entries.len(),
                    watermark
                );
            }
        }

        if let Some(newest) = newest {
            ctx.set_state(LAST_UPDATED_KEY, &newest).await?;
        }

        Ok(entries.into_iter().map(IndexEntry::into_descriptor).collect())
    }

    async fn download(
        &self,
        item: &ItemDescriptor,
        ctx: &CrawlContext,
    ) -> anyhow::Result<DownloadOutcome> {
        let Some(url) = self.content_url(item) else {
            return Ok(DownloadOutcome::failed("no content URL"));
        };

        if ctx.is_incremental() && self.etag_unchanged(&url, item, ctx).await? {
            return Ok(DownloadOutcome::Skipped);
        }

        match fetch_url(&self.client, &url).await {
            FetchResult::Success { body, etag, .. } => {
                if body.is_empty() {
                    return Ok(DownloadOutcome::failed("empty content"));
                }
                if let Some(etag) = etag {
                    ctx.set_state(&etag_key(&item.slug), &etag).await?;
                }

                let outcome = DownloadOutcome::succeeded(body);
                if let DownloadOutcome::Succeeded { fingerprint, .. } = &outcome {
                    if !ctx.is_content_changed(&item.slug, fingerprint).await? {
                        return Ok(DownloadOutcome::Skipped);
                    }
                }
                Ok(outcome)
            }
            failure if failure.is_gone() || failure.is_rate_limited() => {
                Ok(DownloadOutcome::Failed(failure.describe()))
            }
            failure => Err(anyhow!("GET {} failed: {}", url, failure.describe())),
        }
    }
}
