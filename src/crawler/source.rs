//! Registry capability seam
//!
//! A registry plugs into the crawler by implementing [`RegistrySource`]:
//! one call that lists items, one call that fetches a single item. Both
//! receive a [`CrawlContext`] carrying the shared rate limiter and locked
//! access to the registry's watermarks and stored fingerprints.

use crate::crawler::hash::content_hash;
use crate::crawler::rate_limit::RateLimiter;
use crate::store::{CrawlMode, CrawlStore, Store};
use crate::{ObservatoryError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::sync::{Arc, Mutex, MutexGuard};

/// An item as reported by a registry's discovery call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemDescriptor {
    /// Registry-local identifier
    pub slug: String,
    pub name: Option<String>,
    pub url: Option<String>,
    /// Opaque registry-specific fields, stored as a JSON object
    pub metadata: Option<Map<String, JsonValue>>,
}

impl ItemDescriptor {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, JsonValue>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Reads a string field out of the metadata object
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
    }
}

/// Result of downloading one item
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    /// Nothing new upstream; the stored copy is current
    Skipped,

    /// An expected "no content" condition (gone, rate limited, empty)
    Failed(String),

    /// Fresh content
    Succeeded {
        content: Vec<u8>,
        fingerprint: String,
        size: u64,
    },
}

impl DownloadOutcome {
    /// Builds a `Succeeded` outcome, computing fingerprint and size
    pub fn succeeded(content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        let fingerprint = content_hash(&content);
        let size = content.len() as u64;
        Self::Succeeded {
            content,
            fingerprint,
            size,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Discovery and download capabilities of one registry
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Lists the registry's items, in a stable order
    async fn discover(&self, ctx: &CrawlContext) -> anyhow::Result<Vec<ItemDescriptor>>;

    /// Fetches one item
    ///
    /// Expected "no content" conditions should come back as
    /// [`DownloadOutcome::Failed`]; returned errors are counted the same way.
    async fn download(
        &self,
        item: &ItemDescriptor,
        ctx: &CrawlContext,
    ) -> anyhow::Result<DownloadOutcome>;
}

/// Locks the shared store
pub(crate) fn lock_store(store: &Mutex<Store>) -> Result<MutexGuard<'_, Store>> {
    store.lock().map_err(|_| ObservatoryError::LockPoisoned)
}

/// Runs `f` against the locked store on the blocking pool
///
/// Store calls may sleep through reconnect backoff, which must not stall
/// the async workers that drive downloads.
pub(crate) async fn with_store<T, F>(store: &Arc<Mutex<Store>>, f: F) -> Result<T>
where
    F: FnOnce(&mut Store) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = lock_store(&store)?;
        f(&mut guard)
    })
    .await?
}

/// Per-run context handed to a [`RegistrySource`]
///
/// Store access goes through the same mutex the crawler persists through.
pub struct CrawlContext {
    registry_id: String,
    mode: CrawlMode,
    rate_limiter: Arc<RateLimiter>,
    store: Arc<Mutex<Store>>,
}

impl CrawlContext {
    pub fn new(
        registry_id: impl Into<String>,
        mode: CrawlMode,
        rate_limiter: Arc<RateLimiter>,
        store: Arc<Mutex<Store>>,
    ) -> Self {
        Self {
            registry_id: registry_id.into(),
            mode,
            rate_limiter,
            store,
        }
    }

    pub fn registry_id(&self) -> &str {
        &self.registry_id
    }

    pub fn mode(&self) -> CrawlMode {
        self.mode
    }

    pub fn is_incremental(&self) -> bool {
        self.mode == CrawlMode::Incremental
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Waits on the shared rate limiter
    pub async fn throttle(&self) {
        self.rate_limiter.wait().await;
    }

    /// Reads a watermark of this registry
    pub async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let registry_id = self.registry_id.clone();
        let key = key.to_string();
        with_store(&self.store, move |store| {
            Ok(store.get_state(&registry_id, &key)?)
        })
        .await
    }

    /// Writes a watermark of this registry
    pub async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let registry_id = self.registry_id.clone();
        let (key, value) = (key.to_string(), value.to_string());
        with_store(&self.store, move |store| {
            Ok(store.set_state(&registry_id, &key, &value)?)
        })
        .await
    }

    /// Fingerprint stored by the last successful download of `slug`
    pub async fn stored_fingerprint(&self, slug: &str) -> Result<Option<String>> {
        let registry_id = self.registry_id.clone();
        let slug = slug.to_string();
        with_store(&self.store, move |store| {
            Ok(store.get_fingerprint(&registry_id, &slug)?)
        })
        .await
    }

    /// False exactly when the stored fingerprint equals `fingerprint`
    pub async fn is_content_changed(&self, slug: &str, fingerprint: &str) -> Result<bool> {
        let stored = self.stored_fingerprint(slug).await?;
        Ok(stored.as_deref() != Some(fingerprint))
    }
}
