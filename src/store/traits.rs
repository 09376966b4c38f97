//! Storage traits and error types
//!
//! This module defines the trait interface the crawler persists through and
//! the error type shared by every layer of the store.

use crate::store::{
    CrawlMode, CrawlRunRecord, ItemCounts, ItemRecord, ItemUpsert, RunKind, RunSummary,
};
use rusqlite::ErrorCode;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// Error messages from remote stores that indicate a dead stream or socket
const TRANSIENT_SIGNATURES: &[&str] = &[
    "stream not found",
    "stream expired",
    "connection",
    "hrana",
    "network",
    "broken pipe",
    "timed out",
];

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Unsupported store URL: {0}")]
    UnsupportedUrl(String),

    #[error("Connection is closed")]
    Closed,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Run not found: {0}")]
    RunNotFound(Uuid),
}

impl StoreError {
    /// Whether reconnecting and replaying the operation may succeed
    ///
    /// Local SQLite failures are transient only when the file itself could not
    /// be read or opened. Remote errors are classified by message, since
    /// remote protocols report dead streams as plain text.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::SystemIoFailure | ErrorCode::CannotOpen
            ),
            Self::Remote(message) => has_transient_signature(message),
            _ => false,
        }
    }
}

fn has_transient_signature(message: &str) -> bool {
    let message = message.to_lowercase();
    TRANSIENT_SIGNATURES
        .iter()
        .any(|signature| message.contains(signature))
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Trait for the persistence operations the crawler needs
///
/// Every write is an idempotent upsert (or a guarded update) so that a
/// statement replayed after a reconnect leaves the same state behind.
pub trait CrawlStore {
    // ===== Items =====

    /// Inserts an item or merges non-null fields into the existing row
    ///
    /// Bumps `last_seen` and clears the soft-delete flag.
    ///
    /// # Returns
    ///
    /// The item identity (`"{registry_id}:{slug}"`)
    fn upsert_item(&mut self, item: &ItemUpsert) -> StoreResult<String>;

    /// Gets an item by its registry-local slug
    fn get_item(&mut self, registry_id: &str, slug: &str) -> StoreResult<Option<ItemRecord>>;

    /// Gets the stored content fingerprint, if the item was ever downloaded
    fn get_fingerprint(&mut self, registry_id: &str, slug: &str) -> StoreResult<Option<String>>;

    /// Flags an item as deleted without removing it
    fn mark_item_deleted(&mut self, registry_id: &str, slug: &str) -> StoreResult<()>;

    /// Flags every active item of a registry whose slug is not in `seen`
    ///
    /// # Returns
    ///
    /// The number of items newly flagged
    fn mark_missing_deleted(
        &mut self,
        registry_id: &str,
        seen: &HashSet<String>,
    ) -> StoreResult<usize>;

    /// Gets all items of a registry, ordered by slug
    fn items_by_registry(
        &mut self,
        registry_id: &str,
        include_deleted: bool,
    ) -> StoreResult<Vec<ItemRecord>>;

    /// Gets active items that were registered but never downloaded
    fn pending_items(&mut self, registry_id: &str) -> StoreResult<Vec<ItemRecord>>;

    /// Counts active, deleted and pending items of a registry
    fn count_items(&mut self, registry_id: &str) -> StoreResult<ItemCounts>;

    // ===== Crawl State =====

    /// Reads a watermark value
    fn get_state(&mut self, registry_id: &str, key: &str) -> StoreResult<Option<String>>;

    /// Writes a watermark value (last write wins)
    fn set_state(&mut self, registry_id: &str, key: &str, value: &str) -> StoreResult<()>;

    // ===== Crawl Runs =====

    /// Records the start of a crawl run
    ///
    /// The id is generated client-side so a replayed insert is a no-op.
    fn begin_run(
        &mut self,
        registry_id: &str,
        mode: CrawlMode,
        kind: RunKind,
    ) -> StoreResult<Uuid>;

    /// Moves a running crawl run to its terminal status
    ///
    /// Finishing an already finished run is a no-op.
    fn finish_run(&mut self, run_id: Uuid, summary: &RunSummary) -> StoreResult<()>;

    /// Gets a run by ID
    fn get_run(&mut self, run_id: Uuid) -> StoreResult<CrawlRunRecord>;

    /// Gets the most recent runs, newest first
    fn recent_runs(
        &mut self,
        registry_id: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<CrawlRunRecord>>;

    // ===== Transactions =====

    /// Commits everything written since the last commit
    fn commit(&mut self) -> StoreResult<()>;
}
