//! Storage module for persisting crawl data
//!
//! This module handles all datastore operations for the crawler, including:
//! - Raw handles and the reconnecting wrapper every statement goes through
//! - Schema management
//! - Item catalog upserts and soft deletes
//! - Incremental crawl watermarks
//! - The crawl run ledger

mod connection;
mod repository;
mod resilient;
mod schema;
mod traits;

pub use connection::{
    ConnectionParams, Connector, QueryResult, Row, SqliteConnector, SqliteHandle, StoreHandle,
};
pub use repository::Store;
pub use resilient::{ResilientConnection, RetryPolicy};
pub use schema::initialize_schema;
pub use traits::{CrawlStore, StoreError, StoreResult};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Builds the global identity of an item
pub fn item_id(registry_id: &str, slug: &str) -> String {
    format!("{}:{}", registry_id, slug)
}

/// Fields written by an item upsert; `None` leaves the stored value alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemUpsert {
    pub registry_id: String,
    pub slug: String,
    pub name: Option<String>,
    pub url: Option<String>,
    pub metadata: Option<Map<String, JsonValue>>,
    pub content_hash: Option<String>,
    pub content_size: Option<u64>,
}

impl ItemUpsert {
    pub fn new(registry_id: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            registry_id: registry_id.into(),
            slug: slug.into(),
            ..Self::default()
        }
    }
}

/// Represents an item in the database
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub id: String,
    pub registry_id: String,
    pub slug: String,
    pub name: Option<String>,
    pub url: Option<String>,
    pub content_hash: Option<String>,
    pub content_size: u64,
    pub metadata: Option<Map<String, JsonValue>>,
    pub first_seen: String,
    pub last_seen: String,
    pub deleted: bool,
}

/// Item totals for one registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ItemCounts {
    pub active: u64,
    pub deleted: u64,
    pub pending: u64,
}

/// Declared mode of a crawl run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    /// Walk the whole registry, ignoring watermarks
    Full,
    /// Use watermarks to fetch only what changed
    #[default]
    Incremental,
}

impl CrawlMode {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "incremental" => Some(Self::Incremental),
            _ => None,
        }
    }
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

impl FromStr for CrawlMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_string(s)
            .ok_or_else(|| format!("unknown crawl mode '{}', expected full or incremental", s))
    }
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// What a crawl run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// Discover, register and download
    #[default]
    Crawl,
    /// Download registered items that have no content yet
    Resume,
}

impl RunKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Crawl => "crawl",
            Self::Resume => "resume",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "crawl" => Some(Self::Crawl),
            "resume" => Some(Self::Resume),
            _ => None,
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Outcome counters of one crawl run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub discovered: u64,
    pub downloaded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub changed: u64,
}

/// Everything recorded when a run reaches its terminal status
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub stats: RunStats,
    pub duration: Duration,
    pub status: RunStatus,
    pub error: Option<String>,
}

/// Represents a crawl run in the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlRunRecord {
    pub id: uuid::Uuid,
    pub registry_id: String,
    pub mode: CrawlMode,
    pub kind: RunKind,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_s: Option<f64>,
    pub stats: RunStats,
    pub status: RunStatus,
    pub error: Option<String>,
}
