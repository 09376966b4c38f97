//! Skill Observatory: incremental registry crawler
//!
//! This crate discovers, downloads and tracks "skills" published across
//! independent registries. A registry plugs in through the
//! [`crawler::RegistrySource`] trait; the [`crawler::Crawler`] turns it into a
//! resumable, concurrency-safe synchronization run against a shared store.

pub mod config;
pub mod crawler;
pub mod output;
pub mod store;

use thiserror::Error;

/// Main error type for Skill Observatory operations
#[derive(Debug, Error)]
pub enum ObservatoryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Discovery failed for {registry}: {error:#}")]
    Discovery {
        registry: String,
        error: anyhow::Error,
    },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Content sink error for {identity}: {source}")]
    Sink {
        identity: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Store task failed: {0}")]
    StoreTask(#[from] tokio::task::JoinError),

    #[error("Worker pool closed")]
    PoolClosed,

    #[error("Unknown registry: {0}")]
    UnknownRegistry(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Skill Observatory operations
pub type Result<T> = std::result::Result<T, ObservatoryError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{content_hash, Crawler, DownloadOutcome, ItemDescriptor, RegistrySource, RunStats};
pub use store::{CrawlMode, RunKind, RunStatus, Store};
