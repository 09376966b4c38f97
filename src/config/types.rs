use crate::store::CrawlMode;
use serde::Deserialize;

/// Main configuration structure for Skill Observatory
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub store: StoreConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "registry")]
    pub registries: Vec<RegistryEntry>,
}

impl Config {
    /// Looks up a registry entry by id
    pub fn registry(&self, id: &str) -> Option<&RegistryEntry> {
        self.registries.iter().find(|r| r.id == id)
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Number of concurrent download workers (1 = sequential)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Minimum time between outbound requests (milliseconds)
    #[serde(rename = "rate-limit-ms", default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,

    /// Crawl mode used when neither the registry nor the CLI overrides it
    #[serde(default)]
    pub mode: CrawlMode,

    /// Number of processed items between intermediate commits
    #[serde(rename = "commit-every", default = "default_commit_every")]
    pub commit_every: usize,

    /// Soft-delete items a full crawl no longer reports
    #[serde(rename = "mark-missing-deleted", default = "default_true")]
    pub mark_missing_deleted: bool,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Datastore connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Database URL (path, `file:` URI or `:memory:`)
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Credential handed to the connector on every (re)connect
    #[serde(rename = "auth-token", default)]
    pub auth_token: String,

    /// Attempts per statement before a transient error becomes fatal
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry; doubles on each further attempt
    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory under which downloaded content is written, one folder per registry
    #[serde(rename = "content-dir")]
    pub content_dir: String,

    /// Directory receiving the changed-items manifests
    #[serde(rename = "manifest-dir")]
    pub manifest_dir: String,
}

/// A registry served as a JSON index plus per-item content documents
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEntry {
    /// Registry identifier (e.g. "skills-hub")
    pub id: String,

    /// URL of the JSON index listing the registry's items
    #[serde(rename = "index-url")]
    pub index_url: String,

    /// Content URL with a `{slug}` placeholder, used when an item has no `content_url`
    #[serde(rename = "content-url-template", default)]
    pub content_url_template: Option<String>,

    /// Overrides `crawler.workers`
    #[serde(default)]
    pub workers: Option<usize>,

    /// Overrides `crawler.rate-limit-ms`
    #[serde(rename = "rate-limit-ms", default)]
    pub rate_limit_ms: Option<u64>,

    /// Overrides `crawler.mode`
    #[serde(default)]
    pub mode: Option<CrawlMode>,

    /// Letter-range shard restricting slugs by first character (e.g. "A-F")
    #[serde(default)]
    pub shard: Option<String>,
}

fn default_workers() -> usize {
    1
}

fn default_rate_limit_ms() -> u64 {
    500
}

fn default_commit_every() -> usize {
    500
}

fn default_true() -> bool {
    true
}

fn default_store_url() -> String {
    "file:observatory.db".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}
