//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests made by the bundled registry
//! source, including:
//! - Building HTTP clients with proper user agent strings
//! - HEAD requests to compare cache validators before downloading
//! - GET requests to fetch index and content documents
//! - Error classification

use crate::config::UserAgentConfig;
use reqwest::header::ETAG;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchResult {
    /// Successfully fetched the document
    Success {
        /// HTTP status code
        status_code: u16,
        /// ETag header value, if the server sent one
        etag: Option<String>,
        /// Response body
        body: Vec<u8>,
    },

    /// Non-success HTTP status
    HttpError {
        /// The HTTP status code
        status_code: u16,
    },

    /// Network error (connection refused, timeout, etc.)
    NetworkError {
        /// Error description
        error: String,
    },
}

impl FetchResult {
    /// Whether the status means the document is gone for good
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            Self::HttpError {
                status_code: 404 | 410
            }
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::HttpError { status_code: 429 })
    }

    /// Short human-readable reason for a failed fetch
    pub fn describe(&self) -> String {
        match self {
            Self::Success { status_code, .. } => format!("HTTP {}", status_code),
            Self::HttpError { status_code } => match *status_code {
                404 | 410 => format!("not found (HTTP {})", status_code),
                429 => "rate limited (HTTP 429)".to_string(),
                code => format!("HTTP {}", code),
            },
            Self::NetworkError { error } => error.clone(),
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use skill_observatory::config::UserAgentConfig;
/// use skill_observatory::crawler::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "SkillObservatory".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent_string(config))
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Format: CrawlerName/Version (+ContactURL; ContactEmail)
pub fn user_agent_string(config: &UserAgentConfig) -> String {
    format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    )
}

/// Fetches a URL and classifies the outcome
///
/// | Condition | Result |
/// |-----------|--------|
/// | HTTP 2xx | Success |
/// | HTTP 404 / 410 | HttpError (gone) |
/// | HTTP 429 | HttpError (rate limited) |
/// | Other status | HttpError |
/// | Timeout / connect failure | NetworkError |
pub async fn fetch_url(client: &Client, url: &str) -> FetchResult {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) => return network_error(e),
    };

    let status = response.status();

    if !status.is_success() {
        return FetchResult::HttpError {
            status_code: status.as_u16(),
        };
    }

    let etag = header_etag(response.headers());

    match response.bytes().await {
        Ok(body) => FetchResult::Success {
            status_code: status.as_u16(),
            etag,
            body: body.to_vec(),
        },
        Err(e) => network_error(e),
    }
}

/// Sends a HEAD request and returns the current ETag
///
/// # Returns
///
/// * `Ok(Some(String))` - ETag header value
/// * `Ok(None)` - No ETag header
/// * `Err(FetchResult)` - The HEAD request failed
pub async fn check_etag(client: &Client, url: &str) -> Result<Option<String>, FetchResult> {
    let response = client.head(url).send().await.map_err(network_error)?;

    let status = response.status();
    if status == StatusCode::METHOD_NOT_ALLOWED {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(FetchResult::HttpError {
            status_code: status.as_u16(),
        });
    }

    Ok(header_etag(response.headers()))
}

fn header_etag(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn network_error(e: reqwest::Error) -> FetchResult {
    let error = if e.is_timeout() {
        "Request timeout".to_string()
    } else if e.is_connect() {
        "Connection refused".to_string()
    } else {
        e.to_string()
    };
    FetchResult::NetworkError { error }
}
