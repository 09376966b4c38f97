use crate::config::types::{Config, CrawlerConfig, RegistryEntry, StoreConfig, UserAgentConfig};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_store_config(&config.store)?;
    validate_output_config(&config.output)?;
    validate_registries(&config.registries)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_workers(config.workers)?;

    if config.commit_every < 1 {
        return Err(ConfigError::Validation(format!(
            "commit_every must be >= 1, got {}",
            config.commit_every
        )));
    }

    Ok(())
}

fn validate_workers(workers: usize) -> Result<(), ConfigError> {
    if !(1..=64).contains(&workers) {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 64, got {}",
            workers
        )));
    }
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.url.is_empty() {
        return Err(ConfigError::Validation("store url cannot be empty".to_string()));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &crate::config::types::OutputConfig) -> Result<(), ConfigError> {
    if config.content_dir.is_empty() {
        return Err(ConfigError::Validation(
            "content_dir cannot be empty".to_string(),
        ));
    }

    if config.manifest_dir.is_empty() {
        return Err(ConfigError::Validation(
            "manifest_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates registry entries
fn validate_registries(registries: &[RegistryEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for entry in registries {
        validate_registry_id(&entry.id)?;

        if !seen.insert(entry.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Registry '{}' is declared more than once",
                entry.id
            )));
        }

        let url = Url::parse(&entry.index_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid index URL '{}': {}", entry.index_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "Index URL '{}' must use HTTP or HTTPS",
                entry.index_url
            )));
        }

        if let Some(template) = &entry.content_url_template {
            if !template.contains("{slug}") {
                return Err(ConfigError::Validation(format!(
                    "content_url_template for '{}' must contain '{{slug}}'",
                    entry.id
                )));
            }
        }

        if let Some(workers) = entry.workers {
            validate_workers(workers)?;
        }

        if let Some(shard) = &entry.shard {
            validate_shard(shard)?;
        }
    }

    Ok(())
}

/// Registry ids end up in file names and state keys
fn validate_registry_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::Validation(
            "registry id cannot be empty".to_string(),
        ));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "registry id must contain only ASCII letters, digits, '-' and '_', got '{}'",
            id
        )));
    }

    Ok(())
}

/// Shards look like "A-F": two single letters joined by a hyphen
fn validate_shard(shard: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = shard.split('-').collect();
    let valid = parts.len() == 2
        && parts
            .iter()
            .all(|p| p.chars().count() == 1 && p.chars().all(|c| c.is_ascii_alphanumeric()));

    if !valid {
        return Err(ConfigError::Validation(format!(
            "Invalid shard '{}', expected a range like 'A-F'",
            shard
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
