use crate::config::types::Config;
use crate::config::validation::validate;
use crate::crawler::content_hash;
use crate::ConfigError;
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so a run can be tied to the exact configuration it used.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read(path)?;
    Ok(content_hash(&content))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CrawlMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID_CONFIG: &str = r#"
[crawler]
workers = 4
rate-limit-ms = 250
mode = "full"

[user-agent]
crawler-name = "TestObservatory"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[store]
url = "file:test.db"

[output]
content-dir = "./data"
manifest-dir = "./data/manifests"

[[registry]]
id = "skills-hub"
index-url = "https://skills.example.com/index.json"
content-url-template = "https://skills.example.com/raw/{slug}/SKILL.md"
shard = "A-M"

[[registry]]
id = "plugin-index"
index-url = "https://plugins.example.com/index.json"
workers = 1
mode = "incremental"
"#;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(VALID_CONFIG);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.workers, 4);
        assert_eq!(config.crawler.rate_limit_ms, 250);
        assert_eq!(config.crawler.mode, CrawlMode::Full);
        assert_eq!(config.crawler.commit_every, 500);
        assert!(config.crawler.mark_missing_deleted);
        assert_eq!(config.store.max_attempts, 3);
        assert_eq!(config.store.base_delay_ms, 1000);
        assert_eq!(config.registries.len(), 2);

        let hub = config.registry("skills-hub").unwrap();
        assert_eq!(hub.shard.as_deref(), Some("A-M"));
        let plugins = config.registry("plugin-index").unwrap();
        assert_eq!(plugins.mode, Some(CrawlMode::Incremental));
        assert!(config.registry("missing").is_none());
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config = VALID_CONFIG.replace("workers = 4", "workers = 0");
        let result = parse_config(&config);
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_duplicate_registry_rejected() {
        let config = VALID_CONFIG.replace("id = \"plugin-index\"", "id = \"skills-hub\"");
        let result = parse_config(&config);
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_template_without_placeholder_rejected() {
        let config = VALID_CONFIG.replace("/raw/{slug}/SKILL.md", "/raw/SKILL.md");
        let result = parse_config(&config);
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
