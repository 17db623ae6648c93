use crate::config::types::{AuthConfig, AuthType, Config, CrawlConfig, UserAgentConfig};
use crate::extract::SCHEMA_NAMES;
use crate::ConfigError;
use regex::Regex;
use url::Url;

const MAX_PAGES_LIMIT: u32 = 100_000;
const MAX_DEPTH_LIMIT: u32 = 50;
const MAX_CONCURRENT_LIMIT: u32 = 100;
const MIN_TIMEOUT_MS: u64 = 100;
const MAX_TIMEOUT_MS: u64 = 600_000;

/// Validates the entire configuration file
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_start_url(&config.crawl.start_url)?;
    validate_crawl_config(&config.crawl.settings)?;
    validate_user_agent_config(&config.user_agent)?;
    Ok(())
}

/// Validates a crawl seed URL: http(s) with a host
pub fn validate_start_url(start_url: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(start_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid start URL '{}': {}", start_url, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "Start URL '{}' must use http or https",
            start_url
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidUrl(format!(
            "Start URL '{}' has no host",
            start_url
        )));
    }

    Ok(url)
}

/// Validates a per-session crawl configuration
pub fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.max_pages < 1 || config.max_pages > MAX_PAGES_LIMIT {
        return Err(ConfigError::Validation(format!(
            "max_pages must be between 1 and {}, got {}",
            MAX_PAGES_LIMIT, config.max_pages
        )));
    }

    if config.max_depth < 1 || config.max_depth > MAX_DEPTH_LIMIT {
        return Err(ConfigError::Validation(format!(
            "max_depth must be between 1 and {}, got {}",
            MAX_DEPTH_LIMIT, config.max_depth
        )));
    }

    if config.concurrent < 1 || config.concurrent > MAX_CONCURRENT_LIMIT {
        return Err(ConfigError::Validation(format!(
            "concurrent must be between 1 and {}, got {}",
            MAX_CONCURRENT_LIMIT, config.concurrent
        )));
    }

    if config.timeout < MIN_TIMEOUT_MS || config.timeout > MAX_TIMEOUT_MS {
        return Err(ConfigError::Validation(format!(
            "timeout must be between {}ms and {}ms, got {}ms",
            MIN_TIMEOUT_MS, MAX_TIMEOUT_MS, config.timeout
        )));
    }

    let threshold = config.extraction.quality_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::Validation(format!(
            "quality_threshold must be within [0, 1], got {}",
            threshold
        )));
    }

    for data_type in &config.extraction.data_types {
        if !SCHEMA_NAMES.contains(&data_type.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Unknown data type '{}', expected one of {:?}",
                data_type, SCHEMA_NAMES
            )));
        }
    }

    validate_patterns(&config.include_patterns)?;
    validate_patterns(&config.exclude_patterns)?;
    validate_auth_config(&config.authentication)?;

    Ok(())
}

/// Validates include/exclude patterns as regular expressions
fn validate_patterns(patterns: &[String]) -> Result<(), ConfigError> {
    for pattern in patterns {
        if pattern.is_empty() {
            return Err(ConfigError::InvalidPattern(
                "URL pattern cannot be empty".to_string(),
            ));
        }
        Regex::new(pattern)
            .map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", pattern, e)))?;
    }
    Ok(())
}

/// Validates the shape of an authentication block
///
/// Missing credentials are not a configuration error: they surface as
/// `MissingCredentials` when authentication runs.
fn validate_auth_config(config: &AuthConfig) -> Result<(), ConfigError> {
    if config.auth_type == AuthType::Form {
        let login_url = config.login_url.as_deref().ok_or_else(|| {
            ConfigError::Validation("form authentication requires login_url".to_string())
        })?;
        Url::parse(login_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid login_url: {}", e)))?;
    }
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
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

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| ConfigError::Validation(format!("Invalid email format: '{}'", email)))?;

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
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
