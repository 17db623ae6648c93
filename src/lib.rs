//! Kumo-Crawl: an adaptive whole-domain crawler
//!
//! This crate crawls a single web domain breadth-first, extracts structured
//! content from every page, and learns per site which fetching strategy
//! (static HTTP, rendered browser, stealth browser or JSON API) works best.

pub mod adaptive;
pub mod auth;
pub mod config;
pub mod crawler;
pub mod executor;
pub mod extract;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;
use uuid::Uuid;

/// Main error type for Kumo-Crawl operations
#[derive(Debug, Error)]
pub enum KumoError {
    #[error("Network error for {url}: {reason}")]
    Network {
        url: String,
        reason: String,
        status: Option<u16>,
    },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("URL disallowed by robots.txt: {url}")]
    RobotsDisallowed { url: String },

    #[error("CAPTCHA detected at {url} (solver policy: {policy})")]
    CaptchaDetected { url: String, policy: String },

    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthError),

    #[error("All methods failed for {url}: {}", format_attempts(.attempts))]
    AllMethodsFailed {
        url: String,
        attempts: Vec<(executor::Method, String)>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Browser crashed: {reason}")]
    BrowserCrash { reason: String },

    #[error("No browser driver available")]
    BrowserUnavailable,

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::SessionStatus,
        to: state::SessionStatus,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KumoError {
    /// Returns true if the selector should fall back to the next method
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::BrowserCrash { .. }
        )
    }

    /// Short category name used in failure records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } | Self::Http(_) => "network",
            Self::Timeout { .. } => "timeout",
            Self::RobotsDisallowed { .. } => "robots_disallowed",
            Self::CaptchaDetected { .. } => "captcha_detected",
            Self::Authentication(_) => "authentication",
            Self::AllMethodsFailed { .. } => "all_methods_failed",
            Self::InvalidConfig(_) => "invalid_config",
            Self::BrowserCrash { .. } | Self::BrowserUnavailable => "browser",
            Self::SessionNotFound(_) | Self::InvalidTransition { .. } => "session",
            Self::Storage(_) | Self::Serialization(_) | Self::Io(_) => "internal",
            Self::Url(_) => "url",
        }
    }

    /// Human-readable reason attached to failure records
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

fn format_attempts(attempts: &[(executor::Method, String)]) -> String {
    if attempts.is_empty() {
        return "no method was enabled".to_string();
    }
    attempts
        .iter()
        .map(|(method, reason)| format!("{}: {}", method, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Login-flow errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Credentials missing for the configured authentication type")]
    MissingCredentials,

    #[error("Username field not found on login page")]
    UsernameFieldNotFound,

    #[error("Password field not found on login page")]
    PasswordFieldNotFound,

    #[error("Login could not be verified")]
    LoginVerificationFailed,

    #[error("Form authentication requires a login URL")]
    MissingLoginUrl,

    #[error("Form authentication requires a browser driver")]
    BrowserUnavailable,

    #[error("Browser error during login: {0}")]
    Browser(String),
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

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Kumo-Crawl operations
pub type Result<T> = std::result::Result<T, KumoError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

/// Result type alias for login operations
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Result type alias for storage operations
pub use storage::StorageResult;

// Re-export commonly used types
pub use adaptive::{AdaptiveSelector, ProfileStore, WebsiteProfile};
pub use config::{AuthConfig, Config, CrawlConfig, ExtractionConfig};
pub use crawler::{Crawler, CrawlerBuilder, SessionProgress};
pub use executor::{Method, RawPage, StrategyExecutor};
pub use extract::{ExtractedContent, StructuredDataItem};
pub use state::SessionStatus;
pub use url::{extract_domain, normalize_url};
