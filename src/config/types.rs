use crate::executor::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Main configuration structure for Kumo-Crawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawl: CrawlSection,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub profiles: ProfilesConfig,
}

/// The `[crawl]` table: the seed URL plus the session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlSection {
    /// URL the crawl starts from (depth 0)
    #[serde(rename = "start-url")]
    pub start_url: String,

    #[serde(flatten)]
    pub settings: CrawlConfig,
}

/// Per-session crawl configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlConfig {
    /// Maximum number of URLs admitted into the frontier
    pub max_pages: u32,

    /// Maximum link depth from the start URL
    pub max_depth: u32,

    /// Whether robots.txt rules are honored
    pub respect_robots: bool,

    /// Minimum time between two requests to the same domain (milliseconds)
    pub delay: u64,

    /// Number of parallel workers for the session
    pub concurrent: u32,

    /// Regular expressions a URL must match (any) to be crawled; empty means all
    pub include_patterns: Vec<String>,

    /// Regular expressions that exclude a URL (any match)
    pub exclude_patterns: Vec<String>,

    /// Per-request timeout (milliseconds)
    pub timeout: u64,

    pub authentication: AuthConfig,

    pub extraction: ExtractionConfig,

    /// Use only this method, without fallback
    pub force_method: Option<Method>,

    pub enable_api_scraping: bool,
    pub enable_dynamic_scraping: bool,
    pub enable_stealth_scraping: bool,
    pub enable_adaptive_scraping: bool,

    pub captcha_solver: CaptchaSolver,

    pub stealth_level: StealthLevel,

    /// When false the learned profile is read but never updated
    pub learning_mode: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 100,
            max_depth: 3,
            respect_robots: true,
            delay: 1000,
            concurrent: 2,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            timeout: 30_000,
            authentication: AuthConfig::default(),
            extraction: ExtractionConfig::default(),
            force_method: None,
            enable_api_scraping: false,
            enable_dynamic_scraping: true,
            enable_stealth_scraping: true,
            enable_adaptive_scraping: true,
            captcha_solver: CaptchaSolver::Skip,
            stealth_level: StealthLevel::Basic,
            learning_mode: true,
        }
    }
}

impl CrawlConfig {
    /// Per-request timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Pacing delay as a Duration
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay)
    }

    /// Returns whether a method may be used by the selector
    ///
    /// Static fetching is always enabled; `force_method` overrides the flags.
    pub fn is_method_enabled(&self, method: Method) -> bool {
        if let Some(forced) = self.force_method {
            return forced == method;
        }
        match method {
            Method::Static => true,
            Method::Dynamic => self.enable_dynamic_scraping,
            Method::Stealth => self.enable_stealth_scraping,
            Method::Api => self.enable_api_scraping,
        }
    }
}

/// Authentication mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    Basic,
    Form,
    Bearer,
    Cookie,
}

/// A cookie supplied in configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
}

/// Authentication configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub auth_type: AuthType,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Bearer token
    pub token: Option<String>,

    /// Cookies injected for `type = "cookie"`
    pub cookies: Vec<CookieSpec>,

    /// Page holding the login form
    pub login_url: Option<String>,

    /// Preferred selectors, tried before the built-in fallback lists
    pub username_field: Option<String>,
    pub password_field: Option<String>,
    pub submit_button: Option<String>,
    pub login_trigger: Option<String>,

    /// Element whose appearance proves a successful login
    pub success_indicator: Option<String>,
}

impl AuthConfig {
    /// Returns true when some authentication is configured
    pub fn is_enabled(&self) -> bool {
        self.auth_type != AuthType::None
    }
}

/// Structured-data extraction options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ExtractionConfig {
    pub enable_structured_data: bool,

    /// Schema names to apply; empty means every built-in schema
    pub data_types: Vec<String>,

    /// Items scoring below this threshold are not surfaced
    pub quality_threshold: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enable_structured_data: false,
            data_types: Vec::new(),
            quality_threshold: 0.5,
        }
    }
}

/// What to do when a CAPTCHA is detected by the stealth executor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CaptchaSolver {
    /// Fail fast with `CaptchaDetected`
    #[default]
    Skip,
    /// Hand the page to a manual solver
    Manual,
    /// Hand the page to a named solving service
    Service(String),
}

impl From<String> for CaptchaSolver {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "skip" | "" => Self::Skip,
            "manual" => Self::Manual,
            _ => Self::Service(value),
        }
    }
}

impl From<CaptchaSolver> for String {
    fn from(value: CaptchaSolver) -> Self {
        value.to_string()
    }
}

impl fmt::Display for CaptchaSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Manual => write!(f, "manual"),
            Self::Service(name) => write!(f, "{}", name),
        }
    }
}

/// Fingerprint randomization intensity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StealthLevel {
    #[default]
    Basic,
    Advanced,
    Maximum,
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

impl UserAgentConfig {
    /// Formats the identity string: `Name/Version (+ContactURL; ContactEmail)`
    pub fn user_agent_string(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "KumoCrawl".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://example.com/kumo-crawl".to_string(),
            contact_email: "crawler@example.com".to_string(),
        }
    }
}

/// Where learned profiles are persisted between runs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilesConfig {
    /// JSON file imported at startup and exported at exit
    pub path: Option<String>,
}
