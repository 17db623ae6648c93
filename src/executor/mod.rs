//! Strategy executors
//!
//! Four interchangeable fetchers sit behind the [`StrategyExecutor`]
//! capability, keyed by their [`Method`] tag:
//! - `static`: plain HTTP GET
//! - `dynamic`: headless-browser render
//! - `stealth`: rendered browser with fingerprint randomization and CAPTCHA policy
//! - `api`: tries a same-origin JSON endpoint
//!
//! Browser-backed executors talk to a [`BrowserDriver`]; a Chrome implementation
//! is available behind the `browser` cargo feature.

mod api;
mod browser;
#[cfg(feature = "browser")]
mod chrome;
mod dynamic;
mod signals;
mod static_http;
mod stealth;
#[cfg(test)]
pub(crate) mod testing;

pub use api::ApiExecutor;
pub use browser::{
    BrowserContext, BrowserDriver, ContextGuard, ContextOptions, Cookie, Navigation, Viewport,
};
#[cfg(feature = "browser")]
pub use chrome::ChromeDriver;
pub use dynamic::DynamicExecutor;
pub use signals::{detect_antibot, detect_captcha, is_js_shell, visible_text_len, PageSignals};
pub use static_http::{build_http_client, StaticExecutor};
pub use stealth::{CaptchaDelegate, Fingerprint, StealthExecutor};

use crate::config::{CaptchaSolver, CrawlConfig, StealthLevel};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Fetching technique tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Static,
    Dynamic,
    Stealth,
    Api,
}

impl Method {
    /// All methods, cheapest first
    pub const ALL: [Method; 4] = [Method::Static, Method::Dynamic, Method::Stealth, Method::Api];

    /// Tie-breaking weight that favors cheaper methods
    pub fn cost_weight(&self) -> f64 {
        match self {
            Self::Static => 1.0,
            Self::Dynamic => 0.95,
            Self::Stealth => 0.9,
            Self::Api => 0.85,
        }
    }

    /// Returns true if the method needs a browser driver
    pub fn needs_browser(&self) -> bool {
        matches!(self, Self::Dynamic | Self::Stealth)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Stealth => "stealth",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload format of a fetched page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Html,
    Json,
}

/// A fetched page, before extraction
#[derive(Debug, Clone)]
pub struct RawPage {
    /// URL after redirects
    pub final_url: Url,
    /// HTTP status (200 for rendered pages without a known status)
    pub status: u16,
    /// HTML markup, or the JSON payload for [`PageKind::Json`]
    pub html: String,
    pub kind: PageKind,
    /// Response headers, lowercase names
    pub headers: HashMap<String, String>,
    pub timing_ms: u64,
    pub method: Method,
}

/// Per-request options derived from the session configuration and auth state
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    /// Minimum spacing between requests to the target domain
    pub delay: Duration,
    /// Extra headers, e.g. `Authorization`
    pub headers: Vec<(String, String)>,
    /// Cookies to send (stored or configured auth cookies)
    pub cookies: Vec<Cookie>,
    pub captcha_solver: CaptchaSolver,
    pub stealth_level: StealthLevel,
}

impl FetchOptions {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            timeout: config.timeout(),
            delay: config.delay(),
            headers: Vec::new(),
            cookies: Vec::new(),
            captcha_solver: config.captcha_solver.clone(),
            stealth_level: config.stealth_level,
        }
    }

    /// `Cookie` header value for the configured cookies, if any
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from_config(&CrawlConfig::default())
    }
}

/// Common capability of every fetching strategy
#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    /// The tag this executor is registered under
    fn method(&self) -> Method;

    /// Fetches a page
    ///
    /// Implementations release every browser/page/context resource on all
    /// exit paths.
    async fn fetch(&self, url: &Url, options: &FetchOptions) -> Result<RawPage>;
}

/// Executors keyed by method tag
#[derive(Clone, Default)]
pub struct ExecutorSet {
    executors: HashMap<Method, Arc<dyn StrategyExecutor>>,
}

impl ExecutorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under its own method tag, replacing any previous one
    pub fn insert(&mut self, executor: Arc<dyn StrategyExecutor>) {
        self.executors.insert(executor.method(), executor);
    }

    pub fn get(&self, method: Method) -> Option<&Arc<dyn StrategyExecutor>> {
        self.executors.get(&method)
    }

    pub fn contains(&self, method: Method) -> bool {
        self.executors.contains_key(&method)
    }

    /// Registered methods, cheapest first
    pub fn methods(&self) -> Vec<Method> {
        Method::ALL
            .into_iter()
            .filter(|m| self.executors.contains_key(m))
            .collect()
    }
}

impl fmt::Debug for ExecutorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorSet")
            .field("methods", &self.methods())
            .finish()
    }
}
