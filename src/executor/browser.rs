//! Headless browser abstraction
//!
//! Executors and the login automator drive pages through these traits so the
//! browser engine can be swapped (Chrome via CDP, or a scripted fake in tests).

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// A browser cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Settings for a fresh isolated browser context
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub user_agent: Option<String>,
    pub viewport: Option<Viewport>,
    /// IANA timezone, e.g. `Europe/Berlin`
    pub timezone: Option<String>,
    pub locale: Option<String>,
    /// Hide `navigator.webdriver` and similar automation tells
    pub mask_webdriver: bool,
    pub extra_headers: Vec<(String, String)>,
    pub cookies: Vec<Cookie>,
}

/// Outcome of a navigation
#[derive(Debug, Clone)]
pub struct Navigation {
    pub final_url: Url,
    /// Main document status, when the engine reports it
    pub status: Option<u16>,
}

/// Launches isolated browser contexts
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn new_context(&self, options: ContextOptions) -> Result<Box<dyn BrowserContext>>;
}

/// One isolated browsing context with a single page
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn goto(&self, url: &Url, timeout: Duration) -> Result<Navigation>;

    /// Waits until the page stops loading, bounded by `timeout`
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()>;

    /// Serialized DOM of the current page
    async fn content(&self) -> Result<String>;

    async fn current_url(&self) -> Result<Url>;

    /// Returns true if an element matching `selector` exists and is rendered
    async fn is_visible(&self, selector: &str) -> Result<bool>;

    /// Waits for `selector` to become visible; false on timeout
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool>;

    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    async fn press_enter(&self, selector: &str) -> Result<()>;

    async fn scroll_by(&self, pixels: i64) -> Result<()>;

    async fn cookies(&self) -> Result<Vec<Cookie>>;

    async fn close(&self) -> Result<()>;
}

/// Scoped owner of a browser context
///
/// Call [`ContextGuard::close`] on the happy path; if the guard is dropped
/// without it (early return, error, panic), the context is closed from a
/// background task.
pub struct ContextGuard {
    context: Arc<dyn BrowserContext>,
    label: String,
    closed: bool,
}

impl ContextGuard {
    pub fn new(context: Box<dyn BrowserContext>, label: impl Into<String>) -> Self {
        Self {
            context: Arc::from(context),
            label: label.into(),
            closed: false,
        }
    }

    /// Closes the context, logging failures
    pub async fn close(mut self) {
        self.closed = true;
        match self.context.close().await {
            Ok(()) => tracing::trace!("Closed browser context for {}", self.label),
            Err(e) => tracing::warn!("Failed to close browser context for {}: {}", self.label, e),
        }
    }
}

impl Deref for ContextGuard {
    type Target = dyn BrowserContext;

    fn deref(&self) -> &Self::Target {
        self.context.as_ref()
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let context = Arc::clone(&self.context);
        let label = std::mem::take(&mut self.label);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = context.close().await {
                        tracing::warn!("Browser context cleanup failed for {}: {}", label, e);
                    }
                });
            }
            Err(_) => tracing::warn!("Browser context for {} dropped outside a runtime", label),
        }
    }
}
