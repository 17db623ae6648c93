//! Rendered-browser executor
//!
//! Loads the page in a fresh browser context, waits for the network to settle
//! and returns the serialized DOM. A crashed browser is retried once.

use super::browser::{BrowserDriver, ContextGuard, ContextOptions, Navigation};
use super::{detect_antibot, signals, FetchOptions, Method, PageKind, RawPage, StrategyExecutor};
use crate::{KumoError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Upper bound for the post-load network-idle wait
const NETWORK_IDLE_WAIT: Duration = Duration::from_secs(10);

/// Turns a finished navigation into a page, rejecting blocking statuses
pub(crate) fn rendered_page(
    url: &Url,
    navigation: Navigation,
    html: String,
    method: Method,
    started: Instant,
) -> Result<RawPage> {
    let status = navigation.status.unwrap_or(200);
    if status >= 400 {
        let mut reason = format!("HTTP {}", status);
        if detect_antibot(status, &html) {
            reason = format!("{} ({})", reason, signals::ANTIBOT_HINT);
        }
        return Err(KumoError::Network {
            url: url.to_string(),
            reason,
            status: Some(status),
        });
    }

    Ok(RawPage {
        final_url: navigation.final_url,
        status,
        html,
        kind: PageKind::Html,
        headers: HashMap::new(),
        timing_ms: started.elapsed().as_millis() as u64,
        method,
    })
}

/// Runs `render`, giving a crashed browser one retry in a fresh context
///
/// A second crash surfaces as a retryable `Network` failure so the selector
/// can fall back to another method.
pub(crate) async fn retry_after_crash<F, Fut>(url: &Url, mut render: F) -> Result<RawPage>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RawPage>>,
{
    match render().await {
        Err(KumoError::BrowserCrash { reason }) => {
            tracing::warn!("Browser crashed rendering {}: {}; retrying once", url, reason);
            render().await.map_err(|e| match e {
                KumoError::BrowserCrash { reason } => KumoError::Network {
                    url: url.to_string(),
                    reason: format!("browser crashed twice: {}", reason),
                    status: None,
                },
                other => other,
            })
        }
        other => other,
    }
}

/// `dynamic` strategy: headless render of the page
pub struct DynamicExecutor {
    driver: Arc<dyn BrowserDriver>,
    user_agent: String,
}

impl DynamicExecutor {
    pub fn new(driver: Arc<dyn BrowserDriver>, user_agent: impl Into<String>) -> Self {
        Self {
            driver,
            user_agent: user_agent.into(),
        }
    }

    async fn render(&self, url: &Url, options: &FetchOptions) -> Result<RawPage> {
        let started = Instant::now();
        let context = self
            .driver
            .new_context(ContextOptions {
                user_agent: Some(self.user_agent.clone()),
                extra_headers: options.headers.clone(),
                cookies: options.cookies.clone(),
                ..ContextOptions::default()
            })
            .await?;
        let guard = ContextGuard::new(context, url.as_str());

        let result = async {
            let navigation = guard.goto(url, options.timeout).await?;
            guard
                .wait_for_network_idle(options.timeout.min(NETWORK_IDLE_WAIT))
                .await?;
            let html = guard.content().await?;
            rendered_page(url, navigation, html, Method::Dynamic, started)
        }
        .await;

        guard.close().await;
        result
    }
}

#[async_trait]
impl StrategyExecutor for DynamicExecutor {
    fn method(&self) -> Method {
        Method::Dynamic
    }

    async fn fetch(&self, url: &Url, options: &FetchOptions) -> Result<RawPage> {
        retry_after_crash(url, || self.render(url, options)).await
    }
}
