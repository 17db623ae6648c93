//! Chrome driver over the DevTools protocol
//!
//! Each context is a dedicated page with its own user agent, viewport,
//! timezone and headers. Cookies are installed right before the first
//! navigation, scoped to the target URL.

use super::browser::{BrowserContext, BrowserDriver, ContextOptions, Cookie, Navigation};
use crate::{KumoError, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use url::Url;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Quiet period after `document.readyState` reaches `complete`
const SETTLE_TIME: Duration = Duration::from_millis(500);

const MASK_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    window.chrome = { runtime: {} };
"#;

fn crash(e: CdpError) -> KumoError {
    KumoError::BrowserCrash {
        reason: e.to_string(),
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Launches and owns a headless Chrome process
pub struct ChromeDriver {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromeDriver {
    pub async fn launch() -> Result<Self> {
        let config = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .build()
            .map_err(|reason| KumoError::BrowserCrash { reason })?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(crash)?;
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        tracing::info!("Launched headless Chrome");
        Ok(Self { browser, handler })
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn new_context(&self, options: ContextOptions) -> Result<Box<dyn BrowserContext>> {
        let page = self.browser.new_page("about:blank").await.map_err(crash)?;

        if let Some(user_agent) = &options.user_agent {
            page.execute(SetUserAgentOverrideParams::new(user_agent.clone()))
                .await
                .map_err(crash)?;
        }
        if let Some(viewport) = options.viewport {
            page.execute(SetDeviceMetricsOverrideParams::new(
                viewport.width as i64,
                viewport.height as i64,
                1.0,
                false,
            ))
            .await
            .map_err(crash)?;
        }
        if let Some(timezone) = &options.timezone {
            page.execute(SetTimezoneOverrideParams::new(timezone.clone()))
                .await
                .map_err(crash)?;
        }
        if !options.extra_headers.is_empty() {
            let headers: serde_json::Map<String, serde_json::Value> = options
                .extra_headers
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            page.execute(SetExtraHttpHeadersParams::new(Headers::new(
                serde_json::Value::Object(headers),
            )))
            .await
            .map_err(crash)?;
        }
        if options.mask_webdriver {
            let mut script = MASK_SCRIPT.to_string();
            if let Some(locale) = &options.locale {
                script.push_str(&format!(
                    "Object.defineProperty(navigator, 'languages', {{ get: () => [{}] }});",
                    js_string(locale)
                ));
            }
            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(script))
                .await
                .map_err(crash)?;
        }

        Ok(Box::new(ChromeContext {
            page,
            pending_cookies: Mutex::new(options.cookies),
        }))
    }
}

struct ChromeContext {
    page: Page,
    pending_cookies: Mutex<Vec<Cookie>>,
}

impl ChromeContext {
    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T> {
        self.page
            .evaluate(script)
            .await
            .map_err(crash)?
            .into_value::<T>()
            .map_err(KumoError::from)
    }

    fn take_cookies(&self) -> Vec<Cookie> {
        let mut pending = self.pending_cookies.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *pending)
    }
}

#[async_trait]
impl BrowserContext for ChromeContext {
    async fn goto(&self, url: &Url, timeout: Duration) -> Result<Navigation> {
        let cookies: Vec<CookieParam> = self
            .take_cookies()
            .into_iter()
            .map(|c| {
                let mut param = CookieParam::new(c.name, c.value);
                param.url = Some(url.to_string());
                param.domain = c.domain;
                param.path = c.path;
                param
            })
            .collect();
        if !cookies.is_empty() {
            self.page.set_cookies(cookies).await.map_err(crash)?;
        }

        tokio::time::timeout(timeout, self.page.goto(url.as_str()))
            .await
            .map_err(|_| KumoError::Timeout {
                url: url.to_string(),
            })?
            .map_err(|e| KumoError::Network {
                url: url.to_string(),
                reason: e.to_string(),
                status: None,
            })?;

        let status: Option<u16> = self
            .eval(
                "(() => { const n = performance.getEntriesByType('navigation')[0]; \
                 return n && n.responseStatus ? n.responseStatus : null; })()"
                    .to_string(),
            )
            .await
            .unwrap_or(None);

        Ok(Navigation {
            final_url: self.current_url().await.unwrap_or_else(|_| url.clone()),
            status,
        })
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let state: String = self.eval("document.readyState".to_string()).await?;
            if state == "complete" {
                tokio::time::sleep(SETTLE_TIME.min(deadline.saturating_duration_since(Instant::now())))
                    .await;
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        tracing::debug!("Page did not settle within {:?}", timeout);
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        self.page.content().await.map_err(crash)
    }

    async fn current_url(&self) -> Result<Url> {
        let current = self
            .page
            .url()
            .await
            .map_err(crash)?
            .ok_or_else(|| KumoError::BrowserCrash {
                reason: "page has no URL".to_string(),
            })?;
        Url::parse(&current).map_err(|e| KumoError::BrowserCrash {
            reason: format!("page reported invalid URL {}: {}", current, e),
        })
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        self.eval(format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; \
             const r = el.getBoundingClientRect(); const s = window.getComputedStyle(el); \
             return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; }})()",
            js_string(selector)
        ))
        .await
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_visible(selector).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let found: bool = self
            .eval(format!(
                "(() => {{ const el = document.querySelector({}); if (!el) return false; \
                 el.focus(); el.value = {}; \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
                js_string(selector),
                js_string(value)
            ))
            .await?;
        if found {
            Ok(())
        } else {
            Err(KumoError::BrowserCrash {
                reason: format!("element {} disappeared before it could be filled", selector),
            })
        }
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let element = self.page.find_element(selector).await.map_err(crash)?;
        element.click().await.map_err(crash)?;
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<()> {
        let element = self.page.find_element(selector).await.map_err(crash)?;
        element.press_key("Enter").await.map_err(crash)?;
        Ok(())
    }

    async fn scroll_by(&self, pixels: i64) -> Result<()> {
        let _: serde_json::Value = self
            .eval(format!("(() => {{ window.scrollBy(0, {}); return null; }})()", pixels))
            .await?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        let cookies = self.page.get_cookies().await.map_err(crash)?;
        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: Some(c.domain),
                path: Some(c.path),
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.page.clone().close().await.map_err(crash)
    }
}
