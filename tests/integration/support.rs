//! Shared helpers and test doubles for the integration tests

use async_trait::async_trait;
use kumo_crawl::config::{CrawlConfig, UserAgentConfig};
use kumo_crawl::executor::{
    BrowserContext, BrowserDriver, ContextOptions, Cookie, FetchOptions, Method, Navigation,
    PageKind, RawPage, StrategyExecutor,
};
use kumo_crawl::{KumoError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

/// Fast crawl settings for tests
pub fn test_config(max_pages: u32, max_depth: u32, concurrent: u32) -> CrawlConfig {
    CrawlConfig {
        max_pages,
        max_depth,
        concurrent,
        delay: 0,
        timeout: 5_000,
        ..CrawlConfig::default()
    }
}

/// HTML page with a title, some body text and the given links
pub fn html_page(title: &str, links: &[String]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<li><a href="{}">{}</a></li>"#, href, href))
        .collect();
    format!(
        r#"<html><head><title>{title}</title></head><body>
        <main><h1>{title}</h1>
        <p>This page exists so the crawler has something worth reading on {title}.</p>
        <ul>{anchors}</ul></main>
        </body></html>"#
    )
}

/// Mounts an HTML page on a wiremock server, expecting `hits` requests when given
pub async fn mount_page(server: &MockServer, route: &str, body: String, hits: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"));
    let mock = match hits {
        Some(n) => mock.expect(n),
        None => mock,
    };
    mock.mount(server).await;
}

/// Executor serving a generated site: `/p{n}` links to `/p{2n+1}` and `/p{2n+2}`
///
/// Every fetch is counted per URL.
pub struct SyntheticSite {
    method: Method,
    latency: Duration,
    fetches: Mutex<HashMap<String, usize>>,
}

impl SyntheticSite {
    pub fn new(method: Method, latency: Duration) -> Self {
        Self {
            method,
            latency,
            fetches: Mutex::new(HashMap::new()),
        }
    }

    pub fn fetches(&self) -> HashMap<String, usize> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl StrategyExecutor for SyntheticSite {
    fn method(&self) -> Method {
        self.method
    }

    async fn fetch(&self, url: &Url, _options: &FetchOptions) -> Result<RawPage> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;
        tokio::time::sleep(self.latency).await;

        let n: u64 = url
            .path()
            .trim_start_matches("/p")
            .parse()
            .unwrap_or(0);
        let links = vec![
            format!("https://synthetic.test/p{}", 2 * n + 1),
            format!("https://synthetic.test/p{}", 2 * n + 2),
            // Already-seen links must not be fetched again
            format!("https://synthetic.test/p{}", n),
            "https://synthetic.test/p0".to_string(),
        ];
        Ok(RawPage {
            final_url: url.clone(),
            status: 200,
            html: html_page(&format!("Page {}", n), &links),
            kind: PageKind::Html,
            headers: HashMap::new(),
            timing_ms: self.latency.as_millis() as u64,
            method: self.method,
        })
    }
}

/// Executor that always succeeds or always fails, counting calls
pub struct FixedOutcome {
    method: Method,
    succeed: bool,
    calls: AtomicUsize,
}

impl FixedOutcome {
    pub fn new(method: Method, succeed: bool) -> Self {
        Self {
            method,
            succeed,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StrategyExecutor for FixedOutcome {
    fn method(&self) -> Method {
        self.method
    }

    async fn fetch(&self, url: &Url, _options: &FetchOptions) -> Result<RawPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.succeed {
            return Err(KumoError::Network {
                url: url.to_string(),
                reason: format!("{} blocked", self.method),
                status: Some(403),
            });
        }
        Ok(RawPage {
            final_url: url.clone(),
            status: 200,
            html: html_page("Learned", &[]),
            kind: PageKind::Html,
            headers: HashMap::new(),
            timing_ms: 1,
            method: self.method,
        })
    }
}

/// Browser double that serves one fixed login page
///
/// Only selectors in `visible` exist on the page. Counts opened and closed
/// contexts.
#[derive(Default)]
pub struct LoginPageBrowser {
    pub visible: HashSet<String>,
    pub cookies: Vec<Cookie>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl LoginPageBrowser {
    pub fn with_visible(selectors: &[&str]) -> Self {
        Self {
            visible: selectors.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl BrowserDriver for LoginPageBrowser {
    async fn new_context(&self, _options: ContextOptions) -> Result<Box<dyn BrowserContext>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoginPage {
            visible: self.visible.clone(),
            cookies: self.cookies.clone(),
            current: Mutex::new(None),
            closed: self.closed.clone(),
        }))
    }
}

struct LoginPage {
    visible: HashSet<String>,
    cookies: Vec<Cookie>,
    current: Mutex<Option<Url>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserContext for LoginPage {
    async fn goto(&self, url: &Url, _timeout: Duration) -> Result<Navigation> {
        *self.current.lock().unwrap() = Some(url.clone());
        Ok(Navigation {
            final_url: url.clone(),
            status: Some(200),
        })
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        Ok("<html><body><form><input type='password'></form></body></html>".to_string())
    }

    async fn current_url(&self) -> Result<Url> {
        self.current
            .lock()
            .unwrap()
            .clone()
            .ok_or(KumoError::BrowserUnavailable)
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        Ok(self.visible.contains(selector))
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<bool> {
        Ok(self.visible.contains(selector))
    }

    async fn fill(&self, _selector: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    async fn click(&self, _selector: &str) -> Result<()> {
        Ok(())
    }

    async fn press_enter(&self, _selector: &str) -> Result<()> {
        Ok(())
    }

    async fn scroll_by(&self, _pixels: i64) -> Result<()> {
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        Ok(self.cookies.clone())
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
