//! Scripted browser used by unit tests

use super::browser::{BrowserContext, BrowserDriver, ContextOptions, Cookie, Navigation};
use crate::{KumoError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Everything the scripted browser observed
#[derive(Debug, Default)]
pub struct Journal {
    pub options: Vec<ContextOptions>,
    pub visited: Vec<String>,
    pub filled: Vec<(String, String)>,
    pub clicked: Vec<String>,
    pub entered: Vec<String>,
    pub scrolled: Vec<i64>,
}

/// Browser whose pages and DOM behavior are set up by the test
#[derive(Default)]
pub struct ScriptedDriver {
    pub pages: HashMap<String, (u16, String)>,
    pub default_html: String,
    pub visible: HashSet<String>,
    /// Selectors that only become visible after a click or Enter
    pub revealed: HashSet<String>,
    /// Cookies reported once a submit control was clicked or Enter pressed
    pub session_cookies: Vec<Cookie>,
    /// URL reported after submitting the login form
    pub url_after_submit: Option<Url>,
    /// Number of contexts whose navigation crashes
    pub crashes: usize,
    pub launched: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    pub journal: Arc<Mutex<Journal>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self {
            default_html: "<html><body></body></html>".to_string(),
            ..Default::default()
        }
    }

    pub fn page(mut self, url: &str, status: u16, html: &str) -> Self {
        self.pages.insert(url.to_string(), (status, html.to_string()));
        self
    }

    pub fn visible(mut self, selector: &str) -> Self {
        self.visible.insert(selector.to_string());
        self
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn launched_count(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn new_context(&self, options: ContextOptions) -> Result<Box<dyn BrowserContext>> {
        let n = self.launched.fetch_add(1, Ordering::SeqCst);
        self.journal.lock().unwrap().options.push(options);
        Ok(Box::new(ScriptedContext {
            crash: n < self.crashes,
            pages: self.pages.clone(),
            default_html: self.default_html.clone(),
            visible: self.visible.clone(),
            revealed: self.revealed.clone(),
            session_cookies: self.session_cookies.clone(),
            url_after_submit: self.url_after_submit.clone(),
            current: Mutex::new(None),
            submitted: Mutex::new(false),
            closed: self.closed.clone(),
            journal: self.journal.clone(),
        }))
    }
}

struct ScriptedContext {
    crash: bool,
    pages: HashMap<String, (u16, String)>,
    default_html: String,
    visible: HashSet<String>,
    revealed: HashSet<String>,
    session_cookies: Vec<Cookie>,
    url_after_submit: Option<Url>,
    current: Mutex<Option<Url>>,
    submitted: Mutex<bool>,
    closed: Arc<AtomicUsize>,
    journal: Arc<Mutex<Journal>>,
}

impl ScriptedContext {
    fn submit(&self) {
        *self.submitted.lock().unwrap() = true;
        if let Some(url) = &self.url_after_submit {
            *self.current.lock().unwrap() = Some(url.clone());
        }
    }
}

#[async_trait]
impl BrowserContext for ScriptedContext {
    async fn goto(&self, url: &Url, _timeout: Duration) -> Result<Navigation> {
        if self.crash {
            return Err(KumoError::BrowserCrash {
                reason: "target closed".to_string(),
            });
        }
        self.journal.lock().unwrap().visited.push(url.to_string());
        *self.current.lock().unwrap() = Some(url.clone());
        let status = self.pages.get(url.as_str()).map(|(s, _)| *s).unwrap_or(200);
        Ok(Navigation {
            final_url: url.clone(),
            status: Some(status),
        })
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        let current = self.current.lock().unwrap().clone();
        Ok(current
            .and_then(|u| self.pages.get(u.as_str()).map(|(_, html)| html.clone()))
            .unwrap_or_else(|| self.default_html.clone()))
    }

    async fn current_url(&self) -> Result<Url> {
        self.current
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| KumoError::BrowserCrash {
                reason: "no page loaded".to_string(),
            })
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        let revealed = *self.submitted.lock().unwrap() && self.revealed.contains(selector);
        Ok(self.visible.contains(selector) || revealed)
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<bool> {
        Ok(self.visible.contains(selector) && *self.submitted.lock().unwrap())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.journal
            .lock()
            .unwrap()
            .filled
            .push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.journal.lock().unwrap().clicked.push(selector.to_string());
        self.submit();
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<()> {
        self.journal.lock().unwrap().entered.push(selector.to_string());
        self.submit();
        Ok(())
    }

    async fn scroll_by(&self, pixels: i64) -> Result<()> {
        self.journal.lock().unwrap().scrolled.push(pixels);
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        if *self.submitted.lock().unwrap() {
            Ok(self.session_cookies.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
