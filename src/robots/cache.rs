//! Robots.txt caching implementation
//!
//! Entries are keyed by origin and expire after 24 hours.

use crate::robots::{fetch_robots, ParsedRobots};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use std::collections::HashMap;
use tokio::sync::Mutex;
use url::Url;

/// Cached robots.txt data for an origin
#[derive(Debug, Clone)]
pub struct CachedRobots {
    /// The parsed robots.txt content
    pub content: ParsedRobots,

    /// When the robots.txt was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    pub fn new(content: ParsedRobots) -> Self {
        Self {
            content,
            fetched_at: Utc::now(),
        }
    }

    /// Checks if the cached robots.txt is older than 24 hours
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.fetched_at > Duration::hours(24)
    }
}

/// Process-wide robots.txt cache shared by all sessions
///
/// The async lock is held across the fetch so concurrent workers of the same
/// origin fetch robots.txt only once.
#[derive(Debug)]
pub struct RobotsCache {
    client: Client,
    agent: String,
    entries: Mutex<HashMap<String, CachedRobots>>,
}

impl RobotsCache {
    /// Creates a cache
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client used to download robots.txt
    /// * `agent` - Product token matched against `User-agent` groups
    pub fn new(client: Client, agent: impl Into<String>) -> Self {
        Self {
            client,
            agent: agent.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The product token used for rule matching
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Returns the rules for the URL's origin, fetching them when missing or stale
    pub async fn rules_for(&self, url: &Url) -> ParsedRobots {
        let origin = url.origin().ascii_serialization();
        let mut entries = self.entries.lock().await;

        if let Some(cached) = entries.get(&origin) {
            if !cached.is_stale() {
                tracing::trace!("Using cached robots.txt for {}", origin);
                return cached.content.clone();
            }
        }

        tracing::debug!("Fetching robots.txt for {}", origin);
        let rules = fetch_robots(&self.client, url).await;
        entries.insert(origin, CachedRobots::new(rules.clone()));
        rules
    }

    /// Checks if a URL may be fetched
    pub async fn is_allowed(&self, url: &Url) -> bool {
        self.rules_for(url).await.is_allowed(url.as_str(), &self.agent)
    }

    /// The `Crawl-delay` that applies to this crawler at the URL's origin
    pub async fn crawl_delay(&self, url: &Url) -> Option<std::time::Duration> {
        self.rules_for(url).await.crawl_delay(&self.agent)
    }

    /// Inserts rules for an origin (used when rules are known up front)
    pub async fn insert(&self, origin: &str, rules: ParsedRobots) {
        self.entries
            .lock()
            .await
            .insert(origin.to_string(), CachedRobots::new(rules));
    }
}
