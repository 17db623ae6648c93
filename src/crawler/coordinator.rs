//! Crawler coordinator - session management facade
//!
//! [`Crawler`] owns the collaborators shared by every session (strategy
//! selector, profile store, auth arena, robots cache and persistence) and
//! exposes the session control surface: start, pause, resume, stop, status,
//! progress, deletion and content queries.

use super::session::{CrawlSession, SessionEvent, SessionHandle, SessionProgress};
use super::worker::{run_session, CrawlContext, SessionPlan};
use crate::adaptive::{AdaptiveSelector, ProfileStats, ProfileStore};
use crate::auth::{AuthArena, AuthTestReport, Authenticator};
use crate::config::{
    validate_crawl_config, validate_start_url, AuthConfig, CrawlConfig, UserAgentConfig,
};
use crate::executor::{
    build_http_client, ApiExecutor, BrowserDriver, CaptchaDelegate, DynamicExecutor,
    ExecutorSet, Method, StaticExecutor, StealthExecutor,
};
use crate::extract::{ExtractedContent, StructuredDataItem, StructuredExtractor};
use crate::robots::RobotsCache;
use crate::state::{DomainPacer, SessionStatus};
use crate::storage::{MemoryStorage, Page, Persistence, StorageError};
use crate::url::{extract_domain, normalize_url, UrlFilter};
use crate::{KumoError, Result, UrlError};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Poll interval of [`Crawler::wait`] when another caller owns the driver handle
const WAIT_POLL: Duration = Duration::from_millis(50);

struct SessionEntry {
    handle: Arc<SessionHandle>,
    driver: Option<JoinHandle<()>>,
}

/// Builds a [`Crawler`]
///
/// Without an explicit executor set the crawler registers the static and API
/// executors, plus the dynamic and stealth executors when a browser driver is
/// supplied.
pub struct CrawlerBuilder {
    user_agent: UserAgentConfig,
    executors: Option<ExecutorSet>,
    driver: Option<Arc<dyn BrowserDriver>>,
    captcha_delegate: Option<Arc<dyn CaptchaDelegate>>,
    storage: Option<Arc<dyn Persistence>>,
    profiles: Option<Arc<ProfileStore>>,
    arena: Option<Arc<AuthArena>>,
    auth_timings: Option<(Duration, Duration)>,
}

impl CrawlerBuilder {
    pub fn new(user_agent: UserAgentConfig) -> Self {
        Self {
            user_agent,
            executors: None,
            driver: None,
            captcha_delegate: None,
            storage: None,
            profiles: None,
            arena: None,
            auth_timings: None,
        }
    }

    /// Replaces the default executors
    pub fn executors(mut self, executors: ExecutorSet) -> Self {
        self.executors = Some(executors);
        self
    }

    /// Browser used by the rendered executors and by form logins
    pub fn browser_driver(mut self, driver: Arc<dyn BrowserDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn captcha_delegate(mut self, delegate: Arc<dyn CaptchaDelegate>) -> Self {
        self.captcha_delegate = Some(delegate);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Persistence>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Shares a profile store, e.g. one pre-loaded from disk
    pub fn profile_store(mut self, profiles: Arc<ProfileStore>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn auth_arena(mut self, arena: Arc<AuthArena>) -> Self {
        self.arena = Some(arena);
        self
    }

    /// Overrides the form-login settle pause and success-indicator timeout
    pub fn auth_timings(mut self, settle: Duration, indicator_timeout: Duration) -> Self {
        self.auth_timings = Some((settle, indicator_timeout));
        self
    }

    pub fn build(self) -> Result<Crawler> {
        let user_agent = self.user_agent.user_agent_string();
        let client = build_http_client(&user_agent)?;

        let executors = match self.executors {
            Some(executors) => executors,
            None => {
                let mut executors = ExecutorSet::new();
                executors.insert(Arc::new(StaticExecutor::new(client.clone())));
                executors.insert(Arc::new(ApiExecutor::new(client.clone())));
                if let Some(driver) = &self.driver {
                    executors.insert(Arc::new(DynamicExecutor::new(driver.clone(), user_agent.clone())));
                    let mut stealth = StealthExecutor::new(driver.clone());
                    if let Some(delegate) = &self.captcha_delegate {
                        stealth = stealth.with_captcha_delegate(delegate.clone());
                    }
                    executors.insert(Arc::new(stealth));
                }
                executors
            }
        };
        tracing::debug!("Registered executors: {:?}", executors.methods());

        let profiles = self.profiles.unwrap_or_default();
        let selector = AdaptiveSelector::new(executors, profiles.clone())
            .with_pacer(Arc::new(DomainPacer::new()));

        let mut authenticator = Authenticator::new(self.arena.unwrap_or_default(), client.clone())
            .with_user_agent(user_agent);
        if let Some(driver) = self.driver {
            authenticator = authenticator.with_driver(driver);
        }
        if let Some((settle, indicator_timeout)) = self.auth_timings {
            authenticator = authenticator.with_timings(settle, indicator_timeout);
        }

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));

        Ok(Crawler {
            ctx: Arc::new(CrawlContext {
                selector: Arc::new(selector),
                authenticator: Arc::new(authenticator),
                robots: Arc::new(RobotsCache::new(client, self.user_agent.crawler_name)),
                structured: StructuredExtractor::new(),
                storage,
            }),
            profiles,
            sessions: Mutex::new(HashMap::new()),
        })
    }
}

/// Adaptive whole-domain crawler
///
/// Sessions run on the tokio runtime the crawler is used from. Every session
/// shares the crawler's learned profiles and stored logins.
pub struct Crawler {
    ctx: Arc<CrawlContext>,
    profiles: Arc<ProfileStore>,
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
}

impl Crawler {
    pub fn builder(user_agent: UserAgentConfig) -> CrawlerBuilder {
        CrawlerBuilder::new(user_agent)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<Uuid, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, id: Uuid) -> Result<Arc<SessionHandle>> {
        self.sessions()
            .get(&id)
            .map(|entry| entry.handle.clone())
            .ok_or(KumoError::SessionNotFound(id))
    }

    async fn persist(&self, handle: &SessionHandle) -> Result<()> {
        self.ctx.storage.save_session(&handle.snapshot()).await?;
        Ok(())
    }

    // ===== Session Control =====

    /// Validates the request, creates a session and starts crawling it
    ///
    /// The session is persisted as `pending` before its driver task is spawned,
    /// so it can be paused or stopped before the first page is fetched.
    ///
    /// # Arguments
    ///
    /// * `start_url` - Absolute http(s) URL; its host becomes the session domain
    /// * `config` - Crawl settings, validated before anything is created
    ///
    /// # Returns
    ///
    /// * `Ok(Uuid)` - Id of the new session
    /// * `Err(KumoError::InvalidConfig)` - The URL or settings were rejected
    pub async fn start_crawl(&self, start_url: &str, config: CrawlConfig) -> Result<Uuid> {
        let start_url = validate_start_url(start_url)?;
        validate_crawl_config(&config)?;
        let start_url = normalize_url(start_url.as_str())?;
        let domain = extract_domain(&start_url).ok_or(UrlError::MissingDomain)?;
        let filter = UrlFilter::new(&config.include_patterns, &config.exclude_patterns)?;

        let session = CrawlSession::new(domain.clone(), &start_url, config.clone());
        let id = session.id;
        let handle = Arc::new(SessionHandle::new(session));
        self.persist(&handle).await?;

        let plan = Arc::new(SessionPlan {
            domain,
            start_url,
            config,
            filter,
        });
        let driver = tokio::spawn(run_session(self.ctx.clone(), handle.clone(), plan));
        self.sessions().insert(
            id,
            SessionEntry {
                handle,
                driver: Some(driver),
            },
        );

        tracing::info!(session = %id, "Session created");
        Ok(id)
    }

    /// Stops workers from taking new URLs; the frontier is kept
    pub async fn pause(&self, id: Uuid) -> Result<()> {
        let handle = self.handle(id)?;
        handle.transition(SessionStatus::Paused)?;
        self.persist(&handle).await
    }

    pub async fn resume(&self, id: Uuid) -> Result<()> {
        let handle = self.handle(id)?;
        handle.transition(SessionStatus::Running)?;
        self.persist(&handle).await
    }

    /// Requests a stop; in-flight fetches finish and the session completes
    pub fn stop(&self, id: Uuid) -> Result<()> {
        let handle = self.handle(id)?;
        tracing::info!(session = %id, "Stop requested");
        handle.request_stop();
        Ok(())
    }

    /// Current session record
    pub async fn status(&self, id: Uuid) -> Result<CrawlSession> {
        match self.handle(id) {
            Ok(handle) => Ok(handle.snapshot()),
            Err(_) => self.ctx.storage.load_session(id).await.map_err(|e| match e {
                StorageError::SessionNotFound(id) => KumoError::SessionNotFound(id),
                other => other.into(),
            }),
        }
    }

    pub fn get_progress(&self, id: Uuid) -> Result<SessionProgress> {
        Ok(self.handle(id)?.progress())
    }

    /// Live events of a session
    pub fn subscribe(&self, id: Uuid) -> Result<broadcast::Receiver<SessionEvent>> {
        Ok(self.handle(id)?.subscribe())
    }

    /// Ids of the sessions this crawler knows about
    pub fn session_ids(&self) -> Vec<Uuid> {
        self.sessions().keys().copied().collect()
    }

    /// Waits until the session reaches a terminal state
    pub async fn wait(&self, id: Uuid) -> Result<CrawlSession> {
        let (handle, driver) = {
            let mut sessions = self.sessions();
            let entry = sessions.get_mut(&id).ok_or(KumoError::SessionNotFound(id))?;
            (entry.handle.clone(), entry.driver.take())
        };

        match driver {
            Some(driver) => {
                if let Err(e) = driver.await {
                    tracing::error!(session = %id, "Session driver aborted: {}", e);
                }
            }
            None => {
                while !handle.status().is_terminal() {
                    tokio::time::sleep(WAIT_POLL).await;
                }
            }
        }
        Ok(handle.snapshot())
    }

    /// Stops the session, waits for its workers, and removes it with its data
    pub async fn delete_session(&self, id: Uuid) -> Result<()> {
        let entry = self
            .sessions()
            .remove(&id)
            .ok_or(KumoError::SessionNotFound(id))?;
        entry.handle.request_stop();
        if let Some(driver) = entry.driver {
            if let Err(e) = driver.await {
                tracing::error!(session = %id, "Session driver aborted: {}", e);
            }
        } else {
            while !entry.handle.status().is_terminal() {
                tokio::time::sleep(WAIT_POLL).await;
            }
        }

        match self.ctx.storage.delete_session(id).await {
            Ok(()) | Err(StorageError::SessionNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(session = %id, "Session deleted");
        Ok(())
    }

    // ===== Results =====

    /// Extracted pages of a session, `page` is 1-based
    pub async fn content(
        &self,
        id: Uuid,
        page: usize,
        per_page: usize,
    ) -> Result<Page<ExtractedContent>> {
        Ok(self.ctx.storage.content(id, page, per_page).await?)
    }

    /// Structured items that passed the session's quality threshold
    ///
    /// # Arguments
    ///
    /// * `id` - Session id
    /// * `schema` - Only items of this schema, e.g. `"product"`
    /// * `min_quality` - Stricter threshold on top of the session's own
    pub async fn structured_data(
        &self,
        id: Uuid,
        schema: Option<&str>,
        min_quality: Option<f64>,
    ) -> Result<Vec<StructuredDataItem>> {
        Ok(self
            .ctx
            .storage
            .structured_data(id, schema, min_quality)
            .await?)
    }

    // ===== Learned Profiles =====

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub async fn profile_stats(&self, domain: Option<&str>) -> ProfileStats {
        self.profiles.stats(domain).await
    }

    pub async fn success_rates(&self) -> BTreeMap<String, BTreeMap<Method, f64>> {
        self.profiles.success_rates().await
    }

    pub fn clear_profile(&self, domain: &str) -> bool {
        self.profiles.clear_profile(domain)
    }

    pub async fn export_profiles(&self) -> Result<String> {
        self.profiles.export_profiles().await
    }

    /// Replaces the profiles of the imported domains; returns how many were imported
    pub async fn import_profiles(&self, json: &str) -> Result<usize> {
        self.profiles.import_profiles(json).await
    }

    // ===== Authentication =====

    /// Runs a login against `target_url` without starting a crawl
    pub async fn test_authentication(
        &self,
        auth: &AuthConfig,
        target_url: &str,
    ) -> Result<AuthTestReport> {
        let target = validate_start_url(target_url)?;
        Ok(self.ctx.authenticator.test_login(auth, &target).await)
    }

    /// Checks the stored login of the domain of `test_url` with one request
    ///
    /// An expired login is cleared. Returns false when there is no stored
    /// login or it no longer works.
    pub async fn validate_auth(&self, test_url: &str) -> Result<bool> {
        let target = validate_start_url(test_url)?;
        let domain = extract_domain(&target).ok_or(UrlError::MissingDomain)?;
        self.ctx.authenticator.validate_auth(&domain, &target).await
    }

    /// Evicts expired logins nobody is using; returns how many were dropped
    pub fn evict_expired_logins(&self) -> usize {
        self.ctx.authenticator.arena().evict_expired()
    }
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("executors", self.ctx.selector.executors())
            .field("sessions", &self.sessions().len())
            .finish()
    }
}
