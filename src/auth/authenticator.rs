use super::arena::{fingerprint, AuthArena, AuthLease, AuthSession, AuthState};
use super::selectors::LoginSelectors;
use crate::config::{AuthConfig, AuthType};
use crate::executor::{BrowserContext, BrowserDriver, ContextGuard, ContextOptions, Cookie, FetchOptions};
use crate::url::extract_domain;
use crate::{AuthError, AuthResult, KumoError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Pause after submitting the login form
const DEFAULT_SETTLE: Duration = Duration::from_secs(2);

/// How long to wait for the success indicator to appear
const DEFAULT_INDICATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Navigation timeout of the login page
const LOGIN_PAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// URL fragments that mean a request was bounced to a login page
const LOGIN_REDIRECT_MARKERS: &[&str] = &["login", "signin", "sign-in", "auth"];

fn browser_error(e: KumoError) -> AuthError {
    AuthError::Browser(e.to_string())
}

/// Runs login flows and hands out stored logins
///
/// Header and cookie schemes authenticate without a browser. Form logins
/// drive a browser context through the configured page, then keep the
/// context's cookies in the shared [`AuthArena`].
pub struct Authenticator {
    arena: Arc<AuthArena>,
    client: Client,
    driver: Option<Arc<dyn BrowserDriver>>,
    user_agent: Option<String>,
    settle: Duration,
    indicator_timeout: Duration,
}

impl Authenticator {
    pub fn new(arena: Arc<AuthArena>, client: Client) -> Self {
        Self {
            arena,
            client,
            driver: None,
            user_agent: None,
            settle: DEFAULT_SETTLE,
            indicator_timeout: DEFAULT_INDICATOR_TIMEOUT,
        }
    }

    pub fn with_driver(mut self, driver: Arc<dyn BrowserDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Overrides the post-submit pause and the success-indicator timeout
    pub fn with_timings(mut self, settle: Duration, indicator_timeout: Duration) -> Self {
        self.settle = settle;
        self.indicator_timeout = indicator_timeout;
        self
    }

    pub fn arena(&self) -> &Arc<AuthArena> {
        &self.arena
    }

    pub fn state(&self, domain: &str) -> AuthState {
        self.arena.state(domain)
    }

    /// Returns a login for `domain`, reusing a stored one when possible
    ///
    /// Concurrent callers for one domain share a single login attempt.
    ///
    /// # Arguments
    ///
    /// * `domain` - Session domain the login belongs to
    /// * `config` - Auth settings; a stored login is reused only for the same settings
    ///
    /// # Returns
    ///
    /// * `Ok(Some(AuthLease))` - Login material, kept alive while the lease is held
    /// * `Ok(None)` - No authentication is configured
    /// * `Err(AuthError)` - The login failed, or failed earlier with these settings
    pub async fn ensure(&self, domain: &str, config: &AuthConfig) -> AuthResult<Option<AuthLease>> {
        if !config.is_enabled() {
            return Ok(None);
        }
        let lease = self
            .arena
            .checkout(domain, &fingerprint(config), move || self.login(domain, config))
            .await?;
        Ok(Some(lease))
    }

    /// Adds the stored login of `domain` to a request
    ///
    /// The returned lease keeps the login alive until the request is done.
    pub async fn apply_stored_auth(&self, domain: &str, options: &mut FetchOptions) -> Option<AuthLease> {
        let lease = self.arena.lease(domain).await?;
        apply_session(lease.session(), options);
        Some(lease)
    }

    /// Runs the configured login flow once, without touching the arena
    pub async fn login(&self, domain: &str, config: &AuthConfig) -> AuthResult<AuthSession> {
        tracing::debug!("Logging in to {} ({:?})", domain, config.auth_type);
        match config.auth_type {
            AuthType::None => Ok(AuthSession::new(domain, Vec::new(), Vec::new())),
            AuthType::Basic => {
                let (Some(user), Some(pass)) = (&config.username, &config.password) else {
                    return Err(AuthError::MissingCredentials);
                };
                let encoded = BASE64.encode(format!("{}:{}", user, pass));
                Ok(AuthSession::new(
                    domain,
                    vec![("Authorization".to_string(), format!("Basic {}", encoded))],
                    Vec::new(),
                ))
            }
            AuthType::Bearer => {
                let token = config
                    .token
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .ok_or(AuthError::MissingCredentials)?;
                Ok(AuthSession::new(
                    domain,
                    vec![("Authorization".to_string(), format!("Bearer {}", token))],
                    Vec::new(),
                ))
            }
            AuthType::Cookie => {
                if config.cookies.is_empty() {
                    return Err(AuthError::MissingCredentials);
                }
                let cookies = config
                    .cookies
                    .iter()
                    .map(|c| Cookie::new(&c.name, &c.value))
                    .collect();
                Ok(AuthSession::new(domain, Vec::new(), cookies))
            }
            AuthType::Form => self.form_login(domain, config).await,
        }
    }

    async fn form_login(&self, domain: &str, config: &AuthConfig) -> AuthResult<AuthSession> {
        let (Some(username), Some(password)) = (&config.username, &config.password) else {
            return Err(AuthError::MissingCredentials);
        };
        let login_url = config
            .login_url
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .ok_or(AuthError::MissingLoginUrl)?;
        let driver = self.driver.as_ref().ok_or(AuthError::BrowserUnavailable)?;

        let context = driver
            .new_context(ContextOptions {
                user_agent: self.user_agent.clone(),
                ..ContextOptions::default()
            })
            .await
            .map_err(browser_error)?;
        let guard = ContextGuard::new(context, login_url.as_str());

        let selectors = LoginSelectors::for_config(config);
        let result = self
            .submit_form(&*guard, &login_url, &selectors, username, password, config)
            .await;
        guard.close().await;

        let cookies = result?;
        Ok(AuthSession::new(domain, Vec::new(), cookies))
    }

    async fn submit_form(
        &self,
        page: &dyn BrowserContext,
        login_url: &Url,
        selectors: &LoginSelectors,
        username: &str,
        password: &str,
        config: &AuthConfig,
    ) -> AuthResult<Vec<Cookie>> {
        page.goto(login_url, LOGIN_PAGE_TIMEOUT)
            .await
            .map_err(browser_error)?;
        page.wait_for_network_idle(self.indicator_timeout)
            .await
            .map_err(browser_error)?;

        // A hidden form is opened by the first visible trigger
        if first_visible(page, &selectors.username).await?.is_none() {
            if let Some(trigger) = first_visible(page, &selectors.triggers).await? {
                tracing::debug!("Opening login form via {}", trigger);
                page.click(&trigger).await.map_err(browser_error)?;
                tokio::time::sleep(self.settle).await;
            }
        }

        let user_field = first_visible(page, &selectors.username)
            .await?
            .ok_or(AuthError::UsernameFieldNotFound)?;
        page.fill(&user_field, username).await.map_err(browser_error)?;

        let pass_field = first_visible(page, &selectors.password)
            .await?
            .ok_or(AuthError::PasswordFieldNotFound)?;
        page.fill(&pass_field, password).await.map_err(browser_error)?;

        match first_visible(page, &selectors.submit).await? {
            Some(submit) => page.click(&submit).await.map_err(browser_error)?,
            None => page.press_enter(&pass_field).await.map_err(browser_error)?,
        }
        tokio::time::sleep(self.settle).await;

        let verified = match config.success_indicator.as_deref().filter(|s| !s.is_empty()) {
            Some(indicator) => page
                .wait_for_selector(indicator, self.indicator_timeout)
                .await
                .map_err(browser_error)?,
            None => first_visible(page, &selectors.error_indicators)
                .await?
                .is_none(),
        };
        if !verified {
            return Err(AuthError::LoginVerificationFailed);
        }

        page.cookies().await.map_err(browser_error)
    }

    /// Checks that the stored login of `domain` still works
    ///
    /// A request to `test_url` that ends up on a login page (or answers 401)
    /// means the login expired; it is cleared and `false` is returned.
    pub async fn validate_auth(&self, domain: &str, test_url: &Url) -> Result<bool> {
        let Some(lease) = self.arena.lease(domain).await else {
            return Ok(false);
        };

        let response = self.authorized_get(lease.session(), test_url).send().await?;

        let final_url = response.url().clone();
        let redirected_to_login = final_url.as_str() != test_url.as_str() && {
            let target = format!("{}?{}", final_url.path(), final_url.query().unwrap_or(""))
                .to_lowercase();
            LOGIN_REDIRECT_MARKERS.iter().any(|m| target.contains(m))
        };
        let expired = redirected_to_login || response.status() == reqwest::StatusCode::UNAUTHORIZED;

        drop(lease);
        if expired {
            tracing::info!("Stored login for {} expired (landed on {})", domain, final_url);
            self.arena.invalidate(domain).await;
        }
        Ok(!expired)
    }

    /// Logs in with `config` and requests `target` with the result
    ///
    /// Nothing is stored in the arena, so running a test never affects crawls.
    pub async fn test_login(&self, config: &AuthConfig, target: &Url) -> AuthTestReport {
        let domain = extract_domain(target).unwrap_or_default();
        let session = match self.login(&domain, config).await {
            Ok(session) => session,
            Err(e) => {
                return AuthTestReport {
                    domain,
                    success: false,
                    error: Some(e.to_string()),
                    cookies: 0,
                    headers: 0,
                    target_status: None,
                }
            }
        };

        let target_status = match self.authorized_get(&session, target).send().await {
            Ok(response) => Some(response.status().as_u16()),
            Err(e) => {
                tracing::warn!("Test request to {} failed: {}", target, e);
                None
            }
        };
        AuthTestReport {
            domain,
            success: true,
            error: None,
            cookies: session.cookies.len(),
            headers: session.headers.len(),
            target_status,
        }
    }

    fn authorized_get(&self, session: &AuthSession, url: &Url) -> reqwest::RequestBuilder {
        let mut options = FetchOptions::default();
        apply_session(session, &mut options);
        let mut request = self.client.get(url.clone());
        if let Some(user_agent) = &self.user_agent {
            request = request.header(reqwest::header::USER_AGENT, user_agent.as_str());
        }
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(cookie) = options.cookie_header() {
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        request
    }
}

/// Outcome of a login test run outside any crawl
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTestReport {
    pub domain: String,
    pub success: bool,
    pub error: Option<String>,
    /// Cookies the login produced
    pub cookies: usize,
    /// Headers the login produced
    pub headers: usize,
    /// HTTP status of the target URL requested with the login applied
    pub target_status: Option<u16>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("browser", &self.driver.is_some())
            .field("settle", &self.settle)
            .finish()
    }
}

/// Merges a login's headers and cookies into request options
pub fn apply_session(session: &AuthSession, options: &mut FetchOptions) {
    for (name, value) in &session.headers {
        options.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        options.headers.push((name.clone(), value.clone()));
    }
    for cookie in &session.cookies {
        options.cookies.retain(|c| c.name != cookie.name);
        options.cookies.push(cookie.clone());
    }
}

async fn first_visible(page: &dyn BrowserContext, selectors: &[String]) -> AuthResult<Option<String>> {
    for selector in selectors {
        if page.is_visible(selector).await.map_err(browser_error)? {
            return Ok(Some(selector.clone()));
        }
    }
    Ok(None)
}
