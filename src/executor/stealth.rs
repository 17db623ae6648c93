//! Stealth browser executor
//!
//! Renders the page like the dynamic executor, but every context gets a
//! randomized fingerprint drawn from realistic pools. Higher stealth levels add
//! more randomized surface and human-like scroll pacing.
//!
//! When the rendered page carries a CAPTCHA the configured solver policy
//! decides: `skip` fails fast, `manual` or a named service hand the page to a
//! [`CaptchaDelegate`] if one is installed.

use super::browser::{BrowserContext, BrowserDriver, ContextGuard, ContextOptions, Viewport};
use super::dynamic::{rendered_page, retry_after_crash};
use super::{detect_captcha, FetchOptions, Method, RawPage, StrategyExecutor};
use crate::config::{CaptchaSolver, StealthLevel};
use crate::{KumoError, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

const VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1366, 768),
    (1536, 864),
    (1440, 900),
    (1280, 720),
];

const TIMEZONES: &[&str] = &[
    "America/New_York",
    "America/Chicago",
    "America/Los_Angeles",
    "Europe/London",
    "Europe/Berlin",
];

const LOCALES: &[&str] = &["en-US", "en-GB", "de-DE", "fr-FR"];

/// Scroll steps performed at [`StealthLevel::Maximum`]
const HUMAN_SCROLL_STEPS: usize = 3;

/// Randomized browser identity for one context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport: Option<Viewport>,
    pub timezone: Option<String>,
    pub locale: Option<String>,
    pub mask_webdriver: bool,
}

impl Fingerprint {
    /// Draws a fingerprint; `basic` rotates only the user agent
    pub fn random<R: Rng + ?Sized>(level: StealthLevel, rng: &mut R) -> Self {
        let user_agent = USER_AGENTS
            .choose(rng)
            .copied()
            .unwrap_or(USER_AGENTS[0])
            .to_string();

        if level == StealthLevel::Basic {
            return Self {
                user_agent,
                viewport: None,
                timezone: None,
                locale: None,
                mask_webdriver: false,
            };
        }

        Self {
            user_agent,
            viewport: VIEWPORTS
                .choose(rng)
                .map(|&(width, height)| Viewport { width, height }),
            timezone: TIMEZONES.choose(rng).map(|tz| tz.to_string()),
            locale: LOCALES.choose(rng).map(|l| l.to_string()),
            mask_webdriver: true,
        }
    }

    fn into_options(self, fetch: &FetchOptions) -> ContextOptions {
        ContextOptions {
            user_agent: Some(self.user_agent),
            viewport: self.viewport,
            timezone: self.timezone,
            locale: self.locale,
            mask_webdriver: self.mask_webdriver,
            extra_headers: fetch.headers.clone(),
            cookies: fetch.cookies.clone(),
        }
    }
}

/// Hands a CAPTCHA page to a human or a solving service
#[async_trait]
pub trait CaptchaDelegate: Send + Sync {
    /// Attempts to clear the CAPTCHA on the open page; true if it was solved
    async fn solve(
        &self,
        page: &dyn BrowserContext,
        url: &Url,
        solver: &CaptchaSolver,
    ) -> Result<bool>;
}

/// `stealth` strategy
pub struct StealthExecutor {
    driver: Arc<dyn BrowserDriver>,
    delegate: Option<Arc<dyn CaptchaDelegate>>,
}

impl StealthExecutor {
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            driver,
            delegate: None,
        }
    }

    pub fn with_captcha_delegate(mut self, delegate: Arc<dyn CaptchaDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    async fn human_pacing(&self, page: &dyn BrowserContext) -> Result<()> {
        let steps: Vec<(i64, u64)> = {
            let mut rng = rand::thread_rng();
            (0..HUMAN_SCROLL_STEPS)
                .map(|_| (rng.gen_range(200..700), rng.gen_range(120..400)))
                .collect()
        };
        for (pixels, pause_ms) in steps {
            page.scroll_by(pixels).await?;
            tokio::time::sleep(Duration::from_millis(pause_ms)).await;
        }
        Ok(())
    }

    /// Applies the solver policy to a page that shows a CAPTCHA
    ///
    /// Returns the page markup once the CAPTCHA is gone.
    async fn handle_captcha(
        &self,
        page: &dyn BrowserContext,
        url: &Url,
        solver: &CaptchaSolver,
    ) -> Result<String> {
        let detected = || KumoError::CaptchaDetected {
            url: url.to_string(),
            policy: solver.to_string(),
        };

        if *solver == CaptchaSolver::Skip {
            return Err(detected());
        }
        let Some(delegate) = &self.delegate else {
            tracing::warn!(
                "CAPTCHA at {} but no delegate is installed for solver '{}'",
                url,
                solver
            );
            return Err(detected());
        };

        tracing::info!("Handing CAPTCHA at {} to solver '{}'", url, solver);
        if !delegate.solve(page, url, solver).await? {
            return Err(detected());
        }

        let html = page.content().await?;
        if detect_captcha(&html) {
            return Err(detected());
        }
        Ok(html)
    }
}

#[async_trait]
impl StrategyExecutor for StealthExecutor {
    fn method(&self) -> Method {
        Method::Stealth
    }

    async fn fetch(&self, url: &Url, options: &FetchOptions) -> Result<RawPage> {
        retry_after_crash(url, || self.render(url, options)).await
    }
}

impl StealthExecutor {
    /// One attempt in a freshly fingerprinted context
    async fn render(&self, url: &Url, options: &FetchOptions) -> Result<RawPage> {
        let started = Instant::now();
        let fingerprint = Fingerprint::random(options.stealth_level, &mut rand::thread_rng());
        tracing::debug!("Stealth fingerprint for {}: {:?}", url, fingerprint);

        let context = self
            .driver
            .new_context(fingerprint.into_options(options))
            .await?;
        let guard = ContextGuard::new(context, url.as_str());

        let result = async {
            let navigation = guard.goto(url, options.timeout).await?;
            if options.stealth_level == StealthLevel::Maximum {
                self.human_pacing(&*guard).await?;
            }
            guard
                .wait_for_network_idle(options.timeout.min(Duration::from_secs(10)))
                .await?;

            let mut html = guard.content().await?;
            if detect_captcha(&html) {
                html = self
                    .handle_captcha(&*guard, url, &options.captcha_solver)
                    .await?;
            }
            rendered_page(url, navigation, html, Method::Stealth, started)
        }
        .await;

        guard.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::ScriptedDriver;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const URL: &str = "https://shop.example.com/item";
    const CAPTCHA_PAGE: &str =
        r#"<html><body><div class="g-recaptcha" data-sitekey="k"></div></body></html>"#;

    struct AlwaysSolves;

    #[async_trait]
    impl CaptchaDelegate for AlwaysSolves {
        async fn solve(
            &self,
            _page: &dyn BrowserContext,
            _url: &Url,
            _solver: &CaptchaSolver,
        ) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_basic_fingerprint_rotates_user_agent_only() {
        let mut rng = StdRng::seed_from_u64(7);
        let fp = Fingerprint::random(StealthLevel::Basic, &mut rng);
        assert!(USER_AGENTS.contains(&fp.user_agent.as_str()));
        assert!(fp.viewport.is_none());
        assert!(!fp.mask_webdriver);
    }

    #[test]
    fn test_advanced_fingerprint_randomizes_more() {
        let mut rng = StdRng::seed_from_u64(7);
        let fp = Fingerprint::random(StealthLevel::Advanced, &mut rng);
        assert!(fp.viewport.is_some());
        assert!(fp.timezone.is_some());
        assert!(fp.mask_webdriver);
    }

    #[tokio::test]
    async fn test_captcha_with_skip_policy_fails_fast() {
        let driver = Arc::new(ScriptedDriver::new().page(URL, 200, CAPTCHA_PAGE));
        let executor = StealthExecutor::new(driver.clone());
        let url = Url::parse(URL).unwrap();

        let err = executor
            .fetch(&url, &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, KumoError::CaptchaDetected { ref policy, .. } if policy == "skip"));
        assert_eq!(driver.closed_count(), 1);
    }

    #[tokio::test]
    async fn test_unsolved_captcha_still_detected_with_delegate() {
        // The scripted page keeps its CAPTCHA even after the delegate reports success
        let driver = Arc::new(ScriptedDriver::new().page(URL, 200, CAPTCHA_PAGE));
        let executor = StealthExecutor::new(driver).with_captcha_delegate(Arc::new(AlwaysSolves));
        let options = FetchOptions {
            captcha_solver: CaptchaSolver::Manual,
            ..FetchOptions::default()
        };
        let url = Url::parse(URL).unwrap();

        let err = executor.fetch(&url, &options).await.unwrap_err();
        assert!(matches!(err, KumoError::CaptchaDetected { ref policy, .. } if policy == "manual"));
    }

    #[tokio::test]
    async fn test_plain_page_succeeds() {
        let driver = Arc::new(ScriptedDriver::new().page(
            URL,
            200,
            "<html><body><h1>Item</h1><p>In stock</p></body></html>",
        ));
        let executor = StealthExecutor::new(driver.clone());
        let url = Url::parse(URL).unwrap();

        let page = executor.fetch(&url, &FetchOptions::default()).await.unwrap();
        assert_eq!(page.method, Method::Stealth);

        let journal = driver.journal.lock().unwrap();
        let ua = journal.options[0].user_agent.clone().unwrap();
        assert!(USER_AGENTS.contains(&ua.as_str()));
        assert!(journal.scrolled.is_empty());
    }

    #[tokio::test]
    async fn test_crash_gets_fresh_fingerprinted_context() {
        let mut driver = ScriptedDriver::new().page(URL, 200, "<html><body><p>Item</p></body></html>");
        driver.crashes = 1;
        let driver = Arc::new(driver);
        let executor = StealthExecutor::new(driver.clone());
        let url = Url::parse(URL).unwrap();

        let page = executor.fetch(&url, &FetchOptions::default()).await.unwrap();
        assert_eq!(page.method, Method::Stealth);
        assert_eq!(driver.launched_count(), 2);
        assert_eq!(driver.closed_count(), 2);
        assert_eq!(driver.journal.lock().unwrap().options.len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_crash_is_network_error() {
        let mut driver = ScriptedDriver::new();
        driver.crashes = 2;
        let driver = Arc::new(driver);
        let executor = StealthExecutor::new(driver.clone());
        let url = Url::parse(URL).unwrap();

        let err = executor
            .fetch(&url, &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, KumoError::Network { .. }));
        assert!(err.is_retryable());
        assert_eq!(driver.launched_count(), 2);
        assert_eq!(driver.closed_count(), 2);
    }

    #[tokio::test]
    async fn test_maximum_level_scrolls_like_a_human() {
        let driver = Arc::new(ScriptedDriver::new().page(URL, 200, "<html><body>ok</body></html>"));
        let executor = StealthExecutor::new(driver.clone());
        let options = FetchOptions {
            stealth_level: StealthLevel::Maximum,
            ..FetchOptions::default()
        };
        let url = Url::parse(URL).unwrap();

        executor.fetch(&url, &options).await.unwrap();
        assert_eq!(driver.journal.lock().unwrap().scrolled.len(), HUMAN_SCROLL_STEPS);
    }
}
