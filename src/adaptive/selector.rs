use super::profile::WebsiteProfile;
use super::store::ProfileStore;
use crate::config::{CaptchaSolver, CrawlConfig};
use crate::executor::{
    visible_text_len, ExecutorSet, FetchOptions, Method, PageKind, PageSignals, RawPage,
};
use crate::extract::{ContentExtractor, ExtractedContent};
use crate::state::DomainPacer;
use crate::url::extract_domain;
use crate::{KumoError, Result};
use std::sync::Arc;
use url::Url;

/// Successful result of [`AdaptiveSelector::fetch_with_strategy`]
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub content: ExtractedContent,
    pub page: RawPage,
    pub method: Method,
    /// Methods that failed before `method` succeeded, with their reasons
    pub failed_attempts: Vec<(Method, String)>,
}

/// Chooses among executors per domain and falls back on failure
///
/// Every attempt feeds the domain's [`WebsiteProfile`] (unless learning is off),
/// so the ranking converges on whatever works for each site.
pub struct AdaptiveSelector {
    executors: ExecutorSet,
    profiles: Arc<ProfileStore>,
    pacer: Option<Arc<DomainPacer>>,
    extractor: ContentExtractor,
}

impl AdaptiveSelector {
    pub fn new(executors: ExecutorSet, profiles: Arc<ProfileStore>) -> Self {
        Self {
            executors,
            profiles,
            pacer: None,
            extractor: ContentExtractor::new(),
        }
    }

    /// Paces every attempt through `pacer` and feeds it rate-limit signals
    pub fn with_pacer(mut self, pacer: Arc<DomainPacer>) -> Self {
        self.pacer = Some(pacer);
        self
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub fn executors(&self) -> &ExecutorSet {
        &self.executors
    }

    /// Orders the methods to try for a domain, best first
    ///
    /// A forced method is the only candidate. Without adaptive scraping the
    /// order is plain cost order. Otherwise methods are ranked by learned
    /// success rate times cost weight, ties going to the cheaper method.
    pub fn rank_methods(
        profile: &WebsiteProfile,
        config: &CrawlConfig,
        available: &[Method],
    ) -> Vec<Method> {
        if let Some(forced) = config.force_method {
            return vec![forced];
        }

        let mut methods: Vec<Method> = available
            .iter()
            .copied()
            .filter(|m| config.is_method_enabled(*m))
            .collect();
        methods.sort();
        methods.dedup();

        if config.enable_adaptive_scraping {
            let score = |m: Method| profile.success_rate(m) * m.cost_weight();
            // Stable sort keeps cost order among equal scores
            methods.sort_by(|a, b| score(*b).total_cmp(&score(*a)));
        }
        methods
    }

    /// Fetches and extracts a page, falling back through the ranked methods
    ///
    /// Every attempt is recorded in the domain's profile when learning is on.
    /// Only retryable failures (network, timeout, browser crash) move on to the
    /// next method; any other error ends the fetch at once.
    ///
    /// # Arguments
    ///
    /// * `url` - Normalized page URL
    /// * `config` - Session settings deciding which methods may run
    /// * `options` - Per-request timeout, pacing, auth material and CAPTCHA policy
    ///
    /// # Returns
    ///
    /// * `Ok(FetchOutcome)` - Extracted page and the method that produced it
    /// * `Err(KumoError::AllMethodsFailed)` - Every ranked method failed retryably
    /// * `Err(_)` - A non-retryable failure such as `CaptchaDetected`
    pub async fn fetch_with_strategy(
        &self,
        url: &Url,
        config: &CrawlConfig,
        options: &FetchOptions,
    ) -> Result<FetchOutcome> {
        let domain = extract_domain(url).ok_or_else(|| KumoError::Network {
            url: url.to_string(),
            reason: "URL has no host".to_string(),
            status: None,
        })?;

        let profile = match self.profiles.get(&domain).await {
            Some(profile) => profile,
            None => WebsiteProfile::new(&domain),
        };
        let ranked = Self::rank_methods(&profile, config, &self.executors.methods());
        tracing::trace!(url = %url, "Method ranking for {}: {:?}", domain, ranked);

        let mut failures: Vec<(Method, String)> = Vec::new();
        for method in ranked {
            let Some(executor) = self.executors.get(method) else {
                failures.push((method, "no executor registered".to_string()));
                continue;
            };

            if let Some(pacer) = &self.pacer {
                let waited = pacer.wait_turn(&domain, options.delay).await;
                if !waited.is_zero() {
                    tracing::debug!(url = %url, "Waited {:?} for pacing", waited);
                }
            }

            tracing::debug!(url = %url, method = %method, "Fetch attempt");
            let attempt = match executor.fetch(url, options).await {
                Ok(page) => self.assess(page, options),
                Err(e) => {
                    let signals = PageSignals::from_error(&e);
                    Err((e, signals))
                }
            };

            match attempt {
                Ok((page, content, signals)) => {
                    self.learn(&domain, config, method, None, signals).await;
                    if let Some(pacer) = &self.pacer {
                        pacer.clear_rate_limit(&domain).await;
                    }
                    return Ok(FetchOutcome {
                        content,
                        page,
                        method,
                        failed_attempts: failures,
                    });
                }
                Err((error, signals)) => {
                    let reason = error.reason();
                    tracing::debug!(url = %url, method = %method, "Attempt failed: {}", reason);
                    self.learn(&domain, config, method, Some(&reason), signals).await;
                    if signals.rate_limit {
                        if let Some(pacer) = &self.pacer {
                            pacer.mark_rate_limited(&domain).await;
                        }
                    }
                    if !error.is_retryable() {
                        tracing::debug!(url = %url, method = %method, "Not falling back after {}", error.kind());
                        return Err(error);
                    }
                    failures.push((method, reason));
                }
            }
        }

        Err(KumoError::AllMethodsFailed {
            url: url.to_string(),
            attempts: failures,
        })
    }

    /// Decides whether a fetched page counts as a success, and extracts it
    fn assess(
        &self,
        page: RawPage,
        options: &FetchOptions,
    ) -> std::result::Result<(RawPage, ExtractedContent, PageSignals), (KumoError, PageSignals)> {
        let mut signals = match page.kind {
            PageKind::Html => PageSignals::inspect(page.status, &page.html),
            PageKind::Json => PageSignals::default(),
        };
        // A browser-rendered page with no text means the render was blocked
        let blank_render = page.kind == PageKind::Html
            && page.method.needs_browser()
            && (signals.requires_js || visible_text_len(&page.html) == 0);
        if blank_render {
            signals.requires_js = false;
            signals.anti_bot = true;
        }

        if signals.captcha {
            // Only the stealth executor can hand a CAPTCHA to a solver
            let error = if options.captcha_solver != CaptchaSolver::Skip && page.method != Method::Stealth {
                KumoError::Network {
                    url: page.final_url.to_string(),
                    reason: format!("CAPTCHA left for solver '{}'", options.captcha_solver),
                    status: Some(page.status),
                }
            } else {
                KumoError::CaptchaDetected {
                    url: page.final_url.to_string(),
                    policy: options.captcha_solver.to_string(),
                }
            };
            return Err((error, signals));
        }
        if signals.requires_js || blank_render {
            return Err((
                KumoError::Network {
                    url: page.final_url.to_string(),
                    reason: if signals.requires_js {
                        "page needs JavaScript to render".to_string()
                    } else {
                        "rendered page is empty".to_string()
                    },
                    status: Some(page.status),
                },
                signals,
            ));
        }

        match self.extractor.extract(&page) {
            Ok(content) => Ok((page, content, signals)),
            Err(e) => Err((e, signals)),
        }
    }

    async fn learn(
        &self,
        domain: &str,
        config: &CrawlConfig,
        method: Method,
        failure: Option<&str>,
        signals: PageSignals,
    ) {
        if !config.learning_mode {
            return;
        }
        self.profiles
            .update(domain, |profile| {
                profile.record_attempt(method, failure.is_none(), failure, signals);
                tracing::debug!(
                    "Profile {} now {:.2} for {} after {} attempts",
                    domain,
                    profile.success_rate(method),
                    method,
                    profile.total_attempts
                );
            })
            .await;
    }
}

impl std::fmt::Debug for AdaptiveSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveSelector")
            .field("executors", &self.executors)
            .field("paced", &self.pacer.is_some())
            .finish()
    }
}
