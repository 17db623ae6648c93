use crate::executor::{Method, PageSignals};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Oldest failures are evicted beyond this many entries
pub const MAX_RECENT_FAILURES: usize = 20;

/// Failure reasons are truncated to this many characters
pub const MAX_REASON_CHARS: usize = 200;

/// Upper bound of the averaging window; keeps the learning rate from decaying to zero
pub const LEARNING_WINDOW: u64 = 50;

/// Assumed success rate of a method that was never tried
pub const PRIOR_SUCCESS_RATE: f64 = 0.5;

/// How hard a site is to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
    Extreme,
}

impl Difficulty {
    /// Maps a signal score to a difficulty level
    pub fn from_score(score: u32) -> Self {
        match score {
            0 => Self::Easy,
            1 => Self::Medium,
            2 | 3 => Self::Hard,
            _ => Self::Extreme,
        }
    }
}

/// Observed traits of a site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SiteCharacteristics {
    pub has_anti_bot: bool,
    pub requires_js: bool,
    pub has_rate_limit: bool,
    pub has_captcha: bool,
    pub difficulty: Difficulty,
}

impl SiteCharacteristics {
    /// Signal score: one point per trait, two for CAPTCHAs
    pub fn score(&self) -> u32 {
        u32::from(self.has_anti_bot)
            + u32::from(self.requires_js)
            + u32::from(self.has_rate_limit)
            + 2 * u32::from(self.has_captcha)
    }

    /// Folds new signals in; flags and difficulty only ever go up
    pub fn observe(&mut self, signals: PageSignals) {
        self.has_anti_bot |= signals.anti_bot;
        self.requires_js |= signals.requires_js;
        self.has_rate_limit |= signals.rate_limit;
        self.has_captcha |= signals.captcha;
        self.difficulty = self.difficulty.max(Difficulty::from_score(self.score()));
    }
}

/// Running success statistics of one method on one domain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MethodStats {
    pub rate: f64,
    pub attempts: u64,
}

impl Default for MethodStats {
    fn default() -> Self {
        Self {
            rate: PRIOR_SUCCESS_RATE,
            attempts: 0,
        }
    }
}

impl MethodStats {
    /// Incremental average over a window capped at [`LEARNING_WINDOW`]
    pub fn record(&mut self, success: bool) {
        self.attempts += 1;
        let outcome = if success { 1.0 } else { 0.0 };
        let window = self.attempts.min(LEARNING_WINDOW) as f64;
        self.rate += (outcome - self.rate) / window;
        self.rate = self.rate.clamp(0.0, 1.0);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNote {
    pub method: Method,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Learned per-domain record of method success rates and site traits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteProfile {
    pub domain: String,
    pub characteristics: SiteCharacteristics,
    pub success_rates: BTreeMap<Method, MethodStats>,
    pub total_attempts: u64,
    pub recent_failures: VecDeque<FailureNote>,
    pub last_updated: DateTime<Utc>,
    pub optimal_strategy: Option<Method>,
}

impl WebsiteProfile {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            characteristics: SiteCharacteristics::default(),
            success_rates: BTreeMap::new(),
            total_attempts: 0,
            recent_failures: VecDeque::new(),
            last_updated: Utc::now(),
            optimal_strategy: None,
        }
    }

    /// Learned success rate, or the prior for an untried method
    pub fn success_rate(&self, method: Method) -> f64 {
        self.success_rates
            .get(&method)
            .map(|s| s.rate)
            .unwrap_or(PRIOR_SUCCESS_RATE)
    }

    pub fn attempts(&self, method: Method) -> u64 {
        self.success_rates.get(&method).map(|s| s.attempts).unwrap_or(0)
    }

    /// Updates the profile after one fetch attempt
    pub fn record_attempt(
        &mut self,
        method: Method,
        success: bool,
        failure_reason: Option<&str>,
        signals: PageSignals,
    ) {
        self.success_rates.entry(method).or_default().record(success);
        self.total_attempts += 1;

        if !success {
            let reason: String = failure_reason
                .unwrap_or("unknown failure")
                .chars()
                .take(MAX_REASON_CHARS)
                .collect();
            self.recent_failures.push_back(FailureNote {
                method,
                reason,
                at: Utc::now(),
            });
            while self.recent_failures.len() > MAX_RECENT_FAILURES {
                self.recent_failures.pop_front();
            }
        }

        let before = self.characteristics.difficulty;
        self.characteristics.observe(signals);
        if self.characteristics.difficulty > before {
            tracing::info!(
                "Difficulty of {} raised from {:?} to {:?}",
                self.domain,
                before,
                self.characteristics.difficulty
            );
        }

        self.optimal_strategy = self.best_tried_method();
        self.last_updated = Utc::now();
    }

    /// Highest weighted success rate among methods with at least one attempt
    fn best_tried_method(&self) -> Option<Method> {
        self.success_rates
            .iter()
            .filter(|(_, stats)| stats.attempts > 0)
            .map(|(method, stats)| (*method, stats.rate * method.cost_weight()))
            .fold(None, |best: Option<(Method, f64)>, (method, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((method, score)),
            })
            .map(|(method, _)| method)
    }
}
