use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Floor applied to the pacing delay while a domain is rate limited
const RATE_LIMIT_FLOOR: Duration = Duration::from_secs(1);

/// Tracks request pacing for a single domain
#[derive(Debug, Clone, Default)]
pub struct DomainState {
    /// Number of requests made to this domain
    pub request_count: u64,

    /// Timestamp of the last request to this domain
    pub last_request_time: Option<Instant>,

    /// Whether this domain recently answered HTTP 429
    pub rate_limited: bool,
}

impl DomainState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay actually enforced for this domain
    ///
    /// While rate limited the configured delay is doubled, with a one-second floor.
    pub fn effective_delay(&self, delay: Duration) -> Duration {
        if self.rate_limited {
            std::cmp::max(delay * 2, RATE_LIMIT_FLOOR)
        } else {
            delay
        }
    }

    /// Calculates the time until the next request can be made
    ///
    /// Returns None if a request can be made now.
    pub fn time_until_next_request(&self, delay: Duration, now: Instant) -> Option<Duration> {
        let last = self.last_request_time?;
        let min_delay = self.effective_delay(delay);
        let elapsed = now.saturating_duration_since(last);
        (elapsed < min_delay).then(|| min_delay - elapsed)
    }

    /// Checks if a request can be made to this domain now
    pub fn can_request(&self, delay: Duration, now: Instant) -> bool {
        self.time_until_next_request(delay, now).is_none()
    }

    /// Records that a request was made to this domain
    pub fn record_request(&mut self, now: Instant) {
        self.request_count += 1;
        self.last_request_time = Some(now);
    }

    pub fn mark_rate_limited(&mut self) {
        self.rate_limited = true;
    }

    pub fn clear_rate_limit(&mut self) {
        self.rate_limited = false;
    }
}

/// Per-domain request pacing shared by every session of the process
///
/// Each domain has its own async lock; a worker holds it while it waits for its
/// turn, so requests to one domain are spaced by at least the delay while other
/// domains proceed independently.
#[derive(Debug, Default)]
pub struct DomainPacer {
    domains: Mutex<HashMap<String, Arc<tokio::sync::Mutex<DomainState>>>>,
}

impl DomainPacer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, domain: &str) -> Arc<tokio::sync::Mutex<DomainState>> {
        let mut domains = self.domains.lock().unwrap_or_else(|e| e.into_inner());
        domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(DomainState::new())))
            .clone()
    }

    /// Waits until at least `delay` has passed since the domain's last request,
    /// then records a new request
    ///
    /// Returns how long the caller waited.
    pub async fn wait_turn(&self, domain: &str, delay: Duration) -> Duration {
        let slot = self.slot(domain);
        let mut state = slot.lock().await;

        let waited = match state.time_until_next_request(delay, Instant::now()) {
            Some(wait) => {
                tracing::trace!("Pacing {}: waiting {:?}", domain, wait);
                tokio::time::sleep(wait).await;
                wait
            }
            None => Duration::ZERO,
        };

        state.record_request(Instant::now());
        waited
    }

    pub async fn mark_rate_limited(&self, domain: &str) {
        self.slot(domain).lock().await.mark_rate_limited();
    }

    pub async fn clear_rate_limit(&self, domain: &str) {
        self.slot(domain).lock().await.clear_rate_limit();
    }

    /// Returns a copy of a domain's pacing state
    pub async fn snapshot(&self, domain: &str) -> DomainState {
        self.slot(domain).lock().await.clone()
    }
}
