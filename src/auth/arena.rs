use crate::config::AuthConfig;
use crate::executor::Cookie;
use crate::{AuthError, AuthResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

/// Default lifetime of a stored login
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Authentication material for one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub domain: String,
    pub cookies: Vec<Cookie>,
    /// Static headers such as `Authorization`
    pub headers: Vec<(String, String)>,
    pub authenticated: bool,
    pub authenticated_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn new(domain: impl Into<String>, headers: Vec<(String, String)>, cookies: Vec<Cookie>) -> Self {
        Self {
            domain: domain.into(),
            cookies,
            headers,
            authenticated: true,
            authenticated_at: Utc::now(),
        }
    }
}

/// Where a domain is in the login state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    LoggingIn,
    Authenticated,
    Failed,
}

/// Stable hash of an auth configuration, used to remember failed logins
pub fn fingerprint(config: &AuthConfig) -> String {
    let encoded = serde_json::to_vec(config).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}

enum SlotState {
    Empty,
    Ready {
        session: AuthSession,
        fingerprint: String,
        stored: Instant,
    },
    Failed { fingerprint: String, error: AuthError },
}

struct Slot {
    state: AsyncMutex<SlotState>,
    leases: AtomicUsize,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: AsyncMutex::new(SlotState::Empty),
            leases: AtomicUsize::new(0),
        }
    }
}

/// A checked-out login; the slot is not evicted while a lease is alive
pub struct AuthLease {
    slot: Arc<Slot>,
    session: AuthSession,
}

impl AuthLease {
    fn new(slot: Arc<Slot>, session: AuthSession) -> Self {
        slot.leases.fetch_add(1, Ordering::SeqCst);
        Self { slot, session }
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }
}

impl Drop for AuthLease {
    fn drop(&mut self) {
        self.slot.leases.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for AuthLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthLease")
            .field("domain", &self.session.domain)
            .finish()
    }
}

/// Per-domain store of logins shared by every session
///
/// Each domain slot has its own async lock. The first caller runs the login
/// while holding it, so concurrent callers for the same domain wait and then
/// reuse the result instead of logging in again.
pub struct AuthArena {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    ttl: Duration,
}

impl Default for AuthArena {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl AuthArena {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn slot(&self, domain: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone()
    }

    fn existing(&self, domain: &str) -> Option<Arc<Slot>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(domain).cloned()
    }

    /// Returns the domain's login, running `login` if there is no fresh one
    ///
    /// A stored login is reused only for the configuration fingerprint it was
    /// made with. A login that failed for the same fingerprint is not retried;
    /// its error is returned again.
    ///
    /// # Arguments
    ///
    /// * `domain` - Slot key
    /// * `fingerprint` - [`fingerprint`] of the auth configuration in use
    /// * `login` - Runs the login flow; only called while the slot lock is held
    pub async fn checkout<F, Fut>(&self, domain: &str, fingerprint: &str, login: F) -> AuthResult<AuthLease>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AuthResult<AuthSession>>,
    {
        let slot = self.slot(domain);
        let mut state = slot.state.lock().await;

        match &*state {
            SlotState::Ready {
                session,
                fingerprint: made_with,
                stored,
            } if made_with == fingerprint && stored.elapsed() < self.ttl => {
                tracing::trace!("Reusing stored login for {}", domain);
                return Ok(AuthLease::new(slot.clone(), session.clone()));
            }
            SlotState::Ready { .. } => {
                tracing::debug!("Stored login for {} is stale or was made with another configuration", domain);
            }
            SlotState::Failed {
                fingerprint: failed,
                error,
            } if failed == fingerprint => {
                tracing::debug!("Login for {} failed before with this configuration", domain);
                return Err(error.clone());
            }
            _ => {}
        }

        match login().await {
            Ok(session) => {
                tracing::info!("Authenticated to {}", domain);
                *state = SlotState::Ready {
                    session: session.clone(),
                    fingerprint: fingerprint.to_string(),
                    stored: Instant::now(),
                };
                Ok(AuthLease::new(slot.clone(), session))
            }
            Err(error) => {
                tracing::warn!("Authentication to {} failed: {}", domain, error);
                *state = SlotState::Failed {
                    fingerprint: fingerprint.to_string(),
                    error: error.clone(),
                };
                Err(error)
            }
        }
    }

    /// Leases the stored login without ever running one
    pub async fn lease(&self, domain: &str) -> Option<AuthLease> {
        let slot = self.existing(domain)?;
        let state = slot.state.lock().await;
        match &*state {
            SlotState::Ready { session, stored, .. } if stored.elapsed() < self.ttl => {
                Some(AuthLease::new(slot.clone(), session.clone()))
            }
            _ => None,
        }
    }

    /// True if a fresh login made with `fingerprint` is stored for the domain
    pub async fn holds(&self, domain: &str, fingerprint: &str) -> bool {
        let Some(slot) = self.existing(domain) else {
            return false;
        };
        let state = slot.state.lock().await;
        matches!(
            &*state,
            SlotState::Ready { fingerprint: made_with, stored, .. }
                if made_with == fingerprint && stored.elapsed() < self.ttl
        )
    }

    /// Current state; a slot whose lock is held is mid-login
    pub fn state(&self, domain: &str) -> AuthState {
        let Some(slot) = self.existing(domain) else {
            return AuthState::Unauthenticated;
        };
        let Ok(state) = slot.state.try_lock() else {
            return AuthState::LoggingIn;
        };
        match &*state {
            SlotState::Empty => AuthState::Unauthenticated,
            SlotState::Ready { stored, .. } if stored.elapsed() < self.ttl => AuthState::Authenticated,
            SlotState::Ready { .. } => AuthState::Unauthenticated,
            SlotState::Failed { .. } => AuthState::Failed,
        }
    }

    /// Forgets the domain's login (and any remembered failure)
    pub async fn invalidate(&self, domain: &str) {
        if let Some(slot) = self.existing(domain) {
            *slot.state.lock().await = SlotState::Empty;
            tracing::debug!("Cleared stored login for {}", domain);
        }
    }

    /// Drops expired or empty slots that nobody holds a lease on
    ///
    /// Returns the number of evicted slots.
    pub fn evict_expired(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        slots.retain(|_, slot| {
            if slot.leases.load(Ordering::SeqCst) > 0 {
                return true;
            }
            match slot.state.try_lock() {
                Ok(state) => match &*state {
                    SlotState::Ready { stored, .. } => stored.elapsed() < self.ttl,
                    SlotState::Failed { .. } => true,
                    SlotState::Empty => false,
                },
                Err(_) => true,
            }
        });
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
