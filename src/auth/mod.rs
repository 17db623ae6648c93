//! Authentication automation
//!
//! [`Authenticator`] turns an [`AuthConfig`](crate::config::AuthConfig) into
//! request headers and cookies: directly for basic, bearer and cookie
//! schemes, or by driving a login form in a browser. Successful logins live in
//! the shared [`AuthArena`] so every session crawling a domain reuses them.

mod arena;
mod authenticator;
mod selectors;

pub use arena::{fingerprint, AuthArena, AuthLease, AuthSession, AuthState, DEFAULT_SESSION_TTL};
pub use authenticator::{apply_session, AuthTestReport, Authenticator};
pub use selectors::LoginSelectors;
