//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `SessionStatus`: lifecycle state machine of a crawl session
//! - `DomainState` / `DomainPacer`: per-domain request pacing

mod domain_state;
mod session_status;

pub use domain_state::{DomainPacer, DomainState};
pub use session_status::SessionStatus;
