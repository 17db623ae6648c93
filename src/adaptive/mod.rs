//! Adaptive strategy selection
//!
//! The process keeps one [`WebsiteProfile`] per domain in a shared
//! [`ProfileStore`]. [`AdaptiveSelector`] ranks the enabled executors by what
//! the profile has learned, falls back on failure, and feeds every outcome
//! back into the profile.

mod profile;
mod selector;
mod store;

pub use profile::{
    Difficulty, FailureNote, MethodStats, SiteCharacteristics, WebsiteProfile, LEARNING_WINDOW,
    MAX_REASON_CHARS, MAX_RECENT_FAILURES, PRIOR_SUCCESS_RATE,
};
pub use selector::{AdaptiveSelector, FetchOutcome};
pub use store::{ProfileStats, ProfileStore, ProfileSummary};
