//! Crawler module for session scheduling and coordination
//!
//! This module contains the core crawling logic, including:
//! - The per-session URL frontier and visited-set
//! - Session lifecycle, progress counters and events
//! - The worker pool that fetches, extracts and expands pages
//! - The [`Crawler`] facade that manages sessions

mod coordinator;
mod frontier;
mod session;
mod worker;

pub use coordinator::{Crawler, CrawlerBuilder};
pub use frontier::{Admission, Frontier, UrlTask};
pub use session::{CrawlSession, FailureRecord, SessionEvent, SessionProgress, SessionStats};
