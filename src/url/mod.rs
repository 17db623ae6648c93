//! URL handling module for Kumo-Crawl
//!
//! This module provides URL normalization (the visited-set key), domain
//! extraction, same-domain checks, and include/exclude pattern filtering.

mod domain;
mod matcher;
mod normalize;

pub use domain::{extract_domain, is_same_domain, matches_wildcard};
pub use matcher::UrlFilter;
pub use normalize::{normalize_url, resolve_link};
