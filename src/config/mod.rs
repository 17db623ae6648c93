//! Configuration module for Kumo-Crawl
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and validating the per-session `CrawlConfig` handed to `Crawler::start_crawl`.
//!
//! # Example
//!
//! ```no_run
//! use kumo_crawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawl.toml")).unwrap();
//! println!("Crawler will use max depth: {}", config.crawl.settings.max_depth);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    AuthConfig, AuthType, CaptchaSolver, CookieSpec, Config, CrawlConfig, CrawlSection,
    ExtractionConfig, ProfilesConfig, StealthLevel, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::{validate_crawl_config, validate_start_url};
