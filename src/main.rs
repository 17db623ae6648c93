//! Kumo-Crawl main entry point
//!
//! This is the command-line interface for the Kumo-Crawl adaptive crawler.

use anyhow::Context;
use clap::Parser;
use kumo_crawl::config::{load_config_with_hash, AuthType, Config};
use kumo_crawl::crawler::{CrawlSession, SessionEvent};
use kumo_crawl::{Crawler, CrawlerBuilder, ProfileStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Kumo-Crawl: an adaptive whole-domain crawler
///
/// Kumo-Crawl crawls one domain breadth-first, extracts content and
/// structured data from every page, and learns per site which fetching
/// strategy works best.
#[derive(Parser, Debug)]
#[command(name = "kumo-crawl")]
#[command(version)]
#[command(about = "An adaptive whole-domain crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Start URL, overriding `start-url` from the configuration
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "test_auth")]
    dry_run: bool,

    /// Run the configured authentication against URL and exit
    #[arg(long, value_name = "URL", conflicts_with = "dry_run")]
    test_auth: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if let Some(url) = cli.url {
        config.crawl.start_url = url;
    }

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    let profiles = Arc::new(ProfileStore::new());
    if let Some(path) = &config.profiles.path {
        load_profiles(&profiles, Path::new(path)).await;
    }
    let crawler = build_crawler(&config, profiles.clone()).await?;

    if let Some(target) = cli.test_auth {
        return handle_test_auth(&crawler, &config, &target).await;
    }

    let result = handle_crawl(&crawler, &config).await;

    if let Some(path) = &config.profiles.path {
        profiles
            .save_to(Path::new(path))
            .await
            .with_context(|| format!("Failed to export profiles to {}", path))?;
        tracing::info!("Exported learned profiles to {}", path);
    }
    result
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("kumo_crawl=info,warn"),
            1 => EnvFilter::new("kumo_crawl=debug,info"),
            2 => EnvFilter::new("kumo_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

async fn load_profiles(profiles: &ProfileStore, path: &Path) {
    if !path.exists() {
        tracing::info!("No profile file at {}, starting without learned profiles", path.display());
        return;
    }
    match profiles.load_from(path).await {
        Ok(count) => tracing::info!("Imported {} learned profiles from {}", count, path.display()),
        Err(e) => tracing::warn!("Ignoring unreadable profile file {}: {}", path.display(), e),
    }
}

fn needs_browser(config: &Config) -> bool {
    let settings = &config.crawl.settings;
    settings.enable_dynamic_scraping
        || settings.enable_stealth_scraping
        || settings.force_method.is_some_and(|m| m.needs_browser())
        || settings.authentication.auth_type == AuthType::Form
}

async fn build_crawler(config: &Config, profiles: Arc<ProfileStore>) -> anyhow::Result<Crawler> {
    let builder = CrawlerBuilder::new(config.user_agent.clone()).profile_store(profiles);
    let builder = attach_browser(builder, needs_browser(config)).await;
    builder.build().context("Failed to build crawler")
}

#[cfg(feature = "browser")]
async fn attach_browser(builder: CrawlerBuilder, wanted: bool) -> CrawlerBuilder {
    use kumo_crawl::executor::ChromeDriver;

    if !wanted {
        return builder;
    }
    match ChromeDriver::launch().await {
        Ok(driver) => builder.browser_driver(Arc::new(driver)),
        Err(e) => {
            tracing::warn!("Browser unavailable, continuing with HTTP executors only: {}", e);
            builder
        }
    }
}

#[cfg(not(feature = "browser"))]
async fn attach_browser(builder: CrawlerBuilder, wanted: bool) -> CrawlerBuilder {
    if wanted {
        tracing::warn!(
            "Built without the `browser` feature; dynamic, stealth and form login are unavailable"
        );
    }
    builder
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) {
    let settings = &config.crawl.settings;
    println!("=== Kumo-Crawl Dry Run ===\n");

    println!("Crawl Configuration:");
    println!("  Start URL: {}", config.crawl.start_url);
    println!("  Max pages: {}", settings.max_pages);
    println!("  Max depth: {}", settings.max_depth);
    println!("  Workers: {}", settings.concurrent);
    println!("  Delay: {}ms", settings.delay);
    println!("  Timeout: {}ms", settings.timeout);
    println!("  Respect robots.txt: {}", settings.respect_robots);

    println!("\nStrategies:");
    match settings.force_method {
        Some(method) => println!("  Forced: {}", method),
        None => {
            println!("  Dynamic: {}", settings.enable_dynamic_scraping);
            println!("  Stealth: {} ({:?})", settings.enable_stealth_scraping, settings.stealth_level);
            println!("  API: {}", settings.enable_api_scraping);
            println!("  Adaptive ranking: {}", settings.enable_adaptive_scraping);
        }
    }
    println!("  Learning: {}", settings.learning_mode);
    println!("  CAPTCHA policy: {}", settings.captcha_solver);

    println!("\nAuthentication: {:?}", settings.authentication.auth_type);

    let extraction = &settings.extraction;
    println!("\nStructured data: {}", extraction.enable_structured_data);
    if extraction.enable_structured_data {
        let schemas = if extraction.data_types.is_empty() {
            "all".to_string()
        } else {
            extraction.data_types.join(", ")
        };
        println!("  Schemas: {}", schemas);
        println!("  Quality threshold: {}", extraction.quality_threshold);
    }

    println!("\nUser Agent: {}", config.user_agent.user_agent_string());

    println!("\n✓ Configuration is valid");
}

/// Handles the --test-auth mode: logs in once and reports the outcome
async fn handle_test_auth(crawler: &Crawler, config: &Config, target: &str) -> anyhow::Result<()> {
    let auth = &config.crawl.settings.authentication;
    let report = crawler
        .test_authentication(auth, target)
        .await
        .context("Authentication test could not run")?;

    println!("=== Authentication Test ===\n");
    println!("Domain: {}", report.domain);
    println!("Type: {:?}", auth.auth_type);
    if report.success {
        println!("✓ Login succeeded ({} cookies, {} headers)", report.cookies, report.headers);
        match report.target_status {
            Some(status) => println!("  {} answered HTTP {}", target, status),
            None => println!("  {} could not be fetched", target),
        }
        Ok(())
    } else {
        let reason = report.error.unwrap_or_default();
        println!("✗ Login failed: {}", reason);
        anyhow::bail!("authentication failed: {}", reason)
    }
}

/// Handles the main crawl operation
async fn handle_crawl(crawler: &Crawler, config: &Config) -> anyhow::Result<()> {
    let id = crawler
        .start_crawl(&config.crawl.start_url, config.crawl.settings.clone())
        .await
        .context("Failed to start crawl")?;

    let mut events = crawler.subscribe(id)?;
    let progress = tokio::spawn(async move {
        let start_time = Instant::now();
        let mut pages_crawled = 0u64;
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    pages_crawled += missed;
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event {
                SessionEvent::PageProcessed { .. } | SessionEvent::PageFailed { .. } => {
                    pages_crawled += 1;
                    // Progress reporting every 10 pages
                    if pages_crawled % 10 == 0 {
                        let rate = pages_crawled as f64 / start_time.elapsed().as_secs_f64();
                        tracing::info!("Progress: {} pages crawled, {:.2} pages/sec", pages_crawled, rate);
                    }
                }
                SessionEvent::Finished { .. } => break,
                _ => {}
            }
        }
    });

    let session = tokio::select! {
        session = crawler.wait(id) => session?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, letting in-flight pages finish");
            crawler.stop(id)?;
            crawler.wait(id).await?
        }
    };
    progress.abort();

    print_summary(crawler, &session).await?;
    if let Some(error) = &session.error {
        anyhow::bail!("crawl failed: {}", error);
    }
    Ok(())
}

async fn print_summary(crawler: &Crawler, session: &CrawlSession) -> anyhow::Result<()> {
    let stats = &session.stats;
    let structured = crawler.structured_data(session.id, None, None).await?;
    let success_rates = crawler.success_rates().await;

    println!("\n=== Crawl Summary ===\n");
    println!("Session: {}", session.id);
    println!("Domain: {}", session.domain);
    println!("Status: {}", session.status);
    println!("Pages processed: {}", stats.processed_urls);
    println!("Pages admitted: {}", stats.total_urls);
    println!("Pages failed: {}", stats.failed_urls);
    println!("Pages skipped (robots.txt): {}", stats.skipped_urls);
    println!("Structured items: {} found, {} kept", stats.extracted_items, structured.len());

    if let Some(rates) = success_rates.get(&session.domain) {
        println!("\nLearned success rates:");
        for (method, rate) in rates {
            println!("  {:<8} {:.2}", method.to_string(), rate);
        }
    }

    if !session.failures.is_empty() {
        println!("\nFailures:");
        for failure in session.failures.iter().take(20) {
            println!("  [{}] {}: {}", failure.kind, failure.url, failure.reason);
        }
        if session.failures.len() > 20 {
            println!("  ... and {} more", session.failures.len() - 20);
        }
    }
    Ok(())
}
