//! Session driver and crawl workers
//!
//! A session runs as one driver task. The driver fetches the start URL on its
//! own (a failure there fails the whole session), then spawns
//! `concurrent` workers that drain the shared frontier until it is empty and
//! no worker has a page in flight.

use super::frontier::{Admission, UrlTask};
use super::session::{NextTask, SessionHandle};
use crate::adaptive::AdaptiveSelector;
use crate::auth::{apply_session, fingerprint, Authenticator};
use crate::config::CrawlConfig;
use crate::executor::{FetchOptions, Method};
use crate::extract::{filter_by_quality, ExtractedContent, StructuredExtractor};
use crate::robots::RobotsCache;
use crate::state::SessionStatus;
use crate::storage::Persistence;
use crate::url::{is_same_domain, normalize_url, UrlFilter};
use crate::{KumoError, Result};
use std::sync::Arc;
use tokio::task::JoinSet;
use url::Url;

/// Collaborators shared by every session of a crawler
pub(crate) struct CrawlContext {
    pub selector: Arc<AdaptiveSelector>,
    pub authenticator: Arc<Authenticator>,
    pub robots: Arc<RobotsCache>,
    pub structured: StructuredExtractor,
    pub storage: Arc<dyn Persistence>,
}

/// Immutable per-session inputs
pub(crate) struct SessionPlan {
    pub domain: String,
    pub start_url: Url,
    pub config: CrawlConfig,
    pub filter: UrlFilter,
}

/// What happened to one dequeued URL
#[derive(Debug, Clone, Copy, PartialEq)]
enum PageOutcome {
    Processed { method: Method, links: usize },
    /// Stop was requested before the fetch started
    Abandoned,
}

/// Runs a session to completion
pub(crate) async fn run_session(
    ctx: Arc<CrawlContext>,
    handle: Arc<SessionHandle>,
    plan: Arc<SessionPlan>,
) {
    // A session paused before the driver got scheduled stays paused until resumed
    if let Err(e) = handle.transition_from(SessionStatus::Pending, SessionStatus::Running) {
        tracing::debug!(session = %handle.id(), "Driver not starting the session: {}", e);
    }
    tracing::info!(
        session = %handle.id(),
        "Starting crawl of {} from {} ({} workers)",
        plan.domain,
        plan.start_url,
        plan.config.concurrent
    );

    if let Err(e) = crawl_start_url(&ctx, &handle, &plan).await {
        tracing::error!(session = %handle.id(), "Start URL failed: {}", e);
        handle.fail(e.to_string());
        persist(&ctx, &handle).await;
        handle.finish();
        return;
    }

    let mut workers = JoinSet::new();
    for worker_id in 0..plan.config.concurrent.max(1) {
        let ctx = ctx.clone();
        let handle = handle.clone();
        let plan = plan.clone();
        workers.spawn(async move { worker_loop(worker_id, ctx, handle, plan).await });
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(session = %handle.id(), "Worker task aborted: {}", e);
        }
    }

    if !handle.status().is_terminal() {
        if let Err(e) = handle.transition(SessionStatus::Completed) {
            tracing::warn!(session = %handle.id(), "Could not complete session: {}", e);
        }
    }

    let progress = handle.progress();
    tracing::info!(
        session = %handle.id(),
        "Crawl finished: {} processed, {} failed, {} skipped, {} structured items",
        progress.processed_urls,
        progress.failed_urls,
        progress.skipped_urls,
        progress.extracted_items
    );
    persist(&ctx, &handle).await;
    handle.finish();
}

/// Admits and fetches the start URL
///
/// Returns an error only when the start URL itself cannot be crawled.
async fn crawl_start_url(
    ctx: &CrawlContext,
    handle: &SessionHandle,
    plan: &SessionPlan,
) -> Result<()> {
    if plan.config.respect_robots && !ctx.robots.is_allowed(&plan.start_url).await {
        return Err(KumoError::RobotsDisallowed {
            url: plan.start_url.to_string(),
        });
    }
    if handle.offer(plan.start_url.clone(), 0, None) != Admission::Queued {
        return Ok(());
    }

    // Hold the start URL back until the session is running
    let task = loop {
        match handle.next_task() {
            NextTask::Fetch(task) => break task,
            NextTask::Idle => handle.idle().await,
            NextTask::Done => return Ok(()),
        }
    };

    revalidate_stored_login(ctx, plan).await;
    let result = process_task(ctx, handle, plan, &task).await;
    handle.finish_task();
    result.map(|_| ())
}

/// Checks a login left over from an earlier crawl before relying on it
///
/// An expired login is cleared, so the first fetch logs in again.
async fn revalidate_stored_login(ctx: &CrawlContext, plan: &SessionPlan) {
    let auth = &plan.config.authentication;
    if !auth.is_enabled() {
        return;
    }
    let arena = ctx.authenticator.arena();
    if !arena.holds(&plan.domain, &fingerprint(auth)).await {
        return;
    }
    match ctx.authenticator.validate_auth(&plan.domain, &plan.start_url).await {
        Ok(true) => tracing::debug!("Stored login for {} is still valid", plan.domain),
        Ok(false) => tracing::info!("Logging in to {} again", plan.domain),
        Err(e) => tracing::warn!("Could not check stored login for {}: {}", plan.domain, e),
    }
}

async fn worker_loop(
    worker_id: u32,
    ctx: Arc<CrawlContext>,
    handle: Arc<SessionHandle>,
    plan: Arc<SessionPlan>,
) {
    tracing::debug!(session = %handle.id(), "Worker {} started", worker_id);
    loop {
        let task = match handle.next_task() {
            NextTask::Fetch(task) => task,
            NextTask::Idle => {
                handle.idle().await;
                continue;
            }
            NextTask::Done => break,
        };

        match process_task(&ctx, &handle, &plan, &task).await {
            Ok(PageOutcome::Processed { method, links }) => {
                tracing::debug!(
                    "Worker {} crawled {} via {} ({} new links)",
                    worker_id,
                    task.url,
                    method,
                    links
                );
            }
            Ok(PageOutcome::Abandoned) => {}
            // Already recorded on the session
            Err(_) => {}
        }
        handle.finish_task();
    }
    tracing::debug!(session = %handle.id(), "Worker {} finished", worker_id);
}

/// Fetches, extracts, stores and expands one URL
///
/// Failures are recorded on the session before being returned.
async fn process_task(
    ctx: &CrawlContext,
    handle: &SessionHandle,
    plan: &SessionPlan,
    task: &UrlTask,
) -> Result<PageOutcome> {
    if handle.is_stopped() {
        return Ok(PageOutcome::Abandoned);
    }
    handle.set_current(&task.url);

    match fetch_and_store(ctx, handle, plan, task).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            handle.record_failure(&task.url, &e);
            Err(e)
        }
    }
}

async fn fetch_and_store(
    ctx: &CrawlContext,
    handle: &SessionHandle,
    plan: &SessionPlan,
    task: &UrlTask,
) -> Result<PageOutcome> {
    let config = &plan.config;
    let mut options = FetchOptions::from_config(config);
    if config.respect_robots {
        if let Some(crawl_delay) = ctx.robots.crawl_delay(&task.url).await {
            options.delay = options.delay.max(crawl_delay);
        }
    }

    // The lease keeps the stored login alive for the duration of the fetch
    let _lease = if config.authentication.is_enabled() {
        let lease = ctx
            .authenticator
            .ensure(&plan.domain, &config.authentication)
            .await?;
        if let Some(lease) = &lease {
            apply_session(lease.session(), &mut options);
        }
        lease
    } else {
        None
    };

    let outcome = ctx
        .selector
        .fetch_with_strategy(&task.url, config, &options)
        .await?;
    let content = outcome.content;

    ctx.storage.save_content(handle.id(), &content).await?;

    let mut found = 0;
    if config.extraction.enable_structured_data {
        let items = ctx
            .structured
            .extract(&content, &config.extraction.data_types);
        found = items.len();
        for item in filter_by_quality(items, config.extraction.quality_threshold) {
            ctx.storage.save_structured_data(handle.id(), &item).await?;
        }
    }

    let links = if task.depth < config.max_depth {
        enqueue_links(ctx, handle, plan, task, &content).await
    } else {
        0
    };

    handle.record_processed(&task.url, outcome.method, content.quality_score, found);
    Ok(PageOutcome::Processed {
        method: outcome.method,
        links,
    })
}

/// Offers the page's in-scope links to the frontier; returns how many were queued
async fn enqueue_links(
    ctx: &CrawlContext,
    handle: &SessionHandle,
    plan: &SessionPlan,
    task: &UrlTask,
    content: &ExtractedContent,
) -> usize {
    let mut queued = 0;
    for link in content.internal_links() {
        if handle.frontier_full() {
            break;
        }
        let Ok(url) = normalize_url(&link.href) else {
            continue;
        };
        let in_domain = url
            .host_str()
            .is_some_and(|host| is_same_domain(&plan.domain, host));
        if !in_domain || !plan.filter.allows(&url) || handle.has_seen(&url) {
            continue;
        }
        if plan.config.respect_robots && !ctx.robots.is_allowed(&url).await {
            handle.record_skipped(&url, "disallowed by robots.txt");
            continue;
        }
        if handle.offer(url, task.depth + 1, Some(task.url.clone())) == Admission::Queued {
            queued += 1;
        }
    }
    queued
}

async fn persist(ctx: &CrawlContext, handle: &SessionHandle) {
    if let Err(e) = ctx.storage.save_session(&handle.snapshot()).await {
        tracing::error!(session = %handle.id(), "Failed to save session: {}", e);
    }
}
