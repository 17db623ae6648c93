//! Crawl session state, progress and events

use super::frontier::{Admission, Frontier, UrlTask};
use crate::config::CrawlConfig;
use crate::executor::Method;
use crate::state::SessionStatus;
use crate::{KumoError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use url::Url;
use uuid::Uuid;

/// Capacity of the per-session event channel; slow subscribers lag, workers never block
const EVENT_CAPACITY: usize = 256;

/// Upper bound for an idle worker's sleep between frontier checks
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Progress counters of a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub processed_urls: u64,
    /// URLs admitted into the frontier
    pub total_urls: u64,
    pub failed_urls: u64,
    /// URLs left out by robots.txt
    pub skipped_urls: u64,
    /// Structured items found, before the quality filter
    pub extracted_items: u64,
    pub current_url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// One per-URL failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub url: String,
    pub kind: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A crawl of one domain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSession {
    pub id: Uuid,
    pub domain: String,
    pub start_url: String,
    pub config: CrawlConfig,
    pub status: SessionStatus,
    pub stats: SessionStats,
    pub failures: Vec<FailureRecord>,
    /// Why the session failed, if it did
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CrawlSession {
    pub fn new(domain: impl Into<String>, start_url: &Url, config: CrawlConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            domain: domain.into(),
            start_url: start_url.to_string(),
            config,
            status: SessionStatus::Pending,
            stats: SessionStats::default(),
            failures: Vec::new(),
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// Point-in-time view of a session's progress
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub id: Uuid,
    pub status: SessionStatus,
    pub processed_urls: u64,
    pub total_urls: u64,
    pub failed_urls: u64,
    pub skipped_urls: u64,
    pub extracted_items: u64,
    pub pending_urls: usize,
    pub current_url: Option<String>,
    /// Finished share of admitted URLs, 0 to 100
    pub percent: f64,
    pub elapsed_ms: u64,
}

/// Notifications published while a session runs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    StatusChanged {
        session: Uuid,
        from: SessionStatus,
        to: SessionStatus,
    },
    PageProcessed {
        session: Uuid,
        url: String,
        method: Method,
        quality_score: f64,
    },
    PageFailed {
        session: Uuid,
        url: String,
        kind: String,
        reason: String,
    },
    PageSkipped {
        session: Uuid,
        url: String,
        reason: String,
    },
    Finished {
        session: Uuid,
        status: SessionStatus,
        stats: SessionStats,
    },
}

/// What a worker should do next
#[derive(Debug)]
pub(crate) enum NextTask {
    Fetch(UrlTask),
    /// Nothing to do right now (paused, or peers may still discover links)
    Idle,
    /// Frontier drained or stop requested
    Done,
}

struct Queue {
    frontier: Frontier,
    in_flight: usize,
    /// URLs already counted as skipped
    skipped: HashSet<String>,
}

/// Shared state of a running session
///
/// Lock order is queue, then session.
pub(crate) struct SessionHandle {
    id: Uuid,
    session: Mutex<CrawlSession>,
    queue: Mutex<Queue>,
    stop: AtomicBool,
    wake: Notify,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn new(session: CrawlSession) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id: session.id,
            queue: Mutex::new(Queue {
                frontier: Frontier::new(session.config.max_pages, session.config.max_depth),
                in_flight: 0,
                skipped: HashSet::new(),
            }),
            session: Mutex::new(session),
            stop: AtomicBool::new(false),
            wake: Notify::new(),
            events,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn session(&self) -> MutexGuard<'_, CrawlSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> CrawlSession {
        self.session().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.session().status
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Moves the session to `to`, stamping start and end times
    pub fn transition(&self, to: SessionStatus) -> Result<()> {
        self.apply_transition(None, to)
    }

    /// Moves the session to `to` only while it is still in `expected`
    pub fn transition_from(&self, expected: SessionStatus, to: SessionStatus) -> Result<()> {
        self.apply_transition(Some(expected), to)
    }

    fn apply_transition(&self, expected: Option<SessionStatus>, to: SessionStatus) -> Result<()> {
        let from = {
            let mut session = self.session();
            let from = session.status;
            if expected.is_some_and(|e| e != from) || !from.can_transition_to(to) {
                return Err(KumoError::InvalidTransition { from, to });
            }
            session.status = to;
            if to == SessionStatus::Running && session.stats.start_time.is_none() {
                session.stats.start_time = Some(Utc::now());
            }
            if to.is_terminal() {
                session.stats.end_time = Some(Utc::now());
                session.stats.current_url = None;
            }
            from
        };

        tracing::info!(session = %self.id, "Session {} -> {}", from, to);
        self.emit(SessionEvent::StatusChanged {
            session: self.id,
            from,
            to,
        });
        self.wake.notify_waiters();
        Ok(())
    }

    /// Marks the session failed with a reason
    pub fn fail(&self, reason: String) {
        self.session().error = Some(reason);
        if let Err(e) = self.transition(SessionStatus::Failed) {
            tracing::debug!(session = %self.id, "Not marking session failed: {}", e);
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Offers a URL to the frontier, counting admitted URLs
    pub fn offer(&self, url: Url, depth: u32, parent: Option<Url>) -> Admission {
        let mut queue = self.queue();
        let admission = queue.frontier.offer(url, depth, parent);
        if admission == Admission::Queued {
            self.session().stats.total_urls = queue.frontier.admitted() as u64;
            self.wake.notify_one();
        }
        admission
    }

    pub fn has_seen(&self, url: &Url) -> bool {
        self.queue().frontier.has_seen(url)
    }

    pub fn frontier_full(&self) -> bool {
        self.queue().frontier.is_full()
    }

    /// Takes the next task; the caller must call [`SessionHandle::finish_task`] for it
    pub fn next_task(&self) -> NextTask {
        if self.is_stopped() {
            return NextTask::Done;
        }
        let mut queue = self.queue();
        match self.status() {
            SessionStatus::Paused | SessionStatus::Pending => return NextTask::Idle,
            SessionStatus::Completed | SessionStatus::Failed => return NextTask::Done,
            SessionStatus::Running => {}
        }

        match queue.frontier.pop() {
            Some(task) => {
                queue.in_flight += 1;
                NextTask::Fetch(task)
            }
            None if queue.in_flight == 0 => NextTask::Done,
            None => NextTask::Idle,
        }
    }

    pub fn finish_task(&self) {
        let mut queue = self.queue();
        queue.in_flight = queue.in_flight.saturating_sub(1);
        drop(queue);
        self.wake.notify_waiters();
    }

    /// Sleeps until something changes, or briefly if nothing does
    pub async fn idle(&self) {
        let _ = tokio::time::timeout(IDLE_POLL, self.wake.notified()).await;
    }

    pub fn set_current(&self, url: &Url) {
        self.session().stats.current_url = Some(url.to_string());
    }

    pub fn record_processed(&self, url: &Url, method: Method, quality_score: f64, items: usize) {
        {
            let mut session = self.session();
            session.stats.processed_urls += 1;
            session.stats.extracted_items += items as u64;
        }
        self.emit(SessionEvent::PageProcessed {
            session: self.id,
            url: url.to_string(),
            method,
            quality_score,
        });
    }

    pub fn record_failure(&self, url: &Url, error: &KumoError) {
        let record = FailureRecord {
            url: url.to_string(),
            kind: error.kind().to_string(),
            reason: error.reason(),
            at: Utc::now(),
        };
        tracing::warn!(session = %self.id, url = %url, "Page failed: {}", record.reason);
        {
            let mut session = self.session();
            session.stats.failed_urls += 1;
            session.failures.push(record.clone());
        }
        self.emit(SessionEvent::PageFailed {
            session: self.id,
            url: record.url,
            kind: record.kind,
            reason: record.reason,
        });
    }

    /// Counts a URL left out of the crawl; each URL is counted once
    pub fn record_skipped(&self, url: &Url, reason: &str) {
        if !self.queue().skipped.insert(url.to_string()) {
            return;
        }
        tracing::debug!(session = %self.id, url = %url, "Skipped: {}", reason);
        self.session().stats.skipped_urls += 1;
        self.emit(SessionEvent::PageSkipped {
            session: self.id,
            url: url.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn progress(&self) -> SessionProgress {
        let pending = self.queue().frontier.pending();
        let session = self.session();
        let stats = &session.stats;
        let finished = stats.processed_urls + stats.failed_urls;
        let percent = if stats.total_urls == 0 {
            0.0
        } else {
            (finished as f64 / stats.total_urls as f64 * 100.0).min(100.0)
        };
        let elapsed_ms = stats
            .start_time
            .map(|start| {
                let end = stats.end_time.unwrap_or_else(Utc::now);
                (end - start).num_milliseconds().max(0) as u64
            })
            .unwrap_or(0);

        SessionProgress {
            id: session.id,
            status: session.status,
            processed_urls: stats.processed_urls,
            total_urls: stats.total_urls,
            failed_urls: stats.failed_urls,
            skipped_urls: stats.skipped_urls,
            extracted_items: stats.extracted_items,
            pending_urls: pending,
            current_url: stats.current_url.clone(),
            percent,
            elapsed_ms,
        }
    }

    /// Publishes the final event
    pub fn finish(&self) {
        let session = self.snapshot();
        self.emit(SessionEvent::Finished {
            session: self.id,
            status: session.status,
            stats: session.stats,
        });
    }
}
