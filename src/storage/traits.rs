//! Storage traits and error types
//!
//! This module defines the trait interface for persistence backends and
//! associated error types.

use crate::crawler::CrawlSession;
use crate::extract::{ExtractedContent, StructuredDataItem};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One page of a paginated query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number
    pub page: usize,
    pub per_page: usize,
    /// Number of items across all pages
    pub total: usize,
}

impl<T> Page<T> {
    /// Slices `all` into the requested page; page numbers below 1 count as 1
    pub fn slice(all: &[T], page: usize, per_page: usize) -> Self
    where
        T: Clone,
    {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let items = all
            .iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .cloned()
            .collect();
        Self {
            items,
            page,
            per_page,
            total: all.len(),
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.per_page.max(1))
    }
}

/// Trait for persistence backend implementations
///
/// The crawler hands every extracted page, every surfaced structured item and
/// every session snapshot to this trait. Implementations are shared between
/// workers and must be safe to call concurrently.
#[async_trait]
pub trait Persistence: Send + Sync {
    // ===== Writes =====

    async fn save_content(&self, session: Uuid, content: &ExtractedContent) -> StorageResult<()>;

    async fn save_structured_data(
        &self,
        session: Uuid,
        item: &StructuredDataItem,
    ) -> StorageResult<()>;

    /// Inserts or replaces the session record
    async fn save_session(&self, session: &CrawlSession) -> StorageResult<()>;

    // ===== Reads =====

    async fn load_session(&self, id: Uuid) -> StorageResult<CrawlSession>;

    /// Extracted pages of a session in save order
    async fn content(
        &self,
        session: Uuid,
        page: usize,
        per_page: usize,
    ) -> StorageResult<Page<ExtractedContent>>;

    /// Structured items of a session, optionally narrowed by schema and minimum quality
    async fn structured_data(
        &self,
        session: Uuid,
        schema: Option<&str>,
        min_quality: Option<f64>,
    ) -> StorageResult<Vec<StructuredDataItem>>;

    // ===== Maintenance =====

    /// Removes the session and everything saved for it
    async fn delete_session(&self, id: Uuid) -> StorageResult<()>;
}
