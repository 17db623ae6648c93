//! In-memory storage implementation
//!
//! This module provides a process-local implementation of the Persistence trait.

use super::traits::{Page, Persistence, StorageError, StorageResult};
use crate::crawler::CrawlSession;
use crate::extract::{ExtractedContent, StructuredDataItem};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct SessionRecord {
    session: Option<CrawlSession>,
    content: Vec<ExtractedContent>,
    structured: Vec<StructuredDataItem>,
}

/// Keeps sessions, pages and structured items in memory
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<Uuid, SessionRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<Uuid, SessionRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of sessions with a stored record
    pub fn session_count(&self) -> usize {
        self.records().values().filter(|r| r.session.is_some()).count()
    }
}

#[async_trait]
impl Persistence for MemoryStorage {
    async fn save_content(&self, session: Uuid, content: &ExtractedContent) -> StorageResult<()> {
        self.records()
            .entry(session)
            .or_default()
            .content
            .push(content.clone());
        Ok(())
    }

    async fn save_structured_data(
        &self,
        session: Uuid,
        item: &StructuredDataItem,
    ) -> StorageResult<()> {
        self.records()
            .entry(session)
            .or_default()
            .structured
            .push(item.clone());
        Ok(())
    }

    async fn save_session(&self, session: &CrawlSession) -> StorageResult<()> {
        self.records().entry(session.id).or_default().session = Some(session.clone());
        Ok(())
    }

    async fn load_session(&self, id: Uuid) -> StorageResult<CrawlSession> {
        self.records()
            .get(&id)
            .and_then(|r| r.session.clone())
            .ok_or(StorageError::SessionNotFound(id))
    }

    async fn content(
        &self,
        session: Uuid,
        page: usize,
        per_page: usize,
    ) -> StorageResult<Page<ExtractedContent>> {
        let records = self.records();
        let record = records
            .get(&session)
            .ok_or(StorageError::SessionNotFound(session))?;
        Ok(Page::slice(&record.content, page, per_page))
    }

    async fn structured_data(
        &self,
        session: Uuid,
        schema: Option<&str>,
        min_quality: Option<f64>,
    ) -> StorageResult<Vec<StructuredDataItem>> {
        let records = self.records();
        let record = records
            .get(&session)
            .ok_or(StorageError::SessionNotFound(session))?;
        Ok(record
            .structured
            .iter()
            .filter(|item| schema.map_or(true, |s| item.schema == s))
            .filter(|item| min_quality.map_or(true, |q| item.quality_score >= q))
            .cloned()
            .collect())
    }

    async fn delete_session(&self, id: Uuid) -> StorageResult<()> {
        self.records()
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::SessionNotFound(id))
    }
}
