//! Finished-match history storage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::bracket::Phase;

/// A finished match as stored. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedMatch {
    pub id: i64,
    pub name_a: String,
    pub name_b: String,
    pub score_a: u32,
    pub score_b: u32,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
}

/// Final values of a match, before the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMatchRecord {
    pub name_a: String,
    pub name_b: String,
    pub score_a: u32,
    pub score_b: u32,
    pub phase: Phase,
}

/// History store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("History store unavailable: {0}")]
    Unavailable(String),
}

/// Persists and retrieves finished matches
#[async_trait]
pub trait MatchHistoryStore: Send + Sync {
    /// Write a record and return it with its assigned id and timestamp
    async fn create(&self, record: NewMatchRecord) -> Result<PersistedMatch, StoreError>;

    /// Remove a record. `Ok(false)` when the id did not exist.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;

    /// All records, oldest first (ties broken by id)
    async fn find_all_ordered(&self) -> Result<Vec<PersistedMatch>, StoreError>;
}

/// Process-local store, used when no remote database is configured
#[derive(Default)]
pub struct MemoryMatchStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    records: Vec<PersistedMatch>,
}

impl MemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryMatchStore {
    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }
}

#[async_trait]
impl MatchHistoryStore for MemoryMatchStore {
    async fn create(&self, record: NewMatchRecord) -> Result<PersistedMatch, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;

        let persisted = PersistedMatch {
            id: inner.next_id,
            name_a: record.name_a,
            name_b: record.name_b,
            score_a: record.score_a,
            score_b: record.score_b,
            phase: record.phase,
            created_at: Utc::now(),
        };
        inner.records.push(persisted.clone());

        Ok(persisted)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let before = inner.records.len();
        inner.records.retain(|r| r.id != id);
        Ok(inner.records.len() != before)
    }

    async fn find_all_ordered(&self) -> Result<Vec<PersistedMatch>, StoreError> {
        let mut records = self.inner.lock().await.records.clone();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }
}
