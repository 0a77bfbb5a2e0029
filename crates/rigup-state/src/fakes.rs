//! In-memory implementations of the storage traits
//!
//! Provides `MemorySessionRepository` and `MemoryHistoryRecorder` that satisfy
//! the trait contracts without touching the filesystem.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemorySessionRepository
// ---------------------------------------------------------------------------

/// In-memory session repository backed by a `HashMap<SessionId, SessionRecord>`.
#[derive(Debug, Default)]
pub struct MemorySessionRepository {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn save(&self, record: SessionRecord) -> StorageResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(record.session_id.0.clone(), record);
        Ok(())
    }

    async fn find_by_id(&self, session_id: &SessionId) -> StorageResult<SessionRecord> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .get(&session_id.0)
            .cloned()
            .ok_or_else(|| StorageError::SessionNotFound {
                session_id: session_id.0.clone(),
            })
    }

    async fn find_all(&self) -> StorageResult<Vec<SessionRecord>> {
        let sessions = self.sessions.lock().unwrap();
        let mut records: Vec<SessionRecord> = sessions.values().cloned().collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }

    async fn delete(&self, session_id: &SessionId) -> StorageResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .remove(&session_id.0)
            .map(|_| ())
            .ok_or_else(|| StorageError::SessionNotFound {
                session_id: session_id.0.clone(),
            })
    }
}

// ---------------------------------------------------------------------------
// MemoryHistoryRecorder
// ---------------------------------------------------------------------------

/// In-memory append-only history (oldest first internally).
#[derive(Debug, Default)]
pub struct MemoryHistoryRecorder {
    records: Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records written so far.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HistoryRecorder for MemoryHistoryRecorder {
    async fn record(&self, record: HistoryRecord) -> StorageResult<()> {
        let mut records = self.records.lock().unwrap();
        if records.iter().any(|r| r.id == record.id) {
            return Err(StorageError::DuplicateRecord { id: record.id });
        }
        records.push(record);
        Ok(())
    }

    async fn list(&self, limit: Option<usize>) -> StorageResult<Vec<HistoryRecord>> {
        let records = self.records.lock().unwrap();
        let newest_first = records.iter().rev().cloned();
        Ok(match limit {
            Some(n) => newest_first.take(n).collect(),
            None => newest_first.collect(),
        })
    }
}
