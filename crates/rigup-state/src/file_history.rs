//! Newline-delimited JSON history file.
//!
//! One `HistoryRecord` per line, appended in chronological order. Lines are
//! never rewritten; a process-local lock serialises concurrent appends.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{HistoryRecord, HistoryRecorder, StorageResult};

/// Append-only history stored at a single `.jsonl` path.
#[derive(Debug)]
pub struct JsonlHistoryRecorder {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistoryRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> StorageResult<Vec<HistoryRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| StorageError::Corrupt {
                    path: format!("{}:{}", self.path.display(), n + 1),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl HistoryRecorder for JsonlHistoryRecorder {
    async fn record(&self, record: HistoryRecord) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;

        if self.read_all().await?.iter().any(|r| r.id == record.id) {
            return Err(StorageError::DuplicateRecord { id: record.id });
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(path = %self.path.display(), id = %record.id, "history record appended");
        Ok(())
    }

    async fn list(&self, limit: Option<usize>) -> StorageResult<Vec<HistoryRecord>> {
        let mut records = self.read_all().await?;
        records.reverse();
        if let Some(n) = limit {
            records.truncate(n);
        }
        Ok(records)
    }
}
