//! Directory-backed session repository: one `<session_id>.json` per session.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::storage_traits::{SessionId, SessionRecord, SessionRepository, StorageResult};

/// Sessions stored as pretty-printed JSON files under a directory.
#[derive(Debug, Clone)]
pub struct FileSessionRepository {
    dir: PathBuf,
}

impl FileSessionRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", session_id.0))
    }

    fn not_found(session_id: &SessionId) -> StorageError {
        StorageError::SessionNotFound {
            session_id: session_id.0.clone(),
        }
    }
}

#[async_trait]
impl SessionRepository for FileSessionRepository {
    async fn save(&self, record: SessionRecord) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(&record.session_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&record)?;

        // Readers never observe a half-written file.
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), "session saved");
        Ok(())
    }

    async fn find_by_id(&self, session_id: &SessionId) -> StorageResult<SessionRecord> {
        let path = self.path_for(session_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Self::not_found(session_id))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    async fn find_all(&self) -> StorageResult<Vec<SessionRecord>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<SessionRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session"),
            }
        }

        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }

    async fn delete(&self, session_id: &SessionId) -> StorageResult<()> {
        match tokio::fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Self::not_found(session_id)),
            Err(e) => Err(e.into()),
        }
    }
}
