//! Storage trait definitions for rigup
//!
//! These traits define the persistence abstractions the engine consumes:
//! - `SessionRepository`: snapshots of orchestration sessions (save/find/list/delete)
//! - `HistoryRecorder`: append-only audit log of installation runs
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! via the `fakes` module; file-backed implementations live alongside.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Unique identifier for an orchestration session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random SessionId
    pub fn new() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

/// Overall status of a session.
///
/// `InProgress` and `Warning` are not failures; `Failed` and `Cancelled`
/// are distinct terminal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Warning,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Warning => "warning",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Whether no further work will happen for a session in this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Warning
                | SessionStatus::Failed
                | SessionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rollback action as persisted: enough to replay it in another process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRollback {
    /// Tag of the component or check that registered the action
    pub subject: String,
    /// Human description ("remove packages sway, swaybg")
    pub description: String,
    /// Serialized compensating intent
    pub intent: serde_json::Value,
    pub captured_at: DateTime<Utc>,
}

/// Snapshot of a session, saved once a run finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    /// What kind of run produced the session ("installation", "preflight", ...)
    pub label: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Ordered operation results
    pub results: serde_json::Value,
    /// Rollback log in registration order
    pub rollback: Vec<StoredRollback>,
}

/// Session persistence.
///
/// Guarantees:
/// - `save` is an upsert keyed by `session_id`.
/// - `find_all` returns sessions newest first (by `started_at`).
/// - Safe for concurrent use from many in-flight installations.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert or replace a session snapshot.
    async fn save(&self, record: SessionRecord) -> StorageResult<()>;

    /// Retrieve a session. Returns `StorageError::SessionNotFound` if absent.
    async fn find_by_id(&self, session_id: &SessionId) -> StorageResult<SessionRecord>;

    /// List every stored session, newest first.
    async fn find_all(&self) -> StorageResult<Vec<SessionRecord>>;

    /// Delete a session. Returns `StorageError::SessionNotFound` if absent.
    async fn delete(&self, session_id: &SessionId) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Outcome of an installation run as recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    Success,
    Failed,
    Cancelled,
}

impl std::fmt::Display for HistoryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HistoryOutcome::Success => "success",
            HistoryOutcome::Failed => "failed",
            HistoryOutcome::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Host facts captured alongside each history record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemContext {
    pub hostname: String,
    pub distribution: String,
    pub kernel: String,
    pub architecture: String,
}

/// One package in the installed-package manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    pub name: String,
    pub component: String,
    pub version: Option<String>,
}

/// Immutable audit record of one installation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub session_id: SessionId,
    /// Primary package of the run (the core component's first package)
    pub package: String,
    pub target_version: String,
    pub outcome: HistoryOutcome,
    /// Pipeline phase the run ended in ("completed", "preflight", "installing", ...)
    pub phase: String,
    pub duration_ms: u64,
    pub system: SystemContext,
    pub manifest: Vec<PackageEntry>,
    pub failure: Option<String>,
    /// The configuration the run applied, used when merging with the next request
    pub configuration: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only installation history.
///
/// Guarantees:
/// - `record` never mutates past records; a duplicate id is rejected with
///   `StorageError::DuplicateRecord`.
/// - `list` returns records newest first.
#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    /// Append a record.
    async fn record(&self, record: HistoryRecord) -> StorageResult<()>;

    /// Most recent records first, at most `limit` when given.
    async fn list(&self, limit: Option<usize>) -> StorageResult<Vec<HistoryRecord>>;

    /// The most recent record whose outcome is `Success`.
    async fn last_successful(&self) -> StorageResult<Option<HistoryRecord>> {
        let records = self.list(None).await?;
        Ok(records
            .into_iter()
            .find(|r| r.outcome == HistoryOutcome::Success))
    }
}
