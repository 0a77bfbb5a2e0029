//! Rigup-State: persistence layer for rigup
//!
//! This crate owns everything rigup writes to disk or keeps between runs:
//! finished installation sessions (so they can be listed, inspected and rolled
//! back later) and the append-only installation history.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: record shapes, append-only audit history, and backend-agnostic
//! async storage traits.
//!
//! ## Key Components
//!
//! - `SessionRepository`: save/find/list/delete session snapshots
//! - `HistoryRecorder`: append-only audit log of installation runs
//! - `fakes`: in-memory implementations for tests
//! - `FileSessionRepository` / `JsonlHistoryRecorder`: on-disk implementations

mod error;
pub mod fakes;
mod file_history;
mod file_sessions;
pub mod storage_traits;

pub use error::StorageError;
pub use file_history::JsonlHistoryRecorder;
pub use file_sessions::FileSessionRepository;
pub use storage_traits::{
    HistoryOutcome, HistoryRecord, HistoryRecorder, PackageEntry, SessionId, SessionRecord,
    SessionRepository, SessionStatus, StorageResult, StoredRollback, SystemContext,
};
