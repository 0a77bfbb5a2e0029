//! Session: the aggregate root of one orchestrator run.
//!
//! Results are kept in declaration order, one per operation name (a later
//! result for the same operation replaces the earlier one in place). Rollback
//! actions are append-only. All state sits behind one `RwLock`: the owning
//! run writes, status queries read.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rigup_state::{SessionId, SessionRecord, SessionStatus};

use crate::domain::{OperationResult, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::rollback::{RollbackAction, RollbackError, RollbackExecutor};

#[derive(Debug, Default)]
struct SessionState {
    results: Vec<OperationResult>,
    rollback: Vec<RollbackAction>,
    completed_at: Option<DateTime<Utc>>,
    final_status: Option<SessionStatus>,
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    label: String,
    started_at: DateTime<Utc>,
    state: RwLock<SessionState>,
}

/// Overall status as a pure function of the results.
///
/// Any blocking failure gives `Failed`; otherwise any pending result gives
/// `InProgress`; otherwise any warning gives `Warning`; otherwise
/// `Completed` (an empty list included).
pub fn derive_status(results: &[OperationResult]) -> SessionStatus {
    if results.iter().any(|r| r.is_blocking()) {
        SessionStatus::Failed
    } else if results.iter().any(|r| r.is_pending()) {
        SessionStatus::InProgress
    } else if results.iter().any(|r| r.is_warning()) {
        SessionStatus::Warning
    } else {
        SessionStatus::Completed
    }
}

impl Session {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_id(SessionId::new(), label)
    }

    pub fn with_id(id: SessionId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            started_at: Utc::now(),
            state: RwLock::new(SessionState::default()),
        }
    }

    /// Rebuild a session from its stored snapshot, rollback log included.
    pub fn restore(record: &SessionRecord) -> Result<Self> {
        let results: Vec<OperationResult> = serde_json::from_value(record.results.clone())?;
        let rollback = record
            .rollback
            .iter()
            .map(RollbackAction::from_stored)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: record.session_id.clone(),
            label: record.label.clone(),
            started_at: record.started_at,
            state: RwLock::new(SessionState {
                results,
                rollback,
                completed_at: record.completed_at,
                final_status: record.completed_at.map(|_| record.status),
            }),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    // A panicking writer cannot leave the vectors half-updated, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a result, replacing any earlier result of the same operation.
    pub fn record(&self, result: OperationResult) {
        let mut state = self.write();
        match state
            .results
            .iter_mut()
            .find(|r| r.operation == result.operation)
        {
            Some(slot) => *slot = result,
            None => state.results.push(result),
        }
    }

    pub fn register_rollback(&self, action: RollbackAction) {
        self.write().rollback.push(action);
    }

    pub fn results(&self) -> Vec<OperationResult> {
        self.read().results.clone()
    }

    pub fn result_for(&self, operation: &str) -> Option<OperationResult> {
        self.read()
            .results
            .iter()
            .find(|r| r.operation == operation)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.read().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rollback_actions(&self) -> Vec<RollbackAction> {
        self.read().rollback.clone()
    }

    pub fn can_rollback(&self) -> bool {
        !self.read().rollback.is_empty()
    }

    /// The status stored by `complete`, or else the status derived now.
    pub fn overall_status(&self) -> SessionStatus {
        let state = self.read();
        state
            .final_status
            .unwrap_or_else(|| derive_status(&state.results))
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.read().completed_at
    }

    pub fn is_complete(&self) -> bool {
        self.read().completed_at.is_some()
    }

    /// Finalize with the derived status.
    pub fn complete(&self) -> SessionStatus {
        let mut state = self.write();
        let status = derive_status(&state.results);
        state.final_status = Some(status);
        state.completed_at = Some(Utc::now());
        status
    }

    /// Finalize with an explicit status (`Cancelled`, or `Failed` from a gate).
    pub fn complete_with(&self, status: SessionStatus) {
        let mut state = self.write();
        state.final_status = Some(status);
        state.completed_at = Some(Utc::now());
    }

    /// `completed_at - started_at`, or time elapsed so far.
    pub fn duration_ms(&self) -> u64 {
        let end = self.completed_at().unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }

    /// Undo every registered action, most recent first.
    ///
    /// Failures are collected, not fatal: every action is attempted. Actions
    /// that undo cleanly leave the log; an action with failed steps stays in
    /// it, reduced to those steps, so a later call can retry them.
    pub async fn rollback(&self, executor: &dyn RollbackExecutor) -> Vec<RollbackError> {
        let actions = std::mem::take(&mut self.write().rollback);
        let mut errors = Vec::new();
        let mut retained = Vec::new();

        for action in actions.iter().rev() {
            let mut failed_steps = Vec::new();
            for step in action.intent.flatten() {
                if let Err(e) = executor.apply(&step).await {
                    errors.push(RollbackError {
                        subject: action.subject.tag().to_string(),
                        description: step.describe(),
                        reason: format!("{:#}", e),
                    });
                    failed_steps.push(step);
                }
            }
            let ok = failed_steps.is_empty();
            METRICS.inc_rollbacks();
            obs::emit_rollback_applied(self.id.as_str(), &action.description, ok);
            if !ok {
                retained.push(action.retry_of(failed_steps));
            }
        }

        if !retained.is_empty() {
            // Back to registration order, ahead of anything registered since.
            retained.reverse();
            let mut state = self.write();
            retained.append(&mut state.rollback);
            state.rollback = retained;
        }
        errors
    }

    /// Persistable snapshot.
    pub fn snapshot(&self) -> Result<SessionRecord> {
        let state = self.read();
        let rollback = state
            .rollback
            .iter()
            .map(|a| a.to_stored())
            .collect::<Result<Vec<_>>>()?;
        Ok(SessionRecord {
            session_id: self.id.clone(),
            label: self.label.clone(),
            status: state
                .final_status
                .unwrap_or_else(|| derive_status(&state.results)),
            started_at: self.started_at,
            completed_at: state.completed_at,
            results: serde_json::to_value(&state.results)?,
            rollback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CheckId, Component, Severity, Status};
    use crate::rollback::RollbackIntent;

    fn installer(op: &str, status: Status) -> OperationResult {
        OperationResult::new(op, Component::Core, status, "")
    }

    #[test]
    fn test_derive_status_empty_is_completed() {
        assert_eq!(derive_status(&[]), SessionStatus::Completed);
    }

    #[test]
    fn test_derive_status_precedence() {
        let ok = installer("a", Status::Completed);
        let skipped = installer("b", Status::Skipped);
        let pending = installer("c", Status::InProgress);
        let warn = installer("d", Status::Warning);
        let failed = installer("e", Status::Failed);

        assert_eq!(
            derive_status(&[ok.clone(), skipped.clone()]),
            SessionStatus::Completed
        );
        assert_eq!(
            derive_status(&[ok.clone(), warn.clone()]),
            SessionStatus::Warning
        );
        assert_eq!(
            derive_status(&[warn.clone(), pending.clone()]),
            SessionStatus::InProgress
        );
        assert_eq!(
            derive_status(&[pending, warn, failed]),
            SessionStatus::Failed
        );
    }

    #[test]
    fn test_non_critical_check_failure_is_warning() {
        let r = OperationResult::check(
            "preflight:memory",
            CheckId::Memory,
            Status::Fail,
            Severity::Medium,
            "1024MB available",
        );
        assert_eq!(derive_status(&[r]), SessionStatus::Warning);
    }

    #[test]
    fn test_record_last_write_wins_in_place() {
        let s = Session::new("test");
        s.record(installer("a", Status::InProgress));
        s.record(installer("b", Status::Completed));
        s.record(installer("a", Status::Completed));
        let results = s.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].operation, "a");
        assert_eq!(results[0].status, Status::Completed);
    }

    #[test]
    fn test_complete_freezes_status() {
        let s = Session::new("test");
        s.record(installer("a", Status::Completed));
        assert!(!s.is_complete());
        assert_eq!(s.complete(), SessionStatus::Completed);
        assert!(s.is_complete());

        s.complete_with(SessionStatus::Cancelled);
        assert_eq!(s.overall_status(), SessionStatus::Cancelled);
    }

    #[test]
    fn test_snapshot_restore_keeps_rollback_log() {
        let s = Session::new("installation");
        s.record(installer("install:core", Status::Completed));
        s.register_rollback(RollbackAction::new(
            Component::Core.into(),
            RollbackIntent::RemovePackages {
                packages: vec!["sway".to_string()],
            },
        ));
        s.complete();

        let record = s.snapshot().unwrap();
        assert_eq!(record.status, SessionStatus::Completed);
        assert_eq!(record.rollback.len(), 1);

        let back = Session::restore(&record).unwrap();
        assert_eq!(back.id(), s.id());
        assert_eq!(back.results(), s.results());
        assert_eq!(back.rollback_actions(), s.rollback_actions());
        assert_eq!(back.overall_status(), SessionStatus::Completed);
    }
}
