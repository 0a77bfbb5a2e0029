//! Structured lifecycle events.
//!
//! - `SessionSpan` RAII guard and [`session_span`] for async code
//! - emit functions for session, operation, pipeline and rollback events
//!
//! Events are `info!` unless noted; filter with `RUST_LOG`.

use tracing::info;

/// Enters a session-scoped span for the life of the guard.
///
/// The guard is not `Send`; inside spawned tasks use
/// [`session_span`] with `tracing::Instrument` instead.
pub struct SessionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SessionSpan {
    pub fn enter(session_id: &str) -> Self {
        Self {
            _span: session_span(session_id).entered(),
        }
    }
}

/// Span tagged with `session_id`.
pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("rigup.session", session_id = %session_id)
}

pub fn emit_session_started(session_id: &str, label: &str, operations: usize) {
    info!(
        event = "session.started",
        session_id = %session_id,
        label = %label,
        operations = operations,
    );
}

pub fn emit_operation_finished(session_id: &str, operation: &str, status: &str, duration_ms: u64) {
    info!(
        event = "operation.finished",
        session_id = %session_id,
        operation = %operation,
        status = %status,
        duration_ms = duration_ms,
    );
}

pub fn emit_session_finished(session_id: &str, status: &str, results: usize, duration_ms: u64) {
    info!(
        event = "session.finished",
        session_id = %session_id,
        status = %status,
        results = results,
        duration_ms = duration_ms,
    );
}

/// Pipeline moved into a new phase.
pub fn emit_pipeline_phase(session_id: &str, phase: &str, percent: u8) {
    info!(event = "pipeline.phase", session_id = %session_id, phase = %phase, percent = percent);
}

pub fn emit_rollback_applied(session_id: &str, description: &str, ok: bool) {
    info!(
        event = "rollback.applied",
        session_id = %session_id,
        description = %description,
        ok = ok,
    );
}

/// History could not be written (warning level). The run outcome stands.
pub fn emit_history_error(session_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "history.error", session_id = %session_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_span_enters() {
        let _span = SessionSpan::enter("test-session");
        emit_pipeline_phase("test-session", "planning", 5);
    }
}
