//! Drives an ordered list of operations through a session.
//!
//! Operations run strictly in the order given. An `Err` from an operation is
//! converted to a `Failed` result; it never propagates out. Under the default
//! fail-fast policy the first blocking result stops the run and later
//! operations never appear in the session.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::domain::{OperationResult, Status};
use crate::metrics::METRICS;
use crate::obs;
use crate::operation::{Operation, OperationKind};
use crate::rollback::RollbackAction;
use crate::session::Session;
use rigup_state::SessionStatus;

/// What happens after a blocking result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first blocking result
    #[default]
    FailFast,
    /// Attempt every operation and report all outcomes
    ContinueOnFailure,
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub policy: FailurePolicy,
    /// Run `verify` after a successful installer and fail it on `false`
    pub verify_installers: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            policy: FailurePolicy::FailFast,
            verify_installers: true,
        }
    }
}

/// Per-step callback: operation name and its result.
pub type StepCallback<'a> = &'a (dyn Fn(&str, &OperationResult) + Send + Sync);

/// Why `execute_into` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// Every operation ran (some may have failed under `ContinueOnFailure`)
    Exhausted,
    /// Fail-fast stop at the named operation
    FailedAt(String),
    /// The token was cancelled before the next operation started
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    /// Fail-fast orchestrator, installers verified.
    pub fn fail_fast() -> Self {
        Self::default()
    }

    pub fn continue_on_failure() -> Self {
        Self::new(OrchestratorConfig {
            policy: FailurePolicy::ContinueOnFailure,
            ..OrchestratorConfig::default()
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn run(
        &self,
        label: &str,
        operations: &[Arc<dyn Operation>],
        cancel: &CancellationToken,
    ) -> Session {
        self.run_with_progress(label, operations, cancel, None).await
    }

    /// Run in a new session, finalize it, and return it.
    pub async fn run_with_progress(
        &self,
        label: &str,
        operations: &[Arc<dyn Operation>],
        cancel: &CancellationToken,
        on_step: Option<StepCallback<'_>>,
    ) -> Session {
        let session = Session::new(label);
        METRICS.inc_sessions();
        obs::emit_session_started(session.id().as_str(), label, operations.len());

        let span = obs::session_span(session.id().as_str());
        let stop = self
            .execute_into(&session, operations, cancel, on_step)
            .instrument(span)
            .await;

        match stop {
            RunStop::Cancelled => session.complete_with(SessionStatus::Cancelled),
            RunStop::Exhausted | RunStop::FailedAt(_) => {
                session.complete();
            }
        }
        obs::emit_session_finished(
            session.id().as_str(),
            session.overall_status().as_str(),
            session.len(),
            session.duration_ms(),
        );
        session
    }

    /// Execute operations into an existing session without finalizing it.
    ///
    /// The pipeline uses this to fold several phases into one session.
    pub async fn execute_into(
        &self,
        session: &Session,
        operations: &[Arc<dyn Operation>],
        cancel: &CancellationToken,
        on_step: Option<StepCallback<'_>>,
    ) -> RunStop {
        for op in operations {
            if cancel.is_cancelled() {
                debug!(operation = op.name(), "cancelled before start");
                return RunStop::Cancelled;
            }

            let result = self.execute_one(op.as_ref(), cancel).await;
            METRICS.inc_operations();
            if result.is_blocking() {
                METRICS.inc_failures();
            }
            obs::emit_operation_finished(
                session.id().as_str(),
                op.name(),
                result.status.as_str(),
                result.duration_ms(),
            );

            if let Some(cb) = on_step {
                cb(op.name(), &result);
            }

            let blocking = result.is_blocking();
            if op.kind() == OperationKind::Installer && result.applied() {
                if let Some(intent) = op.rollback_intent() {
                    session.register_rollback(RollbackAction::new(result.subject, intent));
                }
            }
            session.record(result);

            if blocking && self.config.policy == FailurePolicy::FailFast {
                return RunStop::FailedAt(op.name().to_string());
            }
        }
        RunStop::Exhausted
    }

    async fn execute_one(&self, op: &dyn Operation, cancel: &CancellationToken) -> OperationResult {
        let started = chrono::Utc::now();
        let result = match op.execute(cancel).await {
            Ok(r) => r.started_at(started),
            Err(e) => {
                warn!(operation = op.name(), error = %e, "operation failed");
                OperationResult::failed(op.name(), op.subject(), &e).started_at(started)
            }
        };

        let result = if self.config.verify_installers
            && op.kind() == OperationKind::Installer
            && result.status == Status::Completed
        {
            match op.verify(cancel).await {
                Ok(true) => result,
                Ok(false) => result
                    .with_status(Status::Failed)
                    .with_error("verification failed")
                    .with_message(format!("{} did not verify", op.name())),
                Err(e) => result
                    .with_status(Status::Failed)
                    .with_error(format!("verification error: {:#}", e)),
            }
        } else {
            result
        };

        let mut result = result.finished();
        // Results are keyed by the operation that produced them.
        if result.operation != op.name() {
            result.operation = op.name().to_string();
        }
        result
    }
}
