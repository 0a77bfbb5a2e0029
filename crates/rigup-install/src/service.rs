//! Installation sessions behind Start / Execute / Status / List / Cancel /
//! Rollback.
//!
//! Jobs live in an in-process registry while pending or running. Once a
//! finished session is saved to the [`SessionRepository`] it leaves the
//! registry, and status, list and rollback read it back from storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rigup_core::{InstallationConfiguration, ProgressSink, RollbackError, Session, SessionStatus};
use rigup_state::{SessionId, SessionRecord, SessionRepository};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::pipeline::{
    ExecutionStatus, InstallRequest, InstallationPipeline, PipelineOutcome, PipelineState,
    StatusHandle,
};
use crate::rollback::CollaboratorRollback;

pub const SESSION_LABEL: &str = "installation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: String,
    pub component_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub session_id: String,
    pub errors: Vec<String>,
}

impl RollbackReport {
    fn new(session_id: &SessionId, errors: &[RollbackError]) -> Self {
        Self {
            session_id: session_id.to_string(),
            errors: errors.iter().map(|e| e.to_string()).collect(),
        }
    }
}

struct Job {
    session: Arc<Session>,
    request: InstallRequest,
    cancel: CancellationToken,
    status: StatusHandle,
    started: AtomicBool,
}

impl Job {
    fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.status.get().status.is_terminal()
    }
}

type JobRegistry = RwLock<HashMap<String, Arc<Job>>>;

pub struct InstallationService {
    pipeline: Arc<InstallationPipeline>,
    sessions: Arc<dyn SessionRepository>,
    jobs: Arc<JobRegistry>,
}

impl InstallationService {
    pub fn new(pipeline: InstallationPipeline, sessions: Arc<dyn SessionRepository>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            sessions,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn pipeline(&self) -> &InstallationPipeline {
        &self.pipeline
    }

    /// Validate the request and register a pending session.
    pub async fn start(&self, request: InstallRequest) -> Result<StartResponse, ServiceError> {
        let configuration = InstallationConfiguration::new(request.components.clone())?;
        let session = Arc::new(Session::new(SESSION_LABEL));
        let session_id = session.id().to_string();
        let component_count = configuration.components.len();

        let job = Arc::new(Job {
            status: StatusHandle::new(ExecutionStatus::pending(
                &session_id,
                component_count,
                session.started_at(),
            )),
            session,
            request,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        });
        self.jobs.write().await.insert(session_id.clone(), job);
        info!(session_id = %session_id, component_count, "installation registered");

        Ok(StartResponse {
            session_id,
            component_count,
        })
    }

    async fn job(&self, session_id: &str) -> Option<Arc<Job>> {
        self.jobs.read().await.get(session_id).cloned()
    }

    async fn claim(&self, session_id: &str) -> Result<Arc<Job>, ServiceError> {
        let Some(job) = self.job(session_id).await else {
            return match self.sessions.find_by_id(&SessionId::from(session_id)).await {
                Ok(_) => Err(ServiceError::Conflict(format!(
                    "session {} has already finished",
                    session_id
                ))),
                Err(e) => Err(e.into()),
            };
        };
        if job.started.swap(true, Ordering::SeqCst) {
            return Err(ServiceError::Conflict(format!(
                "session {} has already been executed",
                session_id
            )));
        }
        Ok(job)
    }

    /// Start the run in the background and return immediately.
    pub async fn execute(&self, session_id: &str) -> Result<ExecutionStatus, ServiceError> {
        let job = self.claim(session_id).await?;
        job.status.update(|s| {
            s.status = SessionStatus::InProgress;
            s.message = "installation started".to_string();
        });
        let status = job.status.get();

        let pipeline = self.pipeline.clone();
        let sessions = self.sessions.clone();
        let jobs = self.jobs.clone();
        tokio::spawn(async move {
            run_job(&pipeline, sessions.as_ref(), &jobs, &job, &ProgressSink::none()).await;
        });
        Ok(status)
    }

    /// Run to completion on the caller's task, streaming into `progress`.
    pub async fn run(
        &self,
        session_id: &str,
        progress: &ProgressSink,
    ) -> Result<PipelineOutcome, ServiceError> {
        let job = self.claim(session_id).await?;
        Ok(run_job(&self.pipeline, self.sessions.as_ref(), &self.jobs, &job, progress).await)
    }

    pub async fn status(&self, session_id: &str) -> Result<ExecutionStatus, ServiceError> {
        if let Some(job) = self.job(session_id).await {
            return Ok(job.status.get());
        }
        let record = self.sessions.find_by_id(&SessionId::from(session_id)).await?;
        Ok(status_from_record(&record))
    }

    /// Live and stored sessions, newest first.
    pub async fn list(&self) -> Result<Vec<ExecutionStatus>, ServiceError> {
        let mut statuses: Vec<ExecutionStatus> = self
            .jobs
            .read()
            .await
            .values()
            .map(|j| j.status.get())
            .collect();
        for record in self.sessions.find_all().await? {
            if !statuses.iter().any(|s| s.session_id == record.session_id.as_str()) {
                statuses.push(status_from_record(&record));
            }
        }
        statuses.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(statuses)
    }

    /// Cancel a pending or running session.
    ///
    /// A session that never started is cancelled at once. A running one stops
    /// at its next checkpoint; the returned status may still be in progress.
    pub async fn cancel(&self, session_id: &str) -> Result<ExecutionStatus, ServiceError> {
        let Some(job) = self.job(session_id).await else {
            self.sessions.find_by_id(&SessionId::from(session_id)).await?;
            return Err(ServiceError::Conflict(format!(
                "session {} has already finished",
                session_id
            )));
        };

        let current = job.status.get();
        if current.status.is_terminal() {
            return Err(ServiceError::Conflict(format!(
                "session {} is already {}",
                session_id, current.status
            )));
        }

        job.cancel.cancel();
        if job
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            job.session.complete_with(SessionStatus::Cancelled);
            job.status.update(|s| {
                s.status = SessionStatus::Cancelled;
                s.phase = PipelineState::Cancelled;
                s.message = "cancelled before start".to_string();
            });
            if save_snapshot(self.sessions.as_ref(), &job.session).await {
                evict(&self.jobs, session_id).await;
            }
        }
        info!(session_id, "cancellation requested");
        Ok(job.status.get())
    }

    /// Undo a finished session's changes, most recent first.
    pub async fn rollback(&self, session_id: &str) -> Result<RollbackReport, ServiceError> {
        let collab = self.pipeline.collaborators();
        let executor = CollaboratorRollback::new(
            collab.packages.clone(),
            collab.services.clone(),
            collab.deployer.clone(),
        );

        let session = match self.job(session_id).await {
            Some(job) if job.is_running() => {
                return Err(ServiceError::Conflict(format!(
                    "session {} is still running",
                    session_id
                )))
            }
            Some(job) => job.session.clone(),
            None => {
                let record = self.sessions.find_by_id(&SessionId::from(session_id)).await?;
                Arc::new(Session::restore(&record)?)
            }
        };

        let errors = session.rollback(&executor).await;
        if !errors.is_empty() {
            warn!(session_id, failures = errors.len(), "rollback finished with errors");
        }
        save_snapshot(self.sessions.as_ref(), &session).await;
        Ok(RollbackReport::new(session.id(), &errors))
    }

    /// Sessions still pending or running in this process.
    pub async fn live_sessions(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// The session behind `session_id`, live or restored from storage.
    pub async fn session(&self, session_id: &str) -> Result<Arc<Session>, ServiceError> {
        if let Some(job) = self.job(session_id).await {
            return Ok(job.session.clone());
        }
        let record = self.sessions.find_by_id(&SessionId::from(session_id)).await?;
        Ok(Arc::new(Session::restore(&record)?))
    }
}

async fn run_job(
    pipeline: &InstallationPipeline,
    sessions: &dyn SessionRepository,
    jobs: &JobRegistry,
    job: &Job,
    progress: &ProgressSink,
) -> PipelineOutcome {
    let outcome = pipeline
        .run(&job.session, &job.request, &job.cancel, progress, &job.status)
        .await;
    // An unsaved session stays registered so it can still be queried.
    if save_snapshot(sessions, &job.session).await {
        evict(jobs, job.session.id().as_str()).await;
    }
    outcome
}

async fn evict(jobs: &JobRegistry, session_id: &str) {
    if jobs.write().await.remove(session_id).is_some() {
        debug!(session_id, "finished session evicted from registry");
    }
}

/// Returns whether the snapshot reached storage.
async fn save_snapshot(sessions: &dyn SessionRepository, session: &Session) -> bool {
    let record = match session.snapshot() {
        Ok(r) => r,
        Err(e) => {
            warn!(session_id = %session.id(), error = %e, "session snapshot failed");
            return false;
        }
    };
    match sessions.save(record).await {
        Ok(()) => true,
        Err(e) => {
            warn!(session_id = %session.id(), error = %e, "session not saved");
            false
        }
    }
}

fn status_from_record(record: &SessionRecord) -> ExecutionStatus {
    let results: Vec<rigup_core::OperationResult> =
        serde_json::from_value(record.results.clone()).unwrap_or_default();
    let installs: Vec<_> = results
        .iter()
        .filter(|r| r.operation.starts_with("install:"))
        .collect();
    let installed = installs.iter().filter(|r| r.applied()).count();
    let phase = match record.status {
        SessionStatus::Completed | SessionStatus::Warning => PipelineState::Completed,
        SessionStatus::Cancelled => PipelineState::Cancelled,
        SessionStatus::Failed => PipelineState::Failed,
        SessionStatus::Pending | SessionStatus::InProgress => PipelineState::Pending,
    };
    let percent_complete = if phase == PipelineState::Completed { 100 } else { 0 };

    ExecutionStatus {
        session_id: record.session_id.to_string(),
        status: record.status,
        phase,
        percent_complete,
        components_installed: installed,
        components_total: installs.len(),
        message: format!("{} session {}", record.label, record.status),
        eta_secs: None,
        started_at: record.started_at,
    }
}
