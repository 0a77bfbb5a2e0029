//! The installation pipeline state machine.
//!
//! ```text
//! Pending -> Planning -> PreflightGate -> Resolving -> Installing
//!         -> ConfiguringDeploying -> RecordingHistory -> Completed
//! ```
//!
//! `Failed` is reachable from every non-terminal state, `Cancelled` only
//! from `Installing` and `ConfiguringDeploying`. A history record is written
//! for every run that gets past `Pending`, whatever its outcome, before the
//! terminal state is entered.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rigup_core::{
    emit_history_error, emit_pipeline_phase, emit_session_finished, emit_session_started,
    session_span, Component, ComponentSelection, ConfigDeployer, ConfigurationMerger,
    ConflictResolver, DiskSpace, FailurePolicy, GpuSupport, GpuVendor,
    InstallationConfiguration, OperationResult, Orchestrator, OrchestratorConfig,
    PackageManager, PackageMetadata, PackageQuery, PlannedComponent, ProgressEstimator,
    ProgressSink, ProgressUpdate, RigupError, RunStop, ServiceManager, Session, SessionStatus,
    Status, StepCallback, SystemProbe, ValidationError, LATEST, METRICS,
};
use rigup_state::{HistoryOutcome, HistoryRecord, HistoryRecorder, JsonlHistoryRecorder, PackageEntry};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::adapters::{AptPackageManager, FileConfigDeployer, HostProbe, SystemdServiceManager};
use crate::command::CommandRunner;
use crate::config::RigupConfig;
use crate::operations::{self, PreflightContext, SetupContext};

/// Relative weight of each phase in the progress estimate.
pub const PHASE_WEIGHTS: &[(&str, u32)] = &[
    ("planning", 5),
    ("preflight", 10),
    ("resolving", 5),
    ("installing", 50),
    ("configuring", 20),
    ("recording", 10),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "planning")]
    Planning,
    #[serde(rename = "preflight")]
    PreflightGate,
    #[serde(rename = "resolving")]
    Resolving,
    #[serde(rename = "installing")]
    Installing,
    #[serde(rename = "configuring")]
    ConfiguringDeploying,
    #[serde(rename = "recording")]
    RecordingHistory,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl PipelineState {
    /// Phase name used in progress updates and history records.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Pending => "pending",
            PipelineState::Planning => "planning",
            PipelineState::PreflightGate => "preflight",
            PipelineState::Resolving => "resolving",
            PipelineState::Installing => "installing",
            PipelineState::ConfiguringDeploying => "configuring",
            PipelineState::RecordingHistory => "recording",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
            PipelineState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed | PipelineState::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (*self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed) => true,
            (Installing | ConfiguringDeploying, Cancelled) => true,
            (Pending, Planning)
            | (Planning, PreflightGate)
            | (PreflightGate, Resolving)
            | (Resolving, Installing)
            | (Installing, ConfiguringDeploying)
            | (ConfiguringDeploying, RecordingHistory)
            | (RecordingHistory, Completed) => true,
            _ => false,
        }
    }

    pub fn transition(self, next: PipelineState) -> Result<PipelineState, RigupError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(RigupError::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller asked to install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    pub components: Vec<ComponentSelection>,
    #[serde(default)]
    pub gpu: Option<GpuVendor>,
    #[serde(default)]
    pub merge_existing: Option<bool>,
}

impl InstallRequest {
    /// Latest version of each component.
    pub fn latest(components: &[Component]) -> Self {
        Self {
            components: components.iter().map(|c| ComponentSelection::latest(*c)).collect(),
            gpu: None,
            merge_existing: None,
        }
    }

    pub fn with_gpu(mut self, vendor: GpuVendor) -> Self {
        self.gpu = Some(vendor);
        self
    }

    pub fn with_merge_existing(mut self, merge: bool) -> Self {
        self.merge_existing = Some(merge);
        self
    }
}

/// Externally visible progress of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub session_id: String,
    pub status: SessionStatus,
    pub phase: PipelineState,
    pub percent_complete: u8,
    /// Components installed or upgraded by this run; skipped ones are not counted
    pub components_installed: usize,
    pub components_total: usize,
    pub message: String,
    pub eta_secs: Option<u64>,
    pub started_at: DateTime<Utc>,
}

impl ExecutionStatus {
    pub fn pending(session_id: &str, components_total: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            status: SessionStatus::Pending,
            phase: PipelineState::Pending,
            percent_complete: 0,
            components_installed: 0,
            components_total,
            message: "waiting to start".to_string(),
            eta_secs: None,
            started_at,
        }
    }
}

/// Shared, concurrently readable execution status.
#[derive(Debug, Clone)]
pub struct StatusHandle(Arc<RwLock<ExecutionStatus>>);

impl StatusHandle {
    pub fn new(status: ExecutionStatus) -> Self {
        Self(Arc::new(RwLock::new(status)))
    }

    pub fn get(&self) -> ExecutionStatus {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut ExecutionStatus)) {
        f(&mut self.0.write().unwrap_or_else(|e| e.into_inner()));
    }
}

/// The host the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub packages: Arc<dyn PackageManager>,
    pub query: Arc<dyn PackageQuery>,
    pub services: Arc<dyn ServiceManager>,
    pub deployer: Arc<dyn ConfigDeployer>,
    pub probe: Arc<dyn SystemProbe>,
    pub history: Arc<dyn HistoryRecorder>,
}

impl Collaborators {
    /// apt, systemctl and filesystem adapters plus the JSON-lines history.
    pub fn host(config: &RigupConfig) -> Self {
        let runner = CommandRunner::new(config.apt.command_timeout_secs, config.apt.dry_run);
        let apt = Arc::new(AptPackageManager::new(runner.clone(), config.apt.assume_yes));
        Self {
            packages: apt.clone(),
            query: apt,
            services: Arc::new(SystemdServiceManager::new(runner.clone())),
            deployer: Arc::new(FileConfigDeployer::new(config.backups_dir())),
            probe: Arc::new(HostProbe::new(runner)),
            history: Arc::new(JsonlHistoryRecorder::new(config.history_path())),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub state: PipelineState,
    pub message: String,
    pub plan: Vec<PlannedComponent>,
    pub history_id: Option<String>,
    pub configuration: Option<InstallationConfiguration>,
}

impl PipelineOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Completed
    }
}

pub struct InstallationPipeline {
    collab: Collaborators,
    config: Arc<RigupConfig>,
}

impl InstallationPipeline {
    pub fn new(collab: Collaborators, config: Arc<RigupConfig>) -> Self {
        Self { collab, config }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    pub fn config(&self) -> &RigupConfig {
        &self.config
    }

    /// Run every phase into `session`, then finalize it.
    pub async fn run(
        &self,
        session: &Session,
        request: &InstallRequest,
        cancel: &CancellationToken,
        progress: &ProgressSink,
        status: &StatusHandle,
    ) -> PipelineOutcome {
        let span = session_span(session.id().as_str());
        let mut run = Run {
            pipeline: self,
            session,
            cancel,
            progress,
            status,
            state: PipelineState::Pending,
            estimator: ProgressEstimator::new(PHASE_WEIGHTS),
            started: Instant::now(),
            plan: Vec::new(),
            configuration: None,
        };
        METRICS.inc_sessions();
        emit_session_started(session.id().as_str(), session.label(), request.components.len());

        let outcome = run.execute(request).instrument(span).await;

        match outcome.state {
            PipelineState::Completed => {
                session.complete();
            }
            PipelineState::Cancelled => session.complete_with(SessionStatus::Cancelled),
            _ => session.complete_with(SessionStatus::Failed),
        }
        let final_status = session.overall_status();
        status.update(|s| s.status = final_status);
        emit_session_finished(
            session.id().as_str(),
            final_status.as_str(),
            session.len(),
            session.duration_ms(),
        );
        outcome
    }
}

/// Mutable state of one pipeline run.
struct Run<'a> {
    pipeline: &'a InstallationPipeline,
    session: &'a Session,
    cancel: &'a CancellationToken,
    progress: &'a ProgressSink,
    status: &'a StatusHandle,
    state: PipelineState,
    estimator: ProgressEstimator,
    started: Instant,
    plan: Vec<PlannedComponent>,
    configuration: Option<InstallationConfiguration>,
}

/// Early exit from a phase: the state it ended in and why.
enum Halt {
    Failed(String),
    Cancelled,
}

impl<'a> Run<'a> {
    async fn execute(&mut self, request: &InstallRequest) -> PipelineOutcome {
        match self.phases(request).await {
            Ok(()) => self.finish_completed().await,
            Err(Halt::Failed(message)) => self.finish(PipelineState::Failed, message).await,
            Err(Halt::Cancelled) => {
                self.finish(PipelineState::Cancelled, "installation cancelled".to_string())
                    .await
            }
        }
    }

    async fn phases(&mut self, request: &InstallRequest) -> Result<(), Halt> {
        self.enter(PipelineState::Planning)?;
        let configuration = self.plan_configuration(request).await?;
        self.configuration = Some(configuration.clone());
        self.phase_done("planning", format!("{} components planned", configuration.components.len()));

        self.enter(PipelineState::PreflightGate)?;
        self.preflight().await?;
        self.phase_done("preflight", "preflight checks passed".to_string());

        self.enter(PipelineState::Resolving)?;
        self.plan = ConflictResolver::new()
            .plan(&configuration, self.pipeline.collab.query.as_ref())
            .await
            .map_err(|e| Halt::Failed(format!("conflict resolution failed: {:#}", e)))?;
        let skipped = self.plan.iter().filter(|p| p.is_skipped()).count();
        self.status.update(|s| s.components_total = self.plan.len());
        self.phase_done(
            "resolving",
            format!("{} to install, {} skipped", self.plan.len() - skipped, skipped),
        );

        self.enter(PipelineState::Installing)?;
        self.install().await?;
        self.phase_done("installing", "packages installed".to_string());

        if self.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        self.enter(PipelineState::ConfiguringDeploying)?;
        self.configure().await?;
        self.phase_done("configuring", "configuration deployed".to_string());
        Ok(())
    }

    fn enter(&mut self, next: PipelineState) -> Result<(), Halt> {
        self.state = self
            .state
            .transition(next)
            .map_err(|e| Halt::Failed(e.to_string()))?;
        let percent = self.estimator.current().percent;
        emit_pipeline_phase(self.session.id().as_str(), next.as_str(), percent);
        self.status.update(|s| {
            s.phase = next;
            s.status = SessionStatus::InProgress;
        });
        Ok(())
    }

    fn phase_done(&mut self, phase: &str, message: String) {
        let est = self.estimator.complete_phase(phase);
        let eta_secs = est.remaining.map(|d| d.as_secs());
        self.status.update(|s| {
            s.percent_complete = est.percent;
            s.eta_secs = eta_secs;
            s.message = message.clone();
        });
        self.progress.send(ProgressUpdate {
            session_id: self.session.id().to_string(),
            phase: phase.to_string(),
            percent: est.percent,
            message,
            eta_secs,
        });
    }

    async fn plan_configuration(
        &self,
        request: &InstallRequest,
    ) -> Result<InstallationConfiguration, Halt> {
        let invalid = |e: ValidationError| Halt::Failed(format!("invalid request: {}", e));
        let collab = &self.pipeline.collab;
        let mut configuration =
            InstallationConfiguration::new(request.components.clone()).map_err(invalid)?;

        let gpu = operations::preflight::detect_gpu(request.gpu, collab.probe.as_ref()).await;
        if let Some(vendor) = gpu {
            let support = GpuSupport::for_vendor(vendor);
            if support.proprietary_driver_required && !configuration.contains(Component::GpuDriver) {
                let mut selection = ComponentSelection::latest(Component::GpuDriver);
                if let Some(packages) = vendor.driver_packages() {
                    selection = selection.with_package(PackageMetadata {
                        packages: packages.iter().map(|p| p.to_string()).collect(),
                        description: format!("{} driver", vendor),
                    });
                }
                info!(%vendor, "proprietary GPU driver added to plan");
                configuration.upsert(selection);
            }
            configuration = configuration.with_gpu(support);
        }

        let available = match collab.probe.available_disk_bytes().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "could not measure disk space");
                0
            }
        };
        configuration = configuration.with_disk(DiskSpace {
            required_bytes: self.pipeline.config.required_disk_bytes(),
            available_bytes: available,
        });
        if let Some(merge) = request.merge_existing {
            configuration = configuration.with_merge_existing(merge);
        }

        if configuration.should_merge() {
            match collab.history.last_successful().await {
                Ok(Some(previous)) => {
                    match serde_json::from_value::<InstallationConfiguration>(previous.configuration) {
                        Ok(existing) => {
                            configuration = ConfigurationMerger::new()
                                .merge(&existing, &configuration)
                                .map_err(invalid)?;
                            debug!(components = configuration.components.len(), "merged with previous installation");
                        }
                        Err(e) => warn!(error = %e, "previous configuration unreadable, not merging"),
                    }
                }
                Ok(None) => debug!("no previous successful installation to merge"),
                Err(e) => warn!(error = %e, "history unavailable, not merging"),
            }
        }
        Ok(configuration)
    }

    async fn preflight(&self) -> Result<(), Halt> {
        let ops = operations::validators(
            self.pipeline.collab.probe.clone(),
            PreflightContext::from_config(&self.pipeline.config),
        );
        // Read-only checks always run to completion
        let never = CancellationToken::new();
        Orchestrator::continue_on_failure()
            .execute_into(self.session, &ops, &never, None)
            .await;

        let blocking: Vec<String> = self
            .session
            .results()
            .into_iter()
            .filter(|r| r.operation.starts_with("preflight:") && r.is_blocking())
            .map(|r| r.message)
            .collect();
        if blocking.is_empty() {
            Ok(())
        } else {
            Err(Halt::Failed(format!("preflight failed: {}", blocking.join("; "))))
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(OrchestratorConfig {
            policy: FailurePolicy::FailFast,
            verify_installers: !self.pipeline.config.apt.dry_run,
        })
    }

    /// Per-step hook: count finished components and forward a progress update.
    fn step_hook(&self) -> impl Fn(&str, &OperationResult) + Send + Sync + '_ {
        move |name: &str, result: &OperationResult| {
            let counts = result.applied();
            let mut snapshot = None;
            self.status.update(|s| {
                if counts && name.starts_with("install:") {
                    s.components_installed += 1;
                }
                s.message = result.message.clone();
                snapshot = Some((s.percent_complete, s.eta_secs));
            });
            let (percent, eta_secs) = snapshot.unwrap_or_default();
            self.progress.send(ProgressUpdate {
                session_id: self.session.id().to_string(),
                phase: self.state.as_str().to_string(),
                percent,
                message: result.message.clone(),
                eta_secs,
            });
        }
    }

    async fn install(&self) -> Result<(), Halt> {
        let ops = operations::package_installers(&self.plan, self.pipeline.collab.packages.clone());
        let hook = self.step_hook();
        let on_step: StepCallback<'_> = &hook;
        match self
            .orchestrator()
            .execute_into(self.session, &ops, self.cancel, Some(on_step))
            .await
        {
            RunStop::Exhausted => Ok(()),
            RunStop::Cancelled => Err(Halt::Cancelled),
            RunStop::FailedAt(op) => Err(Halt::Failed(self.failure_message(&op))),
        }
    }

    async fn configure(&self) -> Result<(), Halt> {
        let components: Vec<Component> = self
            .plan
            .iter()
            .filter(|p| !p.is_skipped())
            .map(|p| p.selection.component)
            .collect();
        let ctx = SetupContext::from_config(
            &self.pipeline.config,
            self.pipeline.collab.deployer.clone(),
            self.pipeline.collab.services.clone(),
        );
        let ops = operations::setup_operations(&components, &ctx);
        let hook = self.step_hook();
        let on_step: StepCallback<'_> = &hook;
        match self
            .orchestrator()
            .execute_into(self.session, &ops, self.cancel, Some(on_step))
            .await
        {
            RunStop::Exhausted => Ok(()),
            RunStop::Cancelled => Err(Halt::Cancelled),
            RunStop::FailedAt(op) => Err(Halt::Failed(self.failure_message(&op))),
        }
    }

    fn failure_message(&self, operation: &str) -> String {
        match self.session.result_for(operation) {
            Some(r) => match r.error {
                Some(err) => format!("{}: {}", r.message, err),
                None => r.message,
            },
            None => format!("{} failed", operation),
        }
    }

    async fn finish_completed(&mut self) -> PipelineOutcome {
        if let Err(Halt::Failed(message)) = self.enter(PipelineState::RecordingHistory) {
            return self.finish(PipelineState::Failed, message).await;
        }
        let history_id = self
            .record_history(HistoryOutcome::Success, "completed", None)
            .await;
        self.phase_done("recording", "history recorded".to_string());

        let message = format!(
            "installation completed: {} components",
            self.plan.len()
        );
        self.state = PipelineState::Completed;
        let est = self.estimator.finish();
        emit_pipeline_phase(self.session.id().as_str(), "completed", est.percent);
        self.status.update(|s| {
            s.phase = PipelineState::Completed;
            s.percent_complete = est.percent;
            s.eta_secs = Some(0);
            s.message = message.clone();
        });
        self.progress.send(ProgressUpdate {
            session_id: self.session.id().to_string(),
            phase: "completed".to_string(),
            percent: est.percent,
            message: message.clone(),
            eta_secs: Some(0),
        });
        info!(session_id = %self.session.id(), "installation completed");
        self.outcome(message, history_id)
    }

    /// Record history for a failed or cancelled run, then enter `terminal`.
    async fn finish(&mut self, terminal: PipelineState, message: String) -> PipelineOutcome {
        let phase = self.state.as_str();
        let outcome = match terminal {
            PipelineState::Cancelled => HistoryOutcome::Cancelled,
            _ => HistoryOutcome::Failed,
        };
        let history_id = match self.state {
            PipelineState::Pending => None,
            _ => self.record_history(outcome, phase, Some(message.clone())).await,
        };

        match self.state.transition(terminal) {
            Ok(next) => self.state = next,
            Err(e) => {
                warn!(error = %e, "forcing terminal state");
                self.state = PipelineState::Failed;
            }
        }
        let state = self.state;
        let percent = self.estimator.current().percent;
        emit_pipeline_phase(self.session.id().as_str(), state.as_str(), percent);
        warn!(session_id = %self.session.id(), phase, %message, "installation {}", state);
        self.status.update(|s| {
            s.phase = state;
            s.eta_secs = None;
            s.message = message.clone();
        });
        self.progress.send(ProgressUpdate {
            session_id: self.session.id().to_string(),
            phase: state.as_str().to_string(),
            percent,
            message: message.clone(),
            eta_secs: None,
        });
        self.outcome(message, history_id)
    }

    fn outcome(&self, message: String, history_id: Option<String>) -> PipelineOutcome {
        PipelineOutcome {
            state: self.state,
            message,
            plan: self.plan.clone(),
            history_id,
            configuration: self.configuration.clone(),
        }
    }

    /// Packages of every component whose installer applied a change or found
    /// it already present.
    fn manifest(&self) -> Vec<PackageEntry> {
        let results = self.session.results();
        self.plan
            .iter()
            .filter(|p| {
                let name = format!("install:{}", p.selection.component.tag());
                results
                    .iter()
                    .any(|r| r.operation == name && (r.applied() || r.status == Status::Skipped))
            })
            .flat_map(|p| {
                let version = p.target_version.clone().or_else(|| p.installed_version.clone());
                p.selection.packages().into_iter().map(move |name| PackageEntry {
                    name,
                    component: p.selection.component.tag().to_string(),
                    version: version.clone(),
                })
            })
            .collect()
    }

    async fn record_history(
        &self,
        outcome: HistoryOutcome,
        phase: &str,
        failure: Option<String>,
    ) -> Option<String> {
        let collab = &self.pipeline.collab;
        let core = self
            .configuration
            .as_ref()
            .and_then(|c| c.selection(Component::Core).cloned())
            .unwrap_or_else(|| ComponentSelection::latest(Component::Core));
        let target_version = self
            .plan
            .iter()
            .find(|p| p.selection.component == Component::Core)
            .and_then(|p| p.target_version.clone())
            .unwrap_or_else(|| {
                if core.version.is_empty() {
                    LATEST.to_string()
                } else {
                    core.version.clone()
                }
            });
        let system = match collab.probe.system_context().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "system context unavailable");
                Default::default()
            }
        };
        let configuration = self
            .configuration
            .as_ref()
            .and_then(|c| serde_json::to_value(c).ok())
            .unwrap_or(serde_json::Value::Null);

        let record = HistoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: self.session.id().clone(),
            package: core.packages().into_iter().next().unwrap_or_default(),
            target_version,
            outcome,
            phase: phase.to_string(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            system,
            manifest: self.manifest(),
            failure,
            configuration,
            recorded_at: Utc::now(),
        };
        let id = record.id.clone();
        match collab.history.record(record).await {
            Ok(()) => {
                debug!(history_id = %id, %outcome, phase, "history recorded");
                Some(id)
            }
            Err(e) => {
                emit_history_error(self.session.id().as_str(), &e);
                None
            }
        }
    }
}
