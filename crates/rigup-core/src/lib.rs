//! Rigup Core Library
//!
//! The operation orchestration engine: results, operations, sessions with
//! rollback logs, the orchestrator, conflict resolution, progress
//! estimation, configuration merging and backup retention.

pub mod collaborators;
pub mod conflict;
pub mod domain;
pub mod merge;
pub mod metrics;
pub mod obs;
pub mod operation;
pub mod orchestrator;
pub mod progress;
pub mod retention;
pub mod rollback;
pub mod session;
pub mod telemetry;

pub use collaborators::{
    BackupInfo, ConfigDeployer, ConfigFileSpec, DeployResult, OsRelease, PackageManager,
    PackageQuery, ServiceManager, SystemProbe,
};
pub use conflict::{ConflictResolver, PlannedComponent, Resolution, ResolutionAction};
pub use domain::{
    CheckId, Component, ComponentSelection, DebVersion, DiskSpace, GpuSupport, GpuVendor,
    InstallationConfiguration, OperationResult, PackageMetadata, Result, RigupError, ServiceUnit,
    Severity, Status, Subject, ValidationError, LATEST,
};
pub use merge::ConfigurationMerger;
pub use operation::{Operation, OperationKind};
pub use orchestrator::{FailurePolicy, Orchestrator, OrchestratorConfig, RunStop, StepCallback};
pub use progress::{Estimate, ProgressEstimator, ProgressSink, ProgressUpdate};
pub use retention::{apply_retention, BackupStore, CleanupReport, RetentionPolicy};
pub use rollback::{RollbackAction, RollbackError, RollbackExecutor, RollbackIntent};
pub use session::{derive_status, Session};

pub use rigup_state::{SessionId, SessionStatus};

pub use metrics::METRICS;
pub use obs::{
    emit_history_error, emit_operation_finished, emit_pipeline_phase, emit_rollback_applied,
    emit_session_finished, emit_session_started, session_span, SessionSpan,
};
pub use telemetry::{init_tracing, level_for_verbosity};

/// Rigup version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
