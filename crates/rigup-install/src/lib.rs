//! Rigup Install
//!
//! Everything that touches a Debian host: the installation pipeline state
//! machine, concrete operations (preflight validators, package installers,
//! setup steps, doctor checkers), the apt / systemctl / filesystem adapters
//! behind the collaborator traits, and the session service the CLI and the
//! daemon both drive.
//!
//! ## Key Components
//!
//! - `InstallationPipeline`: Planning -> Preflight -> Resolving -> Installing
//!   -> Configuring -> Recording, with history written for every outcome
//! - `InstallationService`: Start / Execute / Status / List / Cancel / Rollback
//! - `adapters`: host implementations of the collaborator traits
//! - `fakes`: in-memory collaborators for tests

pub mod adapters;
pub mod command;
pub mod config;
pub mod error;
pub mod fakes;
pub mod operations;
pub mod pipeline;
pub mod rollback;
pub mod service;
pub mod templates;

pub use adapters::{AptPackageManager, FileConfigDeployer, HostProbe, SystemdServiceManager};
pub use command::{CommandOutput, CommandRunner};
pub use config::{ConfigError, RigupConfig};
pub use error::ServiceError;
pub use pipeline::{
    Collaborators, ExecutionStatus, InstallRequest, InstallationPipeline, PipelineOutcome,
    PipelineState, StatusHandle, PHASE_WEIGHTS,
};
pub use rollback::CollaboratorRollback;
pub use service::{InstallationService, RollbackReport, StartResponse};
