//! The `Operation` capability.
//!
//! Every unit of work the engine drives (preflight validator, package
//! installer, setup step, diagnostic checker) implements this one trait.
//! Validators and checkers are read-only; only installers may report a
//! rollback intent.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{OperationResult, Subject};
use crate::rollback::RollbackIntent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Changes the system; may verify and roll back
    Installer,
    /// Read-only precondition check
    Validator,
    /// Read-only post-install diagnostic
    Checker,
}

impl OperationKind {
    pub fn is_read_only(&self) -> bool {
        !matches!(self, OperationKind::Installer)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationKind::Installer => "installer",
            OperationKind::Validator => "validator",
            OperationKind::Checker => "checker",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait Operation: Send + Sync {
    /// Stable name, unique within one run ("install:core", "preflight:disk-space").
    fn name(&self) -> &str;

    fn subject(&self) -> Subject;

    fn kind(&self) -> OperationKind;

    /// Do the work. An `Err` is turned into a `Failed` result by the
    /// orchestrator; it never unwinds past it.
    ///
    /// `cancel` is advisory: long operations may check it, but the
    /// orchestrator never interrupts a call in flight.
    async fn execute(&self, cancel: &CancellationToken) -> anyhow::Result<OperationResult>;

    /// Confirm the change actually took effect. Installers only.
    async fn verify(&self, _cancel: &CancellationToken) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Compensating action for a successful `execute`, captured after it ran.
    fn rollback_intent(&self) -> Option<RollbackIntent> {
        None
    }
}
