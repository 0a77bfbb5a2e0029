//! Rollback commands.
//!
//! A successful installer leaves behind a [`RollbackIntent`]: a plain,
//! serializable description of how to undo it. Intents are stored with the
//! session so a later process can replay them, and executed by a
//! [`RollbackExecutor`] backed by the real collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rigup_state::StoredRollback;
use serde::{Deserialize, Serialize};

use crate::domain::{Result, ServiceUnit, Subject};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RollbackIntent {
    RemovePackages { packages: Vec<String> },
    DisableService { unit: ServiceUnit },
    RestoreBackup { backup_id: String, target: String },
    RemoveFile { path: String },
    /// Several steps registered by one operation, undone last-first
    Batch { steps: Vec<RollbackIntent> },
}

impl RollbackIntent {
    pub fn describe(&self) -> String {
        match self {
            RollbackIntent::RemovePackages { packages } => {
                format!("remove packages {}", packages.join(", "))
            }
            RollbackIntent::DisableService { unit } => format!("disable service {}", unit),
            RollbackIntent::RestoreBackup { backup_id, target } => {
                format!("restore {} from backup {}", target, backup_id)
            }
            RollbackIntent::RemoveFile { path } => format!("remove file {}", path),
            RollbackIntent::Batch { steps } => steps
                .iter()
                .rev()
                .map(|s| s.describe())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }

    /// Leaf steps in execution order. Batches are expanded in reverse.
    pub fn flatten(&self) -> Vec<RollbackIntent> {
        match self {
            RollbackIntent::Batch { steps } => steps.iter().rev().flat_map(|s| s.flatten()).collect(),
            other => vec![other.clone()],
        }
    }
}

/// A compensating action recorded for one successful operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackAction {
    pub subject: Subject,
    pub description: String,
    pub intent: RollbackIntent,
    pub captured_at: DateTime<Utc>,
}

impl RollbackAction {
    pub fn new(subject: Subject, intent: RollbackIntent) -> Self {
        Self {
            subject,
            description: intent.describe(),
            intent,
            captured_at: Utc::now(),
        }
    }

    /// The same action narrowed to `failed` steps, given in execution order.
    pub fn retry_of(&self, mut failed: Vec<RollbackIntent>) -> Self {
        let intent = if failed.len() == 1 {
            failed.remove(0)
        } else {
            // `flatten` replays batches last-first; store them first-last.
            failed.reverse();
            RollbackIntent::Batch { steps: failed }
        };
        Self {
            subject: self.subject,
            description: intent.describe(),
            intent,
            captured_at: self.captured_at,
        }
    }

    pub fn to_stored(&self) -> Result<StoredRollback> {
        Ok(StoredRollback {
            subject: self.subject.tag().to_string(),
            description: self.description.clone(),
            intent: serde_json::to_value(&self.intent)?,
            captured_at: self.captured_at,
        })
    }

    pub fn from_stored(stored: &StoredRollback) -> Result<Self> {
        let subject: Subject = stored.subject.parse()?;
        let intent: RollbackIntent = serde_json::from_value(stored.intent.clone())?;
        Ok(Self {
            subject,
            description: stored.description.clone(),
            intent,
            captured_at: stored.captured_at,
        })
    }
}

/// One rollback step that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rollback of {subject} ({description}) failed: {reason}")]
pub struct RollbackError {
    pub subject: String,
    pub description: String,
    pub reason: String,
}

/// Applies single rollback steps. Never receives a `Batch`.
#[async_trait]
pub trait RollbackExecutor: Send + Sync {
    async fn apply(&self, intent: &RollbackIntent) -> anyhow::Result<()>;
}
