//! Backup retention.
//!
//! Backups older than `max_age_days` are removed, except that the newest
//! `keep_minimum` backups always survive whatever their age.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::collaborators::BackupInfo;
use crate::domain::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
    pub keep_minimum: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_days: 30,
            keep_minimum: 2,
        }
    }
}

impl RetentionPolicy {
    /// Validate user-supplied values; negatives are rejected.
    pub fn new(max_age_days: i64, keep_minimum: i64) -> Result<Self, ValidationError> {
        if max_age_days < 0 {
            return Err(ValidationError::Negative {
                field: "retention_days".to_string(),
                value: max_age_days,
            });
        }
        if keep_minimum < 0 {
            return Err(ValidationError::Negative {
                field: "keep_minimum".to_string(),
                value: keep_minimum,
            });
        }
        Ok(Self {
            max_age_days: u32::try_from(max_age_days).unwrap_or(u32::MAX),
            keep_minimum: usize::try_from(keep_minimum).unwrap_or(usize::MAX),
        })
    }

    /// Backups to delete as of `now`, oldest first.
    ///
    /// A cutoff before the representable time range expires nothing.
    pub fn select_expired(&self, backups: &[BackupInfo], now: DateTime<Utc>) -> Vec<BackupInfo> {
        let Some(cutoff) = Duration::try_days(i64::from(self.max_age_days))
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return Vec::new();
        };

        let mut newest_first: Vec<&BackupInfo> = backups.iter().collect();
        newest_first.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut expired: Vec<BackupInfo> = newest_first
            .into_iter()
            .skip(self.keep_minimum)
            .filter(|b| b.created_at < cutoff)
            .cloned()
            .collect();
        expired.reverse();
        expired
    }
}

/// Result of a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub kept: usize,
    /// `(backup id, error)` for every removal that failed
    pub errors: Vec<(String, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Storage that can list and delete backups.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<BackupInfo>>;
    async fn remove(&self, id: &str) -> anyhow::Result<()>;
}

/// Apply `policy`, continuing past individual removal failures.
pub async fn apply_retention(
    store: &dyn BackupStore,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> anyhow::Result<CleanupReport> {
    let backups = store.list().await?;
    let expired = policy.select_expired(&backups, now);
    let mut report = CleanupReport::default();

    for backup in &expired {
        match store.remove(&backup.id).await {
            Ok(()) => report.removed.push(backup.id.clone()),
            Err(e) => {
                warn!(backup = %backup.id, error = %e, "failed to remove backup");
                report.errors.push((backup.id.clone(), format!("{:#}", e)));
            }
        }
    }
    report.kept = backups.len() - report.removed.len();
    info!(
        removed = report.removed.len(),
        kept = report.kept,
        errors = report.errors.len(),
        "backup cleanup finished"
    );
    Ok(report)
}
