//! Interfaces to the host the engine drives.
//!
//! Implementations live in `rigup-install` (apt, systemctl, files, host
//! probes) together with in-memory fakes for tests. Every method is async
//! and returns `anyhow::Result`; operations turn errors into results.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rigup_state::SystemContext;
use serde::{Deserialize, Serialize};

use crate::domain::{Component, GpuVendor, ServiceUnit};

/// Read-only package version queries.
#[async_trait]
pub trait PackageQuery: Send + Sync {
    /// Installed version, `None` when the package is absent.
    async fn installed_version(&self, package: &str) -> anyhow::Result<Option<String>>;

    /// Version the archive would install, `None` when unknown.
    async fn candidate_version(&self, package: &str) -> anyhow::Result<Option<String>>;
}

#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn install(&self, packages: &[String]) -> anyhow::Result<()>;

    async fn is_installed(&self, package: &str) -> anyhow::Result<bool>;

    async fn remove(&self, packages: &[String]) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn enable(&self, unit: &ServiceUnit) -> anyhow::Result<()>;
    async fn disable(&self, unit: &ServiceUnit) -> anyhow::Result<()>;
    async fn start(&self, unit: &ServiceUnit) -> anyhow::Result<()>;
    async fn stop(&self, unit: &ServiceUnit) -> anyhow::Result<()>;
    async fn is_enabled(&self, unit: &ServiceUnit) -> anyhow::Result<bool>;
    async fn is_active(&self, unit: &ServiceUnit) -> anyhow::Result<bool>;
}

/// A configuration file a component deploys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFileSpec {
    /// Short name ("sway/config")
    pub name: String,
    pub component: Component,
    /// Template text with `{{var}}` placeholders
    pub template: String,
    /// Absolute destination path
    pub target: PathBuf,
}

/// Outcome of one deploy. A failed backup does not fail the deploy; it is
/// reported in `backup_error` so the caller can downgrade to a warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResult {
    pub success: bool,
    pub target: PathBuf,
    /// Set when a pre-existing file was backed up
    pub backup_id: Option<String>,
    pub backup_path: Option<PathBuf>,
    pub backup_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Backup directory
    pub path: PathBuf,
    /// File the backup was taken from
    pub original: PathBuf,
}

#[async_trait]
pub trait ConfigDeployer: Send + Sync {
    /// Back up any existing target, then write the rendered template.
    async fn deploy_with_backup(
        &self,
        spec: &ConfigFileSpec,
        vars: &HashMap<String, String>,
    ) -> anyhow::Result<DeployResult>;

    /// Put a backed-up file back where it came from.
    async fn restore(&self, backup_id: &str) -> anyhow::Result<PathBuf>;

    async fn list_backups(&self) -> anyhow::Result<Vec<BackupInfo>>;

    async fn remove_backup(&self, backup_id: &str) -> anyhow::Result<()>;

    /// Delete a deployed file that had no original.
    async fn remove_file(&self, path: &std::path::Path) -> anyhow::Result<()>;

    async fn is_deployed(&self, path: &std::path::Path) -> anyhow::Result<bool>;
}

/// `/etc/os-release` fields the preflight checks use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRelease {
    pub id: String,
    pub id_like: Vec<String>,
    pub version_id: Option<String>,
    pub pretty_name: String,
}

impl OsRelease {
    pub fn is_debian_family(&self) -> bool {
        self.id == "debian" || self.id_like.iter().any(|l| l == "debian")
    }
}

/// Read-only host facts.
#[async_trait]
pub trait SystemProbe: Send + Sync {
    async fn os_release(&self) -> anyhow::Result<OsRelease>;
    /// Root, or passwordless sudo available
    async fn is_privileged(&self) -> anyhow::Result<bool>;
    async fn available_disk_bytes(&self) -> anyhow::Result<u64>;
    async fn total_memory_bytes(&self) -> anyhow::Result<u64>;
    async fn can_reach(&self, host: &str, port: u16) -> anyhow::Result<bool>;
    async fn package_lock_held(&self) -> anyhow::Result<bool>;
    /// Name of a desktop session already installed or running
    async fn running_desktop(&self) -> anyhow::Result<Option<String>>;
    async fn gpu_vendor(&self) -> anyhow::Result<Option<GpuVendor>>;
    async fn system_context(&self) -> anyhow::Result<SystemContext>;
}
