//! In-memory collaborators for tests and dry runs of the pipeline.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rigup_core::{
    BackupInfo, BackupStore, ConfigDeployer, ConfigFileSpec, DeployResult, GpuVendor, OsRelease,
    PackageManager, PackageQuery, ServiceManager, ServiceUnit, SystemProbe,
};
use rigup_state::SystemContext;

/// Version reported for packages installed without a known candidate.
pub const FAKE_VERSION: &str = "1.0-1";

#[derive(Debug, Default)]
pub struct FakePackageManager {
    installed: Mutex<HashMap<String, String>>,
    candidates: Mutex<HashMap<String, String>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakePackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_installed(self, package: &str, version: &str) -> Self {
        self.installed
            .lock()
            .unwrap()
            .insert(package.to_string(), version.to_string());
        self
    }

    pub fn with_candidate(self, package: &str, version: &str) -> Self {
        self.candidates
            .lock()
            .unwrap()
            .insert(package.to_string(), version.to_string());
        self
    }

    /// Any install or removal touching `package` fails.
    pub fn failing(mut self, package: &str) -> Self {
        self.failing.insert(package.to_string());
        self
    }

    /// Mutating calls in order ("install sway", "remove foot").
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn install_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("install"))
            .count()
    }

    pub fn installed(&self) -> Vec<String> {
        let mut names: Vec<String> = self.installed.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    fn check_failing(&self, packages: &[String]) -> anyhow::Result<()> {
        if let Some(p) = packages.iter().find(|p| self.failing.contains(*p)) {
            anyhow::bail!("E: Unable to locate package {}", p);
        }
        Ok(())
    }
}

#[async_trait]
impl PackageManager for FakePackageManager {
    async fn install(&self, packages: &[String]) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("install {}", packages.join(" ")));
        self.check_failing(packages)?;
        let candidates = self.candidates.lock().unwrap().clone();
        let mut installed = self.installed.lock().unwrap();
        for p in packages {
            let version = candidates
                .get(p)
                .cloned()
                .unwrap_or_else(|| FAKE_VERSION.to_string());
            installed.insert(p.clone(), version);
        }
        Ok(())
    }

    async fn is_installed(&self, package: &str) -> anyhow::Result<bool> {
        Ok(self.installed.lock().unwrap().contains_key(package))
    }

    async fn remove(&self, packages: &[String]) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("remove {}", packages.join(" ")));
        self.check_failing(packages)?;
        let mut installed = self.installed.lock().unwrap();
        for p in packages {
            installed.remove(p);
        }
        Ok(())
    }
}

#[async_trait]
impl PackageQuery for FakePackageManager {
    async fn installed_version(&self, package: &str) -> anyhow::Result<Option<String>> {
        Ok(self.installed.lock().unwrap().get(package).cloned())
    }

    async fn candidate_version(&self, package: &str) -> anyhow::Result<Option<String>> {
        Ok(self.candidates.lock().unwrap().get(package).cloned())
    }
}

#[derive(Debug, Default)]
pub struct FakeServiceManager {
    enabled: Mutex<HashSet<String>>,
    active: Mutex<HashSet<String>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, unit: &str) -> Self {
        self.failing.insert(unit.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, verb: &str, unit: &ServiceUnit) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", verb, unit.name));
        if self.failing.contains(&unit.name) {
            anyhow::bail!("Failed to {} {}: Unit not found.", verb, unit.name);
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for FakeServiceManager {
    async fn enable(&self, unit: &ServiceUnit) -> anyhow::Result<()> {
        self.log("enable", unit)?;
        self.enabled.lock().unwrap().insert(unit.name.clone());
        Ok(())
    }

    async fn disable(&self, unit: &ServiceUnit) -> anyhow::Result<()> {
        self.log("disable", unit)?;
        self.enabled.lock().unwrap().remove(&unit.name);
        Ok(())
    }

    async fn start(&self, unit: &ServiceUnit) -> anyhow::Result<()> {
        self.log("start", unit)?;
        self.active.lock().unwrap().insert(unit.name.clone());
        Ok(())
    }

    async fn stop(&self, unit: &ServiceUnit) -> anyhow::Result<()> {
        self.log("stop", unit)?;
        self.active.lock().unwrap().remove(&unit.name);
        Ok(())
    }

    async fn is_enabled(&self, unit: &ServiceUnit) -> anyhow::Result<bool> {
        Ok(self.enabled.lock().unwrap().contains(&unit.name))
    }

    async fn is_active(&self, unit: &ServiceUnit) -> anyhow::Result<bool> {
        Ok(self.active.lock().unwrap().contains(&unit.name))
    }
}

/// Tracks which targets "exist" without touching the filesystem.
#[derive(Debug, Default)]
pub struct FakeConfigDeployer {
    existing: Mutex<HashSet<PathBuf>>,
    backups: Mutex<Vec<BackupInfo>>,
    deployed: Mutex<Vec<PathBuf>>,
    restored: Mutex<Vec<String>>,
    removed_files: Mutex<Vec<PathBuf>>,
    fail_backups: bool,
    fail_removal: HashSet<String>,
}

impl FakeConfigDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backups of existing files fail; deploys still succeed.
    pub fn failing_backups(mut self) -> Self {
        self.fail_backups = true;
        self
    }

    pub fn failing_removal(mut self, backup_id: &str) -> Self {
        self.fail_removal.insert(backup_id.to_string());
        self
    }

    pub fn add_existing(&self, path: impl Into<PathBuf>) {
        self.existing.lock().unwrap().insert(path.into());
    }

    pub fn add_backup(&self, info: BackupInfo) {
        self.backups.lock().unwrap().push(info);
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.existing.lock().unwrap().contains(path)
    }

    pub fn deployed(&self) -> Vec<PathBuf> {
        self.deployed.lock().unwrap().clone()
    }

    pub fn restored(&self) -> Vec<String> {
        self.restored.lock().unwrap().clone()
    }

    pub fn removed_files(&self) -> Vec<PathBuf> {
        self.removed_files.lock().unwrap().clone()
    }

    pub fn backup_ids(&self) -> Vec<String> {
        self.backups.lock().unwrap().iter().map(|b| b.id.clone()).collect()
    }
}

#[async_trait]
impl ConfigDeployer for FakeConfigDeployer {
    async fn deploy_with_backup(
        &self,
        spec: &ConfigFileSpec,
        _vars: &HashMap<String, String>,
    ) -> anyhow::Result<DeployResult> {
        let mut result = DeployResult {
            success: true,
            target: spec.target.clone(),
            backup_id: None,
            backup_path: None,
            backup_error: None,
        };

        if self.exists(&spec.target) {
            if self.fail_backups {
                result.backup_error = Some("permission denied".to_string());
            } else {
                let mut backups = self.backups.lock().unwrap();
                let id = format!("backup-{}", backups.len() + 1);
                let path = PathBuf::from("/backups").join(&id);
                backups.push(BackupInfo {
                    id: id.clone(),
                    created_at: Utc::now(),
                    path: path.clone(),
                    original: spec.target.clone(),
                });
                result.backup_id = Some(id);
                result.backup_path = Some(path);
            }
        }

        self.existing.lock().unwrap().insert(spec.target.clone());
        self.deployed.lock().unwrap().push(spec.target.clone());
        Ok(result)
    }

    async fn restore(&self, backup_id: &str) -> anyhow::Result<PathBuf> {
        let original = self
            .backups
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.id == backup_id)
            .map(|b| b.original.clone())
            .ok_or_else(|| anyhow::anyhow!("backup {} not found", backup_id))?;
        self.restored.lock().unwrap().push(backup_id.to_string());
        Ok(original)
    }

    async fn list_backups(&self) -> anyhow::Result<Vec<BackupInfo>> {
        let mut backups = self.backups.lock().unwrap().clone();
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    async fn remove_backup(&self, backup_id: &str) -> anyhow::Result<()> {
        if self.fail_removal.contains(backup_id) {
            anyhow::bail!("cannot remove backup {}: device busy", backup_id);
        }
        let mut backups = self.backups.lock().unwrap();
        let before = backups.len();
        backups.retain(|b| b.id != backup_id);
        if backups.len() == before {
            anyhow::bail!("backup {} not found", backup_id);
        }
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> anyhow::Result<()> {
        self.existing.lock().unwrap().remove(path);
        self.removed_files.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn is_deployed(&self, path: &Path) -> anyhow::Result<bool> {
        Ok(self.exists(path))
    }
}

#[async_trait]
impl BackupStore for FakeConfigDeployer {
    async fn list(&self) -> anyhow::Result<Vec<BackupInfo>> {
        self.list_backups().await
    }

    async fn remove(&self, backup_id: &str) -> anyhow::Result<()> {
        self.remove_backup(backup_id).await
    }
}

/// Probe answering from its fields. The default is a healthy Debian host.
#[derive(Debug, Clone)]
pub struct StaticProbe {
    pub os: OsRelease,
    pub privileged: bool,
    pub disk_bytes: u64,
    pub memory_bytes: u64,
    pub reachable: bool,
    pub lock_held: bool,
    pub desktop: Option<String>,
    pub gpu: Option<GpuVendor>,
    pub fail_os_release: bool,
    pub context: SystemContext,
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self {
            os: OsRelease {
                id: "debian".to_string(),
                id_like: Vec::new(),
                version_id: Some("12".to_string()),
                pretty_name: "Debian GNU/Linux 12 (bookworm)".to_string(),
            },
            privileged: true,
            disk_bytes: 50 << 30,
            memory_bytes: 8 << 30,
            reachable: true,
            lock_held: false,
            desktop: None,
            gpu: None,
            fail_os_release: false,
            context: SystemContext {
                hostname: "test-host".to_string(),
                distribution: "Debian GNU/Linux 12 (bookworm)".to_string(),
                kernel: "6.1.0-18-amd64".to_string(),
                architecture: "x86_64".to_string(),
            },
        }
    }
}

#[async_trait]
impl SystemProbe for StaticProbe {
    async fn os_release(&self) -> anyhow::Result<OsRelease> {
        if self.fail_os_release {
            anyhow::bail!("cannot read /etc/os-release: No such file or directory");
        }
        Ok(self.os.clone())
    }

    async fn is_privileged(&self) -> anyhow::Result<bool> {
        Ok(self.privileged)
    }

    async fn available_disk_bytes(&self) -> anyhow::Result<u64> {
        Ok(self.disk_bytes)
    }

    async fn total_memory_bytes(&self) -> anyhow::Result<u64> {
        Ok(self.memory_bytes)
    }

    async fn can_reach(&self, _host: &str, _port: u16) -> anyhow::Result<bool> {
        Ok(self.reachable)
    }

    async fn package_lock_held(&self) -> anyhow::Result<bool> {
        Ok(self.lock_held)
    }

    async fn running_desktop(&self) -> anyhow::Result<Option<String>> {
        Ok(self.desktop.clone())
    }

    async fn gpu_vendor(&self) -> anyhow::Result<Option<GpuVendor>> {
        Ok(self.gpu)
    }

    async fn system_context(&self) -> anyhow::Result<SystemContext> {
        Ok(self.context.clone())
    }
}
