//! Post-install setup: configuration files, services and the wallpaper cache.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rigup_core::{
    Component, ConfigDeployer, ConfigFileSpec, Operation, OperationKind, OperationResult,
    RollbackIntent, ServiceManager, ServiceUnit, Status, Subject,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RigupConfig;
use crate::templates;

/// Enable and start one unit.
pub struct ServiceSetup {
    name: String,
    component: Component,
    unit: ServiceUnit,
    services: Arc<dyn ServiceManager>,
}

impl ServiceSetup {
    pub fn new(component: Component, unit: ServiceUnit, services: Arc<dyn ServiceManager>) -> Self {
        Self {
            name: format!("service:{}", unit.name),
            component,
            unit,
            services,
        }
    }
}

#[async_trait]
impl Operation for ServiceSetup {
    fn name(&self) -> &str {
        &self.name
    }

    fn subject(&self) -> Subject {
        self.component.into()
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Installer
    }

    async fn execute(&self, _cancel: &CancellationToken) -> anyhow::Result<OperationResult> {
        self.services.enable(&self.unit).await?;
        self.services.start(&self.unit).await?;
        Ok(OperationResult::new(
            self.name.as_str(),
            self.component,
            Status::Completed,
            format!("{} enabled and started", self.unit),
        ))
    }

    async fn verify(&self, _cancel: &CancellationToken) -> anyhow::Result<bool> {
        Ok(self.services.is_enabled(&self.unit).await? && self.services.is_active(&self.unit).await?)
    }

    fn rollback_intent(&self) -> Option<RollbackIntent> {
        Some(RollbackIntent::DisableService {
            unit: self.unit.clone(),
        })
    }
}

/// Deploy every configuration file of one component, backing up originals.
pub struct ConfigDeployment {
    name: String,
    component: Component,
    files: Vec<ConfigFileSpec>,
    vars: Arc<HashMap<String, String>>,
    deployer: Arc<dyn ConfigDeployer>,
    intents: Mutex<Vec<RollbackIntent>>,
}

impl ConfigDeployment {
    pub fn new(
        component: Component,
        files: Vec<ConfigFileSpec>,
        vars: Arc<HashMap<String, String>>,
        deployer: Arc<dyn ConfigDeployer>,
    ) -> Self {
        Self {
            name: format!("config:{}", component.tag()),
            component,
            files,
            vars,
            deployer,
            intents: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Operation for ConfigDeployment {
    fn name(&self) -> &str {
        &self.name
    }

    fn subject(&self) -> Subject {
        self.component.into()
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Installer
    }

    async fn execute(&self, _cancel: &CancellationToken) -> anyhow::Result<OperationResult> {
        let mut intents = Vec::with_capacity(self.files.len());
        let mut details = Vec::new();
        let mut backup_failures = Vec::new();

        for spec in &self.files {
            let deployed = self.deployer.deploy_with_backup(spec, &self.vars).await?;
            let target = deployed.target.display().to_string();
            match (&deployed.backup_id, &deployed.backup_error) {
                (Some(id), _) => {
                    details.push(format!("{} (backup {})", target, id));
                    intents.push(RollbackIntent::RestoreBackup {
                        backup_id: id.clone(),
                        target,
                    });
                }
                (None, Some(err)) => {
                    warn!(config = %spec.name, error = %err, "deployed without backup");
                    backup_failures.push(format!("{}: backup failed: {}", target, err));
                }
                (None, None) => {
                    details.push(target.clone());
                    intents.push(RollbackIntent::RemoveFile { path: target });
                }
            }
        }

        *self.intents.lock().unwrap_or_else(|e| e.into_inner()) = intents;

        let result = OperationResult::new(
            self.name.as_str(),
            self.component,
            Status::Completed,
            format!("{} configuration file(s) deployed", self.files.len()),
        )
        .with_details(details);

        if backup_failures.is_empty() {
            Ok(result)
        } else {
            Ok(result
                .with_status(Status::Warning)
                .with_details(backup_failures)
                .with_suggestion("files without a backup cannot be restored by rollback"))
        }
    }

    async fn verify(&self, _cancel: &CancellationToken) -> anyhow::Result<bool> {
        for spec in &self.files {
            if !self.deployer.is_deployed(&spec.target).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn rollback_intent(&self) -> Option<RollbackIntent> {
        let mut intents = self.intents.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match intents.len() {
            0 => None,
            1 => intents.pop(),
            _ => Some(RollbackIntent::Batch { steps: intents }),
        }
    }
}

/// Copy the default wallpaper into the user's cache directory.
pub struct WallpaperCache {
    source: PathBuf,
    target: PathBuf,
    dry_run: bool,
    created: Mutex<bool>,
}

impl WallpaperCache {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            dry_run,
            created: Mutex::new(false),
        }
    }
}

#[async_trait]
impl Operation for WallpaperCache {
    fn name(&self) -> &str {
        "wallpaper:cache"
    }

    fn subject(&self) -> Subject {
        Component::Wallpaper.into()
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Installer
    }

    async fn execute(&self, _cancel: &CancellationToken) -> anyhow::Result<OperationResult> {
        if !tokio::fs::try_exists(&self.source).await.unwrap_or(false) {
            return Ok(OperationResult::new(
                self.name(),
                Component::Wallpaper,
                Status::Skipped,
                format!("wallpaper source {} not found", self.source.display()),
            ));
        }
        if self.dry_run {
            info!(target = %self.target.display(), "dry run: wallpaper not copied");
            return Ok(OperationResult::new(
                self.name(),
                Component::Wallpaper,
                Status::Skipped,
                "dry run",
            ));
        }

        let existed = tokio::fs::try_exists(&self.target).await.unwrap_or(false);
        if let Some(parent) = self.target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&self.source, &self.target).await?;
        *self.created.lock().unwrap_or_else(|e| e.into_inner()) = !existed;

        Ok(OperationResult::new(
            self.name(),
            Component::Wallpaper,
            Status::Completed,
            format!("wallpaper cached at {}", self.target.display()),
        ))
    }

    async fn verify(&self, _cancel: &CancellationToken) -> anyhow::Result<bool> {
        Ok(tokio::fs::try_exists(&self.target).await?)
    }

    fn rollback_intent(&self) -> Option<RollbackIntent> {
        let created = *self.created.lock().unwrap_or_else(|e| e.into_inner());
        created.then(|| RollbackIntent::RemoveFile {
            path: self.target.display().to_string(),
        })
    }
}

/// Everything setup operations need besides the component list.
#[derive(Clone)]
pub struct SetupContext {
    pub deployer: Arc<dyn ConfigDeployer>,
    pub services: Arc<dyn ServiceManager>,
    pub vars: Arc<HashMap<String, String>>,
    pub home_dir: PathBuf,
    pub wallpaper_source: PathBuf,
    pub wallpaper_target: PathBuf,
    pub dry_run: bool,
}

impl SetupContext {
    pub fn from_config(
        config: &RigupConfig,
        deployer: Arc<dyn ConfigDeployer>,
        services: Arc<dyn ServiceManager>,
    ) -> Self {
        Self {
            deployer,
            services,
            vars: Arc::new(templates::default_vars(config)),
            home_dir: config.home_dir.clone(),
            wallpaper_source: config.wallpaper_source.clone(),
            wallpaper_target: config.wallpaper_cache(),
            dry_run: config.apt.dry_run,
        }
    }
}

/// Setup operations for `components`: configuration files first, then
/// services in component order, then the wallpaper cache.
pub fn setup_operations(components: &[Component], ctx: &SetupContext) -> Vec<Arc<dyn Operation>> {
    let mut ops: Vec<Arc<dyn Operation>> = Vec::new();

    for &component in components {
        let files = templates::config_files(component, &ctx.home_dir);
        if !files.is_empty() {
            ops.push(Arc::new(ConfigDeployment::new(
                component,
                files,
                ctx.vars.clone(),
                ctx.deployer.clone(),
            )));
        }
    }

    for &component in components {
        for unit in component.services() {
            ops.push(Arc::new(ServiceSetup::new(component, unit, ctx.services.clone())));
        }
    }

    if components.contains(&Component::Core) || components.contains(&Component::Wallpaper) {
        ops.push(Arc::new(WallpaperCache::new(
            ctx.wallpaper_source.clone(),
            ctx.wallpaper_target.clone(),
            ctx.dry_run,
        )));
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeConfigDeployer, FakeServiceManager};

    fn ctx(deployer: Arc<FakeConfigDeployer>, services: Arc<FakeServiceManager>) -> SetupContext {
        SetupContext {
            deployer,
            services,
            vars: Arc::new(HashMap::new()),
            home_dir: PathBuf::from("/home/ada"),
            wallpaper_source: PathBuf::from("/nonexistent/wallpaper"),
            wallpaper_target: PathBuf::from("/home/ada/.cache/rigup/wallpaper"),
            dry_run: false,
        }
    }

    #[test]
    fn test_display_manager_precedes_wallpaper() {
        let ctx = ctx(Arc::new(FakeConfigDeployer::new()), Arc::new(FakeServiceManager::new()));
        let ops = setup_operations(
            &[Component::Core, Component::DisplayManager, Component::Audio],
            &ctx,
        );
        let names: Vec<&str> = ops.iter().map(|o| o.name()).collect();
        assert_eq!(
            names,
            vec![
                "config:core",
                "config:display-manager",
                "service:greetd.service",
                "service:pipewire.service",
                "service:pipewire-pulse.service",
                "service:wireplumber.service",
                "wallpaper:cache",
            ]
        );
    }

    #[tokio::test]
    async fn test_service_setup_enables_and_verifies() {
        let services = Arc::new(FakeServiceManager::new());
        let op = ServiceSetup::new(
            Component::Network,
            ServiceUnit::system("NetworkManager.service"),
            services.clone(),
        );
        let cancel = CancellationToken::new();
        assert_eq!(op.execute(&cancel).await.unwrap().status, Status::Completed);
        assert!(op.verify(&cancel).await.unwrap());
        assert!(matches!(
            op.rollback_intent(),
            Some(RollbackIntent::DisableService { .. })
        ));
    }

    #[tokio::test]
    async fn test_config_rollback_intents() {
        let deployer = Arc::new(FakeConfigDeployer::new());
        deployer.add_existing("/home/ada/.config/waybar/config");
        let op = ConfigDeployment::new(
            Component::StatusBar,
            templates::config_files(Component::StatusBar, &PathBuf::from("/home/ada")),
            Arc::new(HashMap::new()),
            deployer.clone(),
        );
        let cancel = CancellationToken::new();
        let r = op.execute(&cancel).await.unwrap();
        assert_eq!(r.status, Status::Completed);
        assert!(op.verify(&cancel).await.unwrap());

        let Some(RollbackIntent::Batch { steps }) = op.rollback_intent() else {
            panic!("expected a batch");
        };
        assert!(matches!(steps[0], RollbackIntent::RestoreBackup { .. }));
        assert!(matches!(steps[1], RollbackIntent::RemoveFile { .. }));
    }

    #[tokio::test]
    async fn test_failed_backup_is_warning() {
        let deployer = Arc::new(FakeConfigDeployer::new().failing_backups());
        deployer.add_existing("/home/ada/.config/foot/foot.ini");
        let op = ConfigDeployment::new(
            Component::Terminal,
            templates::config_files(Component::Terminal, &PathBuf::from("/home/ada")),
            Arc::new(HashMap::new()),
            deployer,
        );
        let r = op.execute(&CancellationToken::new()).await.unwrap();
        assert_eq!(r.status, Status::Warning);
        assert!(op.rollback_intent().is_none());
    }

    #[tokio::test]
    async fn test_wallpaper_copy_and_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("default.png");
        let target = dir.path().join("cache/rigup/wallpaper");
        let cancel = CancellationToken::new();

        let missing = WallpaperCache::new(dir.path().join("nope"), &target, false);
        assert_eq!(missing.execute(&cancel).await.unwrap().status, Status::Skipped);
        assert!(missing.rollback_intent().is_none());

        std::fs::write(&source, b"png").unwrap();
        let op = WallpaperCache::new(&source, &target, false);
        assert_eq!(op.execute(&cancel).await.unwrap().status, Status::Completed);
        assert!(op.verify(&cancel).await.unwrap());
        assert_eq!(std::fs::read(&target).unwrap(), b"png");
        assert!(matches!(op.rollback_intent(), Some(RollbackIntent::RemoveFile { .. })));
    }
}
