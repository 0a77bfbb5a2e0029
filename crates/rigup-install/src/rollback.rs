//! Rollback executor backed by the real collaborators.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rigup_core::{ConfigDeployer, PackageManager, RollbackExecutor, RollbackIntent, ServiceManager};
use tracing::info;

#[derive(Clone)]
pub struct CollaboratorRollback {
    packages: Arc<dyn PackageManager>,
    services: Arc<dyn ServiceManager>,
    deployer: Arc<dyn ConfigDeployer>,
}

impl CollaboratorRollback {
    pub fn new(
        packages: Arc<dyn PackageManager>,
        services: Arc<dyn ServiceManager>,
        deployer: Arc<dyn ConfigDeployer>,
    ) -> Self {
        Self {
            packages,
            services,
            deployer,
        }
    }
}

#[async_trait]
impl RollbackExecutor for CollaboratorRollback {
    async fn apply(&self, intent: &RollbackIntent) -> anyhow::Result<()> {
        info!(step = %intent.describe(), "rolling back");
        match intent {
            RollbackIntent::RemovePackages { packages } => self.packages.remove(packages).await,
            RollbackIntent::DisableService { unit } => {
                // A unit that is already stopped still gets disabled
                let stopped = self.services.stop(unit).await;
                self.services.disable(unit).await?;
                stopped
            }
            RollbackIntent::RestoreBackup { backup_id, .. } => {
                self.deployer.restore(backup_id).await.map(|_| ())
            }
            RollbackIntent::RemoveFile { path } => self.deployer.remove_file(Path::new(path)).await,
            RollbackIntent::Batch { .. } => {
                anyhow::bail!("batch intents must be flattened before execution")
            }
        }
    }
}
