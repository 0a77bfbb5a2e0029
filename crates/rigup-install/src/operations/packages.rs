//! One installer per planned component.

use std::sync::Arc;

use async_trait::async_trait;
use rigup_core::{
    Operation, OperationKind, OperationResult, PackageManager, PlannedComponent, ResolutionAction,
    RollbackIntent, Status, Subject,
};
use tokio_util::sync::CancellationToken;

pub struct PackageInstall {
    name: String,
    planned: PlannedComponent,
    packages: Vec<String>,
    manager: Arc<dyn PackageManager>,
}

impl PackageInstall {
    pub fn new(planned: PlannedComponent, manager: Arc<dyn PackageManager>) -> Self {
        Self {
            name: format!("install:{}", planned.selection.component.tag()),
            packages: planned.selection.packages(),
            planned,
            manager,
        }
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }
}

#[async_trait]
impl Operation for PackageInstall {
    fn name(&self) -> &str {
        &self.name
    }

    fn subject(&self) -> Subject {
        self.planned.selection.component.into()
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Installer
    }

    async fn execute(&self, _cancel: &CancellationToken) -> anyhow::Result<OperationResult> {
        let component = self.planned.selection.component;
        if self.planned.is_skipped() {
            return Ok(OperationResult::new(
                self.name.as_str(),
                component,
                Status::Skipped,
                format!("{} skipped: {}", component, self.planned.reason),
            ));
        }

        self.manager.install(&self.packages).await?;

        let verb = match self.planned.action {
            ResolutionAction::Upgrade => "upgraded",
            _ => "installed",
        };
        let target = self
            .planned
            .target_version
            .as_deref()
            .map(|v| format!(" ({})", v))
            .unwrap_or_default();
        Ok(OperationResult::new(
            self.name.as_str(),
            component,
            Status::Completed,
            format!("{} {}{}", verb, component, target),
        )
        .with_details(self.packages.iter().cloned())
        .with_detail(self.planned.reason.clone()))
    }

    async fn verify(&self, _cancel: &CancellationToken) -> anyhow::Result<bool> {
        for package in &self.packages {
            if !self.manager.is_installed(package).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Fresh installs are removed again; upgrades cannot be undone.
    fn rollback_intent(&self) -> Option<RollbackIntent> {
        (self.planned.action == ResolutionAction::Install).then(|| RollbackIntent::RemovePackages {
            packages: self.packages.clone(),
        })
    }
}

pub fn package_installers(
    plan: &[PlannedComponent],
    manager: Arc<dyn PackageManager>,
) -> Vec<Arc<dyn Operation>> {
    plan.iter()
        .map(|p| Arc::new(PackageInstall::new(p.clone(), manager.clone())) as Arc<dyn Operation>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakePackageManager;
    use rigup_core::{Component, ComponentSelection};

    fn planned(action: ResolutionAction) -> PlannedComponent {
        PlannedComponent {
            selection: ComponentSelection::latest(Component::Core),
            action,
            reason: "test".to_string(),
            installed_version: None,
            target_version: Some("1.8.1-2".to_string()),
        }
    }

    #[tokio::test]
    async fn test_install_then_verify() {
        let manager = Arc::new(FakePackageManager::new());
        let op = PackageInstall::new(planned(ResolutionAction::Install), manager.clone());
        let cancel = CancellationToken::new();

        let r = op.execute(&cancel).await.unwrap();
        assert_eq!(r.status, Status::Completed);
        assert_eq!(r.message, "installed core (1.8.1-2)");
        assert!(op.verify(&cancel).await.unwrap());
        assert_eq!(
            op.rollback_intent(),
            Some(RollbackIntent::RemovePackages {
                packages: vec!["sway".to_string()]
            })
        );
    }

    #[tokio::test]
    async fn test_skip_never_calls_manager() {
        let manager = Arc::new(FakePackageManager::new());
        let op = PackageInstall::new(planned(ResolutionAction::Skip), manager.clone());
        let r = op.execute(&CancellationToken::new()).await.unwrap();
        assert_eq!(r.status, Status::Skipped);
        assert_eq!(manager.install_calls(), 0);
    }

    #[tokio::test]
    async fn test_upgrade_has_no_rollback() {
        let manager = Arc::new(FakePackageManager::new());
        let op = PackageInstall::new(planned(ResolutionAction::Upgrade), manager);
        assert!(op.rollback_intent().is_none());
    }

    #[tokio::test]
    async fn test_manager_error_propagates() {
        let manager = Arc::new(FakePackageManager::new().failing("sway"));
        let op = PackageInstall::new(planned(ResolutionAction::Install), manager);
        assert!(op.execute(&CancellationToken::new()).await.is_err());
    }
}
