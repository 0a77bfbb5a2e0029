//! Post-install diagnostic checkers used by `rigup doctor`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rigup_core::{
    CheckId, Component, ConfigFileSpec, Operation, OperationKind, OperationResult, PackageManager,
    ServiceManager, ServiceUnit, Severity, Status, Subject,
};
use tokio_util::sync::CancellationToken;

use crate::templates;

enum Probe {
    Packages {
        packages: Vec<String>,
        manager: Arc<dyn PackageManager>,
    },
    Services {
        units: Vec<ServiceUnit>,
        services: Arc<dyn ServiceManager>,
    },
    Configs {
        files: Vec<ConfigFileSpec>,
    },
}

pub struct ComponentCheck {
    name: String,
    check: CheckId,
    component: Component,
    probe: Probe,
}

impl ComponentCheck {
    fn new(check: CheckId, component: Component, probe: Probe) -> Self {
        Self {
            name: format!("doctor:{}:{}", check.tag(), component.tag()),
            check,
            component,
            probe,
        }
    }

    fn severity(&self) -> Severity {
        match self.check {
            CheckId::PackagesInstalled => Severity::High,
            CheckId::ServicesActive => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// Names of whatever is missing or inactive.
    async fn missing(&self) -> anyhow::Result<Vec<String>> {
        let mut missing = Vec::new();
        match &self.probe {
            Probe::Packages { packages, manager } => {
                for p in packages {
                    if !manager.is_installed(p).await? {
                        missing.push(p.clone());
                    }
                }
            }
            Probe::Services { units, services } => {
                for unit in units {
                    if !(services.is_enabled(unit).await? && services.is_active(unit).await?) {
                        missing.push(unit.to_string());
                    }
                }
            }
            Probe::Configs { files } => {
                for f in files {
                    if !tokio::fs::try_exists(&f.target).await.unwrap_or(false) {
                        missing.push(f.target.display().to_string());
                    }
                }
            }
        }
        Ok(missing)
    }
}

#[async_trait]
impl Operation for ComponentCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn subject(&self) -> Subject {
        self.check.into()
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Checker
    }

    async fn execute(&self, _cancel: &CancellationToken) -> anyhow::Result<OperationResult> {
        let what = match self.check {
            CheckId::PackagesInstalled => "packages installed",
            CheckId::ServicesActive => "services enabled and active",
            _ => "configuration present",
        };
        let missing = self.missing().await?;
        let result = if missing.is_empty() {
            OperationResult::check(
                self.name.as_str(),
                self.check,
                Status::Pass,
                self.severity(),
                format!("{}: {}", self.component, what),
            )
        } else {
            OperationResult::check(
                self.name.as_str(),
                self.check,
                Status::Fail,
                self.severity(),
                format!("{}: {} missing", self.component, missing.len()),
            )
            .with_details(missing)
            .with_suggestion(format!("re-run `rigup install` or `rigup setup` for {}", self.component))
        };
        Ok(result)
    }
}

/// Checkers for `components`, skipping checks a component has nothing for.
pub fn checkers(
    components: &[Component],
    manager: Arc<dyn PackageManager>,
    services: Arc<dyn ServiceManager>,
    home: &Path,
) -> Vec<Arc<dyn Operation>> {
    let mut ops: Vec<Arc<dyn Operation>> = Vec::new();
    for &component in components {
        ops.push(Arc::new(ComponentCheck::new(
            CheckId::PackagesInstalled,
            component,
            Probe::Packages {
                packages: component.packages().iter().map(|p| p.to_string()).collect(),
                manager: manager.clone(),
            },
        )));

        let units = component.services();
        if !units.is_empty() {
            ops.push(Arc::new(ComponentCheck::new(
                CheckId::ServicesActive,
                component,
                Probe::Services {
                    units,
                    services: services.clone(),
                },
            )));
        }

        let files = templates::config_files(component, home);
        if !files.is_empty() {
            ops.push(Arc::new(ComponentCheck::new(
                CheckId::ConfigPresent,
                component,
                Probe::Configs { files },
            )));
        }
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakePackageManager, FakeServiceManager};

    #[tokio::test]
    async fn test_missing_package_fails_high_not_blocking() {
        let manager = Arc::new(FakePackageManager::new());
        let services = Arc::new(FakeServiceManager::new());
        let ops = checkers(&[Component::Terminal], manager.clone(), services, Path::new("/nonexistent"));
        let cancel = CancellationToken::new();

        let r = ops[0].execute(&cancel).await.unwrap();
        assert_eq!(r.status, Status::Fail);
        assert_eq!(r.severity, Some(Severity::High));
        assert!(!r.is_blocking());
        assert_eq!(r.details, vec!["foot".to_string()]);

        manager.install(&["foot".to_string()]).await.unwrap();
        assert_eq!(ops[0].execute(&cancel).await.unwrap().status, Status::Pass);
    }

    #[tokio::test]
    async fn test_check_set_per_component() {
        let ops = checkers(
            &[Component::Audio, Component::Fonts],
            Arc::new(FakePackageManager::new()),
            Arc::new(FakeServiceManager::new()),
            Path::new("/home/ada"),
        );
        let names: Vec<&str> = ops.iter().map(|o| o.name()).collect();
        assert_eq!(
            names,
            vec![
                "doctor:packages-installed:audio",
                "doctor:services-active:audio",
                "doctor:packages-installed:fonts",
            ]
        );
        assert!(ops.iter().all(|o| o.kind() == OperationKind::Checker));
    }

    #[tokio::test]
    async fn test_inactive_service_reported() {
        let services = Arc::new(FakeServiceManager::new());
        let ops = checkers(
            &[Component::Network],
            Arc::new(FakePackageManager::new()),
            services.clone(),
            Path::new("/home/ada"),
        );
        let cancel = CancellationToken::new();
        let r = ops[1].execute(&cancel).await.unwrap();
        assert_eq!(r.status, Status::Fail);

        let unit = ServiceUnit::system("NetworkManager.service");
        services.enable(&unit).await.unwrap();
        services.start(&unit).await.unwrap();
        assert_eq!(ops[1].execute(&cancel).await.unwrap().status, Status::Pass);
    }
}
