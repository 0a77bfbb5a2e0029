//! Install / upgrade / skip decisions per requested component.
//!
//! `decide` is pure. `plan` adds read-only version queries through
//! [`PackageQuery`]; nothing here ever mutates the system.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collaborators::PackageQuery;
use crate::domain::{ComponentSelection, DebVersion, InstallationConfiguration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    Install,
    Upgrade,
    Skip,
}

impl std::fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolutionAction::Install => "install",
            ResolutionAction::Upgrade => "upgrade",
            ResolutionAction::Skip => "skip",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub action: ResolutionAction,
    pub reason: String,
}

impl Resolution {
    fn new(action: ResolutionAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
        }
    }
}

/// One line of the install plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedComponent {
    pub selection: ComponentSelection,
    pub action: ResolutionAction,
    pub reason: String,
    pub installed_version: Option<String>,
    /// Concrete version the install aims for, when known
    pub target_version: Option<String>,
}

impl PlannedComponent {
    pub fn is_skipped(&self) -> bool {
        self.action == ResolutionAction::Skip
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Compare a requested version against what is installed.
    ///
    /// Never downgrades: an installed version equal to or newer than the
    /// request is skipped. An installed version that cannot be parsed is
    /// treated as older.
    pub fn decide(&self, requested: &str, installed: Option<&str>) -> Resolution {
        let Some(installed) = installed else {
            return Resolution::new(ResolutionAction::Install, "not installed");
        };

        let wanted = match DebVersion::parse(requested) {
            Ok(v) => v,
            Err(_) => {
                return Resolution::new(
                    ResolutionAction::Upgrade,
                    format!("cannot compare requested version {:?}", requested),
                )
            }
        };
        let have = match DebVersion::parse(installed) {
            Ok(v) => v,
            Err(_) => {
                return Resolution::new(
                    ResolutionAction::Upgrade,
                    format!("installed version {:?} is unparsable", installed),
                )
            }
        };

        match have.cmp(&wanted) {
            Ordering::Less => Resolution::new(
                ResolutionAction::Upgrade,
                format!("installed {} is older than {}", have, wanted),
            ),
            Ordering::Equal => Resolution::new(
                ResolutionAction::Skip,
                format!("already at requested version {}", have),
            ),
            Ordering::Greater => Resolution::new(
                ResolutionAction::Skip,
                format!("installed {} is newer than {}; not downgrading", have, wanted),
            ),
        }
    }

    /// Resolve every selection of `config` in order.
    ///
    /// The first package of a component decides the version comparison; a
    /// component whose other packages are missing is installed regardless.
    pub async fn plan(
        &self,
        config: &InstallationConfiguration,
        query: &dyn PackageQuery,
    ) -> anyhow::Result<Vec<PlannedComponent>> {
        let mut plan = Vec::with_capacity(config.components.len());

        for selection in &config.components {
            let packages = selection.packages();
            let Some(primary) = packages.first() else {
                continue;
            };

            let installed = query.installed_version(primary).await?;
            let target = if selection.wants_latest() {
                query.candidate_version(primary).await?
            } else {
                Some(selection.version.clone())
            };

            let mut resolution = match (&target, &installed) {
                (Some(target), _) => self.decide(target, installed.as_deref()),
                (None, None) => Resolution::new(ResolutionAction::Install, "not installed"),
                (None, Some(_)) => {
                    Resolution::new(ResolutionAction::Skip, "installed; no candidate available")
                }
            };

            if resolution.action == ResolutionAction::Skip {
                let mut missing = Vec::new();
                for pkg in packages.iter().skip(1) {
                    if query.installed_version(pkg).await?.is_none() {
                        missing.push(pkg.as_str());
                    }
                }
                if !missing.is_empty() {
                    resolution = Resolution::new(
                        ResolutionAction::Install,
                        format!("missing packages: {}", missing.join(", ")),
                    );
                }
            }

            debug!(
                component = %selection.component,
                action = %resolution.action,
                reason = %resolution.reason,
                "resolved"
            );
            plan.push(PlannedComponent {
                selection: selection.clone(),
                action: resolution.action,
                reason: resolution.reason,
                installed_version: installed,
                target_version: target,
            });
        }
        Ok(plan)
    }
}
