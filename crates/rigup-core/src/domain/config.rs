//! Installation configuration value object.

use serde::{Deserialize, Serialize};

use super::component::Component;
use super::error::ValidationError;

/// Version marker meaning "whatever the package archive offers".
pub const LATEST: &str = "latest";

/// Resolved package information for a selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub packages: Vec<String>,
    pub description: String,
}

impl PackageMetadata {
    /// Built-in package set for a component.
    pub fn for_component(component: Component) -> Self {
        Self {
            packages: component.packages().iter().map(|p| p.to_string()).collect(),
            description: component.description().to_string(),
        }
    }
}

/// One selected component with its target version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSelection {
    pub component: Component,
    /// Debian version string or [`LATEST`]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageMetadata>,
}

impl ComponentSelection {
    pub fn latest(component: Component) -> Self {
        Self {
            component,
            version: LATEST.to_string(),
            package: None,
        }
    }

    pub fn pinned(component: Component, version: impl Into<String>) -> Self {
        Self {
            component,
            version: version.into(),
            package: None,
        }
    }

    pub fn with_package(mut self, package: PackageMetadata) -> Self {
        self.package = Some(package);
        self
    }

    /// Packages to install: resolved metadata if present, else the built-in set.
    pub fn packages(&self) -> Vec<String> {
        match &self.package {
            Some(meta) if !meta.packages.is_empty() => meta.packages.clone(),
            _ => self
                .component
                .packages()
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    pub fn wants_latest(&self) -> bool {
        self.version == LATEST
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Unknown,
}

impl GpuVendor {
    /// Driver packages for vendors that need more than the in-kernel driver.
    pub fn driver_packages(&self) -> Option<&'static [&'static str]> {
        match self {
            GpuVendor::Nvidia => Some(&["nvidia-driver", "firmware-misc-nonfree"]),
            GpuVendor::Amd => Some(&["firmware-amd-graphics"]),
            GpuVendor::Intel | GpuVendor::Unknown => None,
        }
    }
}

impl std::fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GpuVendor::Nvidia => "nvidia",
            GpuVendor::Amd => "amd",
            GpuVendor::Intel => "intel",
            GpuVendor::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for GpuVendor {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nvidia" => Ok(GpuVendor::Nvidia),
            "amd" | "radeon" => Ok(GpuVendor::Amd),
            "intel" => Ok(GpuVendor::Intel),
            "unknown" | "none" => Ok(GpuVendor::Unknown),
            other => Err(ValidationError::InvalidConfig(format!(
                "unknown GPU vendor {:?}",
                other
            ))),
        }
    }
}

/// GPU requirement descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuSupport {
    pub vendor: GpuVendor,
    pub proprietary_driver_required: bool,
    /// Component that satisfies the driver requirement, when one is needed
    pub driver_component: Option<Component>,
}

impl GpuSupport {
    pub fn for_vendor(vendor: GpuVendor) -> Self {
        let proprietary = vendor == GpuVendor::Nvidia;
        Self {
            vendor,
            proprietary_driver_required: proprietary,
            driver_component: proprietary.then_some(Component::GpuDriver),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpace {
    pub required_bytes: u64,
    pub available_bytes: u64,
}

impl DiskSpace {
    pub fn is_sufficient(&self) -> bool {
        self.available_bytes >= self.required_bytes
    }
}

/// What an installation run should apply.
///
/// Invariants, checked by [`InstallationConfiguration::validate`]: at least
/// one component, `core` among them, and unique component tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationConfiguration {
    pub components: Vec<ComponentSelection>,
    #[serde(default)]
    pub gpu: Option<GpuSupport>,
    #[serde(default)]
    pub disk: DiskSpace,
    /// `None` means "not stated", which lets a merge keep the previous value
    #[serde(default)]
    pub merge_existing: Option<bool>,
}

impl InstallationConfiguration {
    /// Build a configuration, collapsing duplicate tags (last selection wins,
    /// keeping the first position) and validating the result.
    pub fn new(selections: Vec<ComponentSelection>) -> Result<Self, ValidationError> {
        let config = Self {
            components: dedupe(selections),
            gpu: None,
            disk: DiskSpace::default(),
            merge_existing: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_gpu(mut self, gpu: GpuSupport) -> Self {
        self.gpu = Some(gpu);
        self
    }

    pub fn with_disk(mut self, disk: DiskSpace) -> Self {
        self.disk = disk;
        self
    }

    pub fn with_merge_existing(mut self, merge: bool) -> Self {
        self.merge_existing = Some(merge);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.components.is_empty() {
            return Err(ValidationError::EmptyComponents);
        }
        if !self.contains(Component::Core) {
            return Err(ValidationError::MissingCore);
        }
        let mut seen = std::collections::HashSet::new();
        for sel in &self.components {
            if !seen.insert(sel.component) {
                return Err(ValidationError::InvalidConfig(format!(
                    "component {} selected twice",
                    sel.component
                )));
            }
        }
        Ok(())
    }

    pub fn contains(&self, component: Component) -> bool {
        self.components.iter().any(|s| s.component == component)
    }

    pub fn selection(&self, component: Component) -> Option<&ComponentSelection> {
        self.components.iter().find(|s| s.component == component)
    }

    /// Add or replace a selection in place.
    pub fn upsert(&mut self, selection: ComponentSelection) {
        match self
            .components
            .iter_mut()
            .find(|s| s.component == selection.component)
        {
            Some(existing) => *existing = selection,
            None => self.components.push(selection),
        }
    }

    pub fn should_merge(&self) -> bool {
        self.merge_existing.unwrap_or(false)
    }
}

fn dedupe(selections: Vec<ComponentSelection>) -> Vec<ComponentSelection> {
    let mut out: Vec<ComponentSelection> = Vec::with_capacity(selections.len());
    for sel in selections {
        match out.iter_mut().find(|s| s.component == sel.component) {
            Some(slot) => *slot = sel,
            None => out.push(sel),
        }
    }
    out
}
