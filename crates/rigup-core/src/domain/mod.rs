//! Domain model for rigup.
//!
//! Components and their packages, operation results, installation
//! configuration, Debian version ordering, and the error taxonomy.

pub mod component;
pub mod config;
pub mod error;
pub mod result;
pub mod version;

pub use component::{CheckId, Component, ServiceUnit, Subject};
pub use config::{
    ComponentSelection, DiskSpace, GpuSupport, GpuVendor, InstallationConfiguration,
    PackageMetadata, LATEST,
};
pub use error::{Result, RigupError, ValidationError};
pub use result::{OperationResult, Severity, Status};
pub use version::DebVersion;
