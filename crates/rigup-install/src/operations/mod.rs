//! Concrete operations: preflight validators, package installers,
//! post-install setup steps and diagnostic checkers.

pub mod doctor;
pub mod packages;
pub mod preflight;
pub mod setup;

pub use doctor::checkers;
pub use packages::{package_installers, PackageInstall};
pub use preflight::{validators, PreflightCheck, PreflightContext};
pub use setup::{setup_operations, ConfigDeployment, ServiceSetup, SetupContext, WallpaperCache};
