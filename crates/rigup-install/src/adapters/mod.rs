//! Host adapters for the collaborator traits.

pub mod apt;
pub mod deployer;
pub mod probe;
pub mod systemd;

pub use apt::AptPackageManager;
pub use deployer::FileConfigDeployer;
pub use probe::HostProbe;
pub use systemd::SystemdServiceManager;
