//! rigupd: installation sessions over HTTP.
//!
//! The router wraps one [`rigup_install::InstallationService`]; every
//! installation runs on its own task and is polled through `status`.

pub mod routes;

pub use routes::{build_router, ApiError, ApiResult, DaemonState, SharedState};
