//! Read-only preflight validators.
//!
//! A probe error never escapes: it becomes a `Fail` result at the check's
//! own severity, so an unreadable disk counts as a blocking failure while
//! an unreadable GPU list does not.

use std::sync::Arc;

use async_trait::async_trait;
use rigup_core::{
    CheckId, GpuSupport, GpuVendor, Operation, OperationKind, OperationResult, Severity, Status,
    Subject, SystemProbe,
};
use tokio_util::sync::CancellationToken;

use crate::config::RigupConfig;

const GIB: u64 = 1 << 30;
const MIB: u64 = 1 << 20;

/// Thresholds the validators compare against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightContext {
    pub required_disk_bytes: u64,
    pub min_memory_bytes: u64,
    pub mirror_host: String,
    pub mirror_port: u16,
}

impl PreflightContext {
    pub fn from_config(config: &RigupConfig) -> Self {
        Self {
            required_disk_bytes: config.required_disk_bytes(),
            min_memory_bytes: config.min_memory_bytes(),
            mirror_host: config.mirror_host.clone(),
            mirror_port: 80,
        }
    }
}

pub struct PreflightCheck {
    check: CheckId,
    name: String,
    probe: Arc<dyn SystemProbe>,
    ctx: Arc<PreflightContext>,
}

impl PreflightCheck {
    pub fn new(check: CheckId, probe: Arc<dyn SystemProbe>, ctx: Arc<PreflightContext>) -> Self {
        Self {
            check,
            name: format!("preflight:{}", check.tag()),
            probe,
            ctx,
        }
    }

    pub fn severity(check: CheckId) -> Severity {
        match check {
            CheckId::Distribution
            | CheckId::Privileges
            | CheckId::DiskSpace
            | CheckId::PackageLock => Severity::Critical,
            CheckId::NetworkReachability => Severity::High,
            CheckId::Memory => Severity::Medium,
            _ => Severity::Low,
        }
    }

    fn result(&self, status: Status, message: impl Into<String>) -> OperationResult {
        OperationResult::check(
            self.name.as_str(),
            self.check,
            status,
            Self::severity(self.check),
            message,
        )
    }

    async fn evaluate(&self) -> anyhow::Result<OperationResult> {
        let result = match self.check {
            CheckId::Distribution => {
                let release = self.probe.os_release().await?;
                if release.is_debian_family() {
                    self.result(Status::Pass, format!("{} is supported", release.pretty_name))
                } else {
                    self.result(
                        Status::Fail,
                        format!("unsupported distribution {:?}", release.id),
                    )
                    .with_suggestion("rigup supports Debian and Debian derivatives only")
                }
            }
            CheckId::Privileges => {
                if self.probe.is_privileged().await? {
                    self.result(Status::Pass, "root or passwordless sudo available")
                } else {
                    self.result(Status::Fail, "package installation requires root privileges")
                        .with_suggestion("run as root or configure sudo for this user")
                }
            }
            CheckId::DiskSpace => {
                let available = self.probe.available_disk_bytes().await?;
                let required = self.ctx.required_disk_bytes;
                let message = format!(
                    "{}GB available, {}GB required",
                    available / GIB,
                    required / GIB
                );
                if available >= required {
                    self.result(Status::Pass, message)
                } else {
                    self.result(Status::Fail, message)
                        .with_suggestion("free disk space or lower required_disk_gb")
                }
            }
            CheckId::Memory => {
                let total = self.probe.total_memory_bytes().await?;
                let message = format!(
                    "{}MB memory, {}MB recommended",
                    total / MIB,
                    self.ctx.min_memory_bytes / MIB
                );
                if total >= self.ctx.min_memory_bytes {
                    self.result(Status::Pass, message)
                } else {
                    self.result(Status::Warning, message)
                }
            }
            CheckId::NetworkReachability => {
                let host = &self.ctx.mirror_host;
                if self.probe.can_reach(host, self.ctx.mirror_port).await? {
                    self.result(Status::Pass, format!("{} reachable", host))
                } else {
                    self.result(Status::Fail, format!("cannot reach {}", host))
                        .with_suggestion("check the network connection and apt sources")
                }
            }
            CheckId::PackageLock => {
                if self.probe.package_lock_held().await? {
                    self.result(Status::Fail, "another process holds the dpkg lock")
                        .with_suggestion("wait for the running apt or dpkg process to finish")
                } else {
                    self.result(Status::Pass, "package database is not locked")
                }
            }
            CheckId::ExistingDesktop => match self.probe.running_desktop().await? {
                Some(desktop) => self
                    .result(Status::Warning, format!("existing desktop session {} found", desktop))
                    .with_detail("the new session is added alongside it"),
                None => self.result(Status::Pass, "no other desktop session installed"),
            },
            CheckId::Gpu => match self.probe.gpu_vendor().await? {
                Some(vendor) => {
                    let support = GpuSupport::for_vendor(vendor);
                    let result = self.result(Status::Pass, format!("{} GPU detected", vendor));
                    if support.proprietary_driver_required {
                        result.with_detail("proprietary driver will be installed")
                    } else {
                        result
                    }
                }
                None => self.result(Status::Pass, "no GPU detected"),
            },
            other => self.result(
                Status::Warning,
                format!("{} is not a preflight check", other),
            ),
        };
        Ok(result)
    }
}

#[async_trait]
impl Operation for PreflightCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn subject(&self) -> Subject {
        self.check.into()
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Validator
    }

    async fn execute(&self, _cancel: &CancellationToken) -> anyhow::Result<OperationResult> {
        match self.evaluate().await {
            Ok(result) => Ok(result),
            Err(e) => Ok(self
                .result(Status::Fail, format!("{} check could not run", self.check))
                .with_error(format!("{:#}", e))),
        }
    }
}

/// Every preflight validator, in reporting order.
pub fn validators(
    probe: Arc<dyn SystemProbe>,
    ctx: PreflightContext,
) -> Vec<Arc<dyn Operation>> {
    let ctx = Arc::new(ctx);
    [
        CheckId::Distribution,
        CheckId::Privileges,
        CheckId::DiskSpace,
        CheckId::Memory,
        CheckId::NetworkReachability,
        CheckId::PackageLock,
        CheckId::ExistingDesktop,
        CheckId::Gpu,
    ]
    .into_iter()
    .map(|check| {
        Arc::new(PreflightCheck::new(check, probe.clone(), ctx.clone())) as Arc<dyn Operation>
    })
    .collect()
}

/// Vendor needing a proprietary driver, from the request hint or the probe.
pub async fn detect_gpu(hint: Option<GpuVendor>, probe: &dyn SystemProbe) -> Option<GpuVendor> {
    match hint {
        Some(v) => Some(v),
        None => probe.gpu_vendor().await.ok().flatten(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::StaticProbe;

    fn ctx() -> PreflightContext {
        PreflightContext {
            required_disk_bytes: 10 * GIB,
            min_memory_bytes: 2048 * MIB,
            mirror_host: "deb.debian.org".to_string(),
            mirror_port: 80,
        }
    }

    async fn run(check: CheckId, probe: StaticProbe) -> OperationResult {
        PreflightCheck::new(check, Arc::new(probe), Arc::new(ctx()))
            .execute(&CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_disk_message_and_blocking() {
        let probe = StaticProbe {
            disk_bytes: 5 * GIB,
            ..StaticProbe::default()
        };
        let r = run(CheckId::DiskSpace, probe).await;
        assert_eq!(r.status, Status::Fail);
        assert_eq!(r.message, "5GB available, 10GB required");
        assert!(r.is_blocking());
    }

    #[tokio::test]
    async fn test_low_memory_is_warning() {
        let probe = StaticProbe {
            memory_bytes: 1024 * MIB,
            ..StaticProbe::default()
        };
        let r = run(CheckId::Memory, probe).await;
        assert!(r.is_warning());
        assert!(!r.is_blocking());
    }

    #[tokio::test]
    async fn test_unreachable_mirror_is_not_blocking() {
        let probe = StaticProbe {
            reachable: false,
            ..StaticProbe::default()
        };
        let r = run(CheckId::NetworkReachability, probe).await;
        assert_eq!(r.status, Status::Fail);
        assert_eq!(r.severity, Some(Severity::High));
        assert!(!r.is_blocking());
    }

    #[tokio::test]
    async fn test_probe_error_fails_at_check_severity() {
        let probe = StaticProbe {
            fail_os_release: true,
            ..StaticProbe::default()
        };
        let r = run(CheckId::Distribution, probe).await;
        assert!(r.is_blocking());
        assert!(r.error.is_some());
    }

    #[tokio::test]
    async fn test_healthy_host_passes_everything() {
        let probe: Arc<dyn SystemProbe> = Arc::new(StaticProbe::default());
        let cancel = CancellationToken::new();
        for op in validators(probe, ctx()) {
            let r = op.execute(&cancel).await.unwrap();
            assert_eq!(r.status, Status::Pass, "{} did not pass: {}", op.name(), r.message);
            assert_eq!(op.kind(), OperationKind::Validator);
        }
    }

    #[tokio::test]
    async fn test_detect_gpu_prefers_hint() {
        let probe = StaticProbe {
            gpu: Some(GpuVendor::Intel),
            ..StaticProbe::default()
        };
        assert_eq!(detect_gpu(Some(GpuVendor::Nvidia), &probe).await, Some(GpuVendor::Nvidia));
        assert_eq!(detect_gpu(None, &probe).await, Some(GpuVendor::Intel));
    }
}
