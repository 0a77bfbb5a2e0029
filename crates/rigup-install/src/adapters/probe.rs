//! Host facts gathered from `/etc`, `/proc` and a few read-only commands.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use rigup_core::{GpuVendor, OsRelease, SystemProbe};
use rigup_state::SystemContext;
use tokio::net::TcpStream;
use tracing::debug;

use crate::command::CommandRunner;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const SESSION_DIRS: &[&str] = &["/usr/share/wayland-sessions", "/usr/share/xsessions"];

#[derive(Debug, Clone)]
pub struct HostProbe {
    runner: CommandRunner,
    os_release_path: PathBuf,
    /// Filesystem whose free space is checked
    disk_path: PathBuf,
}

impl HostProbe {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            os_release_path: PathBuf::from("/etc/os-release"),
            disk_path: PathBuf::from("/"),
        }
    }

    pub fn with_os_release_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.os_release_path = path.into();
        self
    }

    async fn first_line(&self, program: &str, args: &[&str]) -> String {
        match self.runner.query(program, args).await {
            Ok(out) if out.success => out.stdout.lines().next().unwrap_or("").trim().to_string(),
            _ => String::new(),
        }
    }
}

pub(crate) fn parse_os_release(text: &str) -> OsRelease {
    let mut release = OsRelease::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
        match key.trim() {
            "ID" => release.id = value.to_ascii_lowercase(),
            "ID_LIKE" => {
                release.id_like = value
                    .split_whitespace()
                    .map(|s| s.to_ascii_lowercase())
                    .collect()
            }
            "VERSION_ID" => release.version_id = Some(value),
            "PRETTY_NAME" => release.pretty_name = value,
            _ => {}
        }
    }
    release
}

/// `df --output=avail -B1` prints a header line then the byte count.
pub(crate) fn parse_df_avail(stdout: &str) -> Option<u64> {
    stdout
        .lines()
        .skip(1)
        .find_map(|l| l.trim().parse::<u64>().ok())
}

/// `MemTotal:` from `/proc/meminfo`, in bytes.
pub(crate) fn parse_meminfo_total(text: &str) -> Option<u64> {
    let line = text.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

/// Vendor of the first display controller in `lspci` output.
pub(crate) fn parse_lspci_gpu(stdout: &str) -> Option<GpuVendor> {
    let line = stdout.lines().find(|l| {
        l.contains("VGA compatible controller")
            || l.contains("3D controller")
            || l.contains("Display controller")
    })?;
    let lower = line.to_ascii_lowercase();
    let vendor = if lower.contains("nvidia") {
        GpuVendor::Nvidia
    } else if lower.contains("amd") || lower.contains("ati ") || lower.contains("radeon") {
        GpuVendor::Amd
    } else if lower.contains("intel") {
        GpuVendor::Intel
    } else {
        GpuVendor::Unknown
    };
    Some(vendor)
}

#[async_trait]
impl SystemProbe for HostProbe {
    async fn os_release(&self) -> anyhow::Result<OsRelease> {
        let text = tokio::fs::read_to_string(&self.os_release_path)
            .await
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", self.os_release_path.display(), e))?;
        Ok(parse_os_release(&text))
    }

    async fn is_privileged(&self) -> anyhow::Result<bool> {
        let uid = self.first_line("id", &["-u"]).await;
        if uid == "0" {
            return Ok(true);
        }
        Ok(self.runner.query("sudo", &["-n", "true"]).await?.success)
    }

    async fn available_disk_bytes(&self) -> anyhow::Result<u64> {
        let path = self.disk_path.to_string_lossy().to_string();
        let out = self
            .runner
            .query("df", &["--output=avail", "-B1", &path])
            .await?;
        parse_df_avail(&out.stdout)
            .ok_or_else(|| anyhow::anyhow!("unexpected df output: {}", out.stdout.trim()))
    }

    async fn total_memory_bytes(&self) -> anyhow::Result<u64> {
        let text = tokio::fs::read_to_string("/proc/meminfo").await?;
        parse_meminfo_total(&text).ok_or_else(|| anyhow::anyhow!("MemTotal missing from /proc/meminfo"))
    }

    async fn can_reach(&self, host: &str, port: u16) -> anyhow::Result<bool> {
        let reachable = matches!(
            tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        );
        debug!(host, port, reachable, "network probe");
        Ok(reachable)
    }

    async fn package_lock_held(&self) -> anyhow::Result<bool> {
        // fuser exits 0 only when some process has the file open
        let out = self
            .runner
            .query("fuser", &["/var/lib/dpkg/lock-frontend", "/var/lib/dpkg/lock"])
            .await?;
        Ok(out.success)
    }

    async fn running_desktop(&self) -> anyhow::Result<Option<String>> {
        if let Ok(current) = std::env::var("XDG_CURRENT_DESKTOP") {
            let current = current.trim().to_string();
            if !current.is_empty() && !current.eq_ignore_ascii_case("sway") {
                return Ok(Some(current));
            }
        }
        for dir in SESSION_DIRS {
            let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
                continue;
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                if let Some(session) = name.strip_suffix(".desktop") {
                    if session != "sway" {
                        return Ok(Some(session.to_string()));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn gpu_vendor(&self) -> anyhow::Result<Option<GpuVendor>> {
        let out = self.runner.query("lspci", &[]).await?;
        if !out.success {
            return Ok(None);
        }
        Ok(parse_lspci_gpu(&out.stdout))
    }

    async fn system_context(&self) -> anyhow::Result<SystemContext> {
        let (hostname, kernel, architecture, release) = futures::join!(
            self.first_line("hostname", &[]),
            self.first_line("uname", &["-r"]),
            self.first_line("uname", &["-m"]),
            self.os_release(),
        );
        Ok(SystemContext {
            hostname,
            distribution: release.map(|r| r.pretty_name).unwrap_or_default(),
            kernel,
            architecture,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_os_release() {
        let text = r#"PRETTY_NAME="Debian GNU/Linux 12 (bookworm)"
NAME="Debian GNU/Linux"
VERSION_ID="12"
ID=debian
"#;
        let r = parse_os_release(text);
        assert_eq!(r.id, "debian");
        assert_eq!(r.version_id.as_deref(), Some("12"));
        assert_eq!(r.pretty_name, "Debian GNU/Linux 12 (bookworm)");
        assert!(r.is_debian_family());

        let ubuntu = parse_os_release("ID=ubuntu\nID_LIKE=debian\n");
        assert!(ubuntu.is_debian_family());
    }

    #[test]
    fn test_parse_df_and_meminfo() {
        assert_eq!(parse_df_avail("   Avail\n53687091200\n"), Some(53_687_091_200));
        assert_eq!(parse_df_avail("Avail\n"), None);
        assert_eq!(
            parse_meminfo_total("MemTotal:        8048576 kB\nMemFree: 1 kB\n"),
            Some(8_048_576 * 1024)
        );
    }

    #[test]
    fn test_parse_lspci_gpu() {
        let nvidia = "01:00.0 VGA compatible controller: NVIDIA Corporation GA104 [GeForce RTX 3070]";
        assert_eq!(parse_lspci_gpu(nvidia), Some(GpuVendor::Nvidia));
        let amd = "03:00.0 VGA compatible controller: Advanced Micro Devices, Inc. [AMD/ATI] Navi 21";
        assert_eq!(parse_lspci_gpu(amd), Some(GpuVendor::Amd));
        let intel = "00:02.0 VGA compatible controller: Intel Corporation UHD Graphics 620";
        assert_eq!(parse_lspci_gpu(intel), Some(GpuVendor::Intel));
        assert_eq!(parse_lspci_gpu("00:1f.3 Audio device: Intel"), None);
    }

    #[tokio::test]
    async fn test_os_release_from_custom_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("os-release");
        std::fs::write(&path, "ID=fedora\n").unwrap();
        let probe = HostProbe::new(CommandRunner::new(5, true)).with_os_release_path(&path);
        assert_eq!(probe.os_release().await.unwrap().id, "fedora");
    }
}
