//! apt / dpkg backed package management.

use async_trait::async_trait;
use rigup_core::{PackageManager, PackageQuery};
use tracing::{debug, info};

use crate::command::CommandRunner;

const APT_ENV: &[(&str, &str)] = &[("DEBIAN_FRONTEND", "noninteractive")];

#[derive(Debug, Clone)]
pub struct AptPackageManager {
    runner: CommandRunner,
    assume_yes: bool,
}

impl AptPackageManager {
    pub fn new(runner: CommandRunner, assume_yes: bool) -> Self {
        Self { runner, assume_yes }
    }

    fn apt_args<'a>(&self, verb: &'a str, packages: &'a [String]) -> Vec<&'a str> {
        let mut args = vec![verb];
        if self.assume_yes {
            args.push("-y");
        }
        if verb == "install" {
            args.push("--no-install-recommends");
        }
        args.extend(packages.iter().map(String::as_str));
        args
    }

    /// `(status, version)` from dpkg-query, `None` when dpkg has never seen it.
    async fn dpkg_status(&self, package: &str) -> anyhow::Result<Option<(String, String)>> {
        let out = self
            .runner
            .query("dpkg-query", &["-W", "-f", "${Status}|${Version}", package])
            .await?;
        if !out.success {
            return Ok(None);
        }
        Ok(parse_dpkg_status(&out.stdout))
    }
}

/// Parse `install ok installed|1.8.1-2`.
pub(crate) fn parse_dpkg_status(stdout: &str) -> Option<(String, String)> {
    let (status, version) = stdout.trim().split_once('|')?;
    Some((status.trim().to_string(), version.trim().to_string()))
}

/// Pull the `Candidate:` line out of `apt-cache policy` output.
pub(crate) fn parse_candidate(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter_map(|l| l.trim().strip_prefix("Candidate:"))
        .map(str::trim)
        .find(|v| !v.is_empty() && *v != "(none)")
        .map(str::to_string)
}

#[async_trait]
impl PackageManager for AptPackageManager {
    async fn install(&self, packages: &[String]) -> anyhow::Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        info!(packages = %packages.join(" "), "installing packages");
        let args = self.apt_args("install", packages);
        self.runner.mutate_checked("apt-get", &args, APT_ENV).await?;
        Ok(())
    }

    async fn is_installed(&self, package: &str) -> anyhow::Result<bool> {
        Ok(self.installed_version(package).await?.is_some())
    }

    async fn remove(&self, packages: &[String]) -> anyhow::Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        info!(packages = %packages.join(" "), "removing packages");
        let args = self.apt_args("remove", packages);
        self.runner.mutate_checked("apt-get", &args, APT_ENV).await?;
        Ok(())
    }
}

#[async_trait]
impl PackageQuery for AptPackageManager {
    async fn installed_version(&self, package: &str) -> anyhow::Result<Option<String>> {
        let status = self.dpkg_status(package).await?;
        debug!(package, ?status, "dpkg status");
        Ok(status
            .filter(|(s, v)| s.ends_with("installed") && !s.contains("not-installed") && !v.is_empty())
            .map(|(_, v)| v))
    }

    async fn candidate_version(&self, package: &str) -> anyhow::Result<Option<String>> {
        let out = self.runner.query("apt-cache", &["policy", package]).await?;
        if !out.success {
            return Ok(None);
        }
        Ok(parse_candidate(&out.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dpkg_status() {
        assert_eq!(
            parse_dpkg_status("install ok installed|1.8.1-2\n"),
            Some(("install ok installed".to_string(), "1.8.1-2".to_string()))
        );
        assert_eq!(parse_dpkg_status(""), None);
    }

    #[test]
    fn test_parse_candidate() {
        let policy = "sway:\n  Installed: (none)\n  Candidate: 1.8.1-2\n  Version table:\n";
        assert_eq!(parse_candidate(policy), Some("1.8.1-2".to_string()));
        assert_eq!(parse_candidate("x:\n  Candidate: (none)\n"), None);
    }

    #[test]
    fn test_apt_args() {
        let apt = AptPackageManager::new(CommandRunner::new(0, true), true);
        let pkgs = vec!["sway".to_string(), "foot".to_string()];
        assert_eq!(
            apt.apt_args("install", &pkgs),
            vec!["install", "-y", "--no-install-recommends", "sway", "foot"]
        );
        assert_eq!(apt.apt_args("remove", &pkgs), vec!["remove", "-y", "sway", "foot"]);
    }

    #[tokio::test]
    async fn test_dry_run_install_runs_nothing() {
        let apt = AptPackageManager::new(CommandRunner::new(0, true), true);
        apt.install(&["sway".to_string()]).await.unwrap();
        apt.install(&[]).await.unwrap();
    }
}
