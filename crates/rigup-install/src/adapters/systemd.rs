//! systemctl backed service management.

use async_trait::async_trait;
use rigup_core::{ServiceManager, ServiceUnit};

use crate::command::CommandRunner;

#[derive(Debug, Clone)]
pub struct SystemdServiceManager {
    runner: CommandRunner,
}

impl SystemdServiceManager {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    fn args<'a>(verb: &'a str, unit: &'a ServiceUnit) -> Vec<&'a str> {
        let mut args = Vec::with_capacity(3);
        if unit.user {
            args.push("--user");
        }
        args.push(verb);
        args.push(unit.name.as_str());
        args
    }

    async fn change(&self, verb: &str, unit: &ServiceUnit) -> anyhow::Result<()> {
        self.runner
            .mutate_checked("systemctl", &Self::args(verb, unit), &[])
            .await?;
        Ok(())
    }

    async fn probe(&self, verb: &str, unit: &ServiceUnit) -> anyhow::Result<bool> {
        let mut args = Self::args(verb, unit);
        args.insert(args.len() - 1, "--quiet");
        Ok(self.runner.query("systemctl", &args).await?.success)
    }
}

#[async_trait]
impl ServiceManager for SystemdServiceManager {
    async fn enable(&self, unit: &ServiceUnit) -> anyhow::Result<()> {
        self.change("enable", unit).await
    }

    async fn disable(&self, unit: &ServiceUnit) -> anyhow::Result<()> {
        self.change("disable", unit).await
    }

    async fn start(&self, unit: &ServiceUnit) -> anyhow::Result<()> {
        self.change("start", unit).await
    }

    async fn stop(&self, unit: &ServiceUnit) -> anyhow::Result<()> {
        self.change("stop", unit).await
    }

    async fn is_enabled(&self, unit: &ServiceUnit) -> anyhow::Result<bool> {
        self.probe("is-enabled", unit).await
    }

    async fn is_active(&self, unit: &ServiceUnit) -> anyhow::Result<bool> {
        self.probe("is-active", unit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_units_get_user_flag() {
        let unit = ServiceUnit::user("pipewire.service");
        assert_eq!(
            SystemdServiceManager::args("enable", &unit),
            vec!["--user", "enable", "pipewire.service"]
        );
        let unit = ServiceUnit::system("greetd.service");
        assert_eq!(
            SystemdServiceManager::args("start", &unit),
            vec!["start", "greetd.service"]
        );
    }
}
