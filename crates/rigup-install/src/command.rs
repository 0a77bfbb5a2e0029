//! External command execution with timeouts and dry-run support.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, info};

/// Captured result of one command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub program: String,
    /// Exit code (-1 when killed by a signal)
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub success: bool,
}

impl CommandOutput {
    fn dry_run(program: &str) -> Self {
        Self {
            program: program.to_string(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            success: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Option<Duration>,
    dry_run: bool,
}

impl CommandRunner {
    /// `timeout_secs == 0` disables the timeout.
    pub fn new(timeout_secs: u64, dry_run: bool) -> Self {
        Self {
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run a read-only command. Always executes, even in dry-run mode.
    pub async fn query(&self, program: &str, args: &[&str]) -> anyhow::Result<CommandOutput> {
        self.execute(program, args, &[]).await
    }

    /// Run a command that changes the system. Logged and skipped in dry-run mode.
    pub async fn mutate(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> anyhow::Result<CommandOutput> {
        if self.dry_run {
            info!(program, args = %args.join(" "), "dry run: command not executed");
            return Ok(CommandOutput::dry_run(program));
        }
        self.execute(program, args, env).await
    }

    /// `mutate`, failing on a non-zero exit with stderr in the message.
    pub async fn mutate_checked(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> anyhow::Result<CommandOutput> {
        let output = self.mutate(program, args, env).await?;
        if !output.success {
            anyhow::bail!(
                "{} {} exited with {}: {}",
                program,
                args.join(" "),
                output.exit_code,
                output.stderr.trim()
            );
        }
        Ok(output)
    }

    async fn execute(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> anyhow::Result<CommandOutput> {
        let start = Instant::now();
        debug!(program, args = %args.join(" "), "running command");

        let child = Command::new(program)
            .args(args)
            .envs(env.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to run {}: {}", program, e))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    anyhow::anyhow!("{} timed out after {} seconds", program, limit.as_secs())
                })??,
            None => child.wait_with_output().await?,
        };

        Ok(CommandOutput {
            program: program.to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            success: output.status.success(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_captures_stdout() {
        let runner = CommandRunner::new(10, false);
        let out = runner.query("echo", &["hello"]).await.unwrap();
        assert!(out.success);
        assert_eq!(out.exit_code, 0);
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_failing_command_reports_exit_code() {
        let runner = CommandRunner::new(10, false);
        let out = runner.query("false", &[]).await.unwrap();
        assert!(!out.success);
        assert_ne!(out.exit_code, 0);
        assert!(runner.mutate_checked("false", &[], &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_dry_run_skips_mutations_only() {
        let runner = CommandRunner::new(10, true);
        let out = runner.mutate("false", &[], &[]).await.unwrap();
        assert!(out.success, "dry run must not execute");
        let out = runner.query("false", &[]).await.unwrap();
        assert!(!out.success, "queries still execute");
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let runner = CommandRunner::new(10, false);
        assert!(runner
            .query("rigup-definitely-not-a-program", &[])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_timeout() {
        let runner = CommandRunner::new(1, false);
        let err = runner.query("sleep", &["5"]).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
