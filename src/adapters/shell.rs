//! Shell step executor.
//!
//! Runs each step command through the platform shell (`sh -c` or
//! `cmd /C`) as a child process. The child is killed when the run is
//! cancelled or when the job's timeout drops the step future.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{ExecOutput, StepCommand, StepExecutor};
use crate::core::cancel::CancelSignal;

/// Executes steps as shell commands
pub struct ShellExecutor {
    /// Shell binary (default: "sh", or "cmd" on Windows)
    shell: String,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellExecutor {
    /// Create an executor using the platform shell
    pub fn new() -> Self {
        let shell = if cfg!(windows) { "cmd" } else { "sh" };
        Self {
            shell: shell.to_string(),
        }
    }

    /// Create an executor with a custom shell binary (must accept `-c`)
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }

    fn command(&self, step: &StepCommand) -> Command {
        let mut cmd = Command::new(&self.shell);
        if cfg!(windows) && self.shell == "cmd" {
            cmd.args(["/C", &step.command]);
        } else {
            cmd.args(["-c", &step.command]);
        }

        cmd.current_dir(&step.working_dir)
            .envs(&step.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    async fn execute(&self, step: &StepCommand, cancel: &CancelSignal) -> Result<ExecOutput> {
        let child = self
            .command(step)
            .spawn()
            .with_context(|| format!("Failed to spawn shell for step '{}'", step.step))?;

        debug!(job = %step.job, step = %step.step, pid = ?child.id(), "Spawned step process");

        tokio::select! {
            output = child.wait_with_output() => {
                let output = output
                    .with_context(|| format!("Failed to wait for step '{}'", step.step))?;

                let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    if !log.is_empty() && !log.ends_with('\n') {
                        log.push('\n');
                    }
                    log.push_str(&stderr);
                }

                Ok(ExecOutput {
                    exit_code: output.status.code(),
                    log,
                })
            }
            _ = cancel.cancelled() => {
                // Dropping the wait future kills the child (kill_on_drop)
                debug!(job = %step.job, step = %step.step, "Step process killed on cancellation");
                Ok(ExecOutput {
                    exit_code: None,
                    log: "cancelled".to_string(),
                })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::cancel::cancel_pair;
    use std::collections::HashMap;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn step(command: &str, dir: &TempDir) -> StepCommand {
        StepCommand {
            job: "build".to_string(),
            step: "compile".to_string(),
            command: command.to_string(),
            working_dir: dir.path().to_path_buf(),
            env: HashMap::from([("BENCH_NAME".to_string(), "parse".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_captures_output_and_env() {
        let dir = TempDir::new().unwrap();
        let executor = ShellExecutor::new();

        let out = executor
            .execute(&step("echo running $BENCH_NAME", &dir), &CancelSignal::never())
            .await
            .unwrap();

        assert!(out.success());
        assert_eq!(out.log.trim(), "running parse");
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let dir = TempDir::new().unwrap();
        let out = ShellExecutor::new()
            .execute(&step("echo boom >&2; exit 3", &dir), &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(out.exit_code, Some(3));
        assert!(out.log.contains("boom"));
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = TempDir::new().unwrap();
        ShellExecutor::new()
            .execute(&step("echo hi > marker.txt", &dir), &CancelSignal::never())
            .await
            .unwrap();

        assert!(dir.path().join("marker.txt").exists());
    }

    #[tokio::test]
    async fn test_cancel_stops_process() {
        let dir = TempDir::new().unwrap();
        let (handle, signal) = cancel_pair();

        let started = Instant::now();
        let task = tokio::spawn(async move {
            ShellExecutor::new().execute(&step("sleep 30", &dir), &signal).await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();

        let out = task.await.unwrap().unwrap();
        assert_eq!(out.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_shell_is_error() {
        let dir = TempDir::new().unwrap();
        let result = ShellExecutor::with_shell("/nonexistent/shell")
            .execute(&step("true", &dir), &CancelSignal::never())
            .await;

        assert!(result.is_err());
    }
}
