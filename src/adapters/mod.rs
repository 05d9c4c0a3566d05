//! Adapter interfaces for external systems.
//!
//! Two seams: `StepExecutor` runs step commands (a shell, a container, a
//! remote runner) and `NotificationChannel` delivers failure messages.
//! The engine only sees the traits.

pub mod dry_run;
pub mod shell;
pub mod telegram;
pub mod webhook;

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::core::cancel::CancelSignal;

// Re-export the built-in adapters
pub use dry_run::DryRunExecutor;
pub use shell::ShellExecutor;
pub use telegram::{TelegramChannel, TelegramConfig};
pub use webhook::WebhookChannel;

/// A fully resolved command for one step
#[derive(Debug, Clone)]
pub struct StepCommand {
    /// Job the step belongs to
    pub job: String,

    /// Step name
    pub step: String,

    /// Command line, interpreted by the executor
    pub command: String,

    /// Directory to run in
    pub working_dir: PathBuf,

    /// Merged environment (pipeline, job, step and run variables)
    pub env: HashMap<String, String>,
}

/// Output from a step executor
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Exit code; None when the process was terminated by a signal or
    /// stopped because of cancellation
    pub exit_code: Option<i32>,

    /// Captured stdout and stderr
    pub log: String,
}

impl ExecOutput {
    /// Successful output with a log
    pub fn ok(log: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            log: log.into(),
        }
    }

    /// Output with an explicit exit code
    pub fn exited(code: i32, log: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            log: log.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs step commands
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Human-readable executor name
    fn name(&self) -> &str;

    /// Run a command to completion. Implementations should stop promptly
    /// once `cancel` fires. `Err` means the command could not be run at
    /// all; a non-zero exit is reported through `ExecOutput`.
    async fn execute(&self, command: &StepCommand, cancel: &CancelSignal) -> Result<ExecOutput>;
}

/// Delivers notification messages
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Send a message
    async fn send(&self, message: &str) -> Result<()>;
}

/// Channel that only writes to the log
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &str) -> Result<()> {
        info!(channel = "log", "{}", message);
        Ok(())
    }
}
