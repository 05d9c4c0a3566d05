//! Dry-run executor: records commands instead of running them.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::{ExecOutput, StepCommand, StepExecutor};
use crate::core::cancel::CancelSignal;

/// Succeeds every step without running anything
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    seen: Mutex<Vec<String>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// "job/step" labels of every command seen, in invocation order
    pub fn invocations(&self) -> Vec<String> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StepExecutor for DryRunExecutor {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn execute(&self, step: &StepCommand, _cancel: &CancelSignal) -> Result<ExecOutput> {
        info!(job = %step.job, step = %step.step, "[dry-run] {}", step.command);

        if let Ok(mut seen) = self.seen.lock() {
            seen.push(format!("{}/{}", step.job, step.step));
        }

        Ok(ExecOutput::ok(format!("[dry-run] {}", step.command)))
    }
}
