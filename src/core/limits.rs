//! Execution limits for pipeline runs.
//!
//! Bounds how long jobs may run, how long cancelled jobs get to wind
//! down, and how many jobs run at once.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Execution limits for a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Per-job timeout in seconds (default: 3600 = 1 hour)
    #[serde(default = "default_job_timeout")]
    pub job_timeout_seconds: u64,

    /// Time a cancelled job gets to acknowledge before it is marked
    /// Failed regardless (default: 5000 ms)
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_ms: u64,

    /// Maximum jobs running at once (0 = unlimited)
    #[serde(default)]
    pub max_parallel_jobs: usize,
}

fn default_job_timeout() -> u64 {
    3600
} // 1 hour
fn default_cancel_grace() -> u64 {
    5000
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            job_timeout_seconds: default_job_timeout(),
            cancel_grace_ms: default_cancel_grace(),
            max_parallel_jobs: 0,
        }
    }
}

impl ExecutionLimits {
    /// Grace period after cancellation
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Whether another job may start given how many are running
    pub fn has_capacity(&self, running: usize) -> bool {
        self.max_parallel_jobs == 0 || running < self.max_parallel_jobs
    }
}
