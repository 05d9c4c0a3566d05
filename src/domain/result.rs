//! Per-job and per-pipeline results.
//!
//! A `JobResult` is mutated only by the executor. Its status moves
//! forward only: Pending -> Running -> {Succeeded | Failed}, or
//! Pending -> Skipped. Cancellation may also take a Pending job straight
//! to Failed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::context::RunContext;

/// Status of a job within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for dependencies or scheduling
    Pending,

    /// Steps are executing
    Running,

    /// Every step succeeded within the timeout
    Succeeded,

    /// A blocking step failed, the job timed out, or the run was cancelled
    Failed,

    /// Not run (trigger false or an upstream job did not succeed)
    Skipped,
}

impl JobStatus {
    /// Whether this status is final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Why a job ended up Failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureReason {
    /// A step without continue-on-error failed
    StepFailed { step: String, error: String },

    /// The job exceeded its allotted duration
    Timeout { limit_seconds: u64 },

    /// The run was cancelled externally
    Cancelled,

    /// The job's task died without reporting (panic)
    Aborted { error: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StepFailed { step, error } => write!(f, "step '{}' failed: {}", step, error),
            Self::Timeout { limit_seconds } => write!(f, "timed out after {}s", limit_seconds),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Aborted { error } => write!(f, "aborted: {}", error),
        }
    }
}

/// Why a job was Skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SkipReason {
    /// The trigger predicate evaluated to false
    TriggerNotMet,

    /// A dependency resolved Failed or Skipped
    UpstreamNotSucceeded { dependency: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TriggerNotMet => f.write_str("trigger not met"),
            Self::UpstreamNotSucceeded { dependency } => {
                write!(f, "dependency '{}' did not succeed", dependency)
            }
        }
    }
}

/// Captured outcome of a single step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Whether the job may proceed past this step. True when the step
    /// succeeded, or failed with continue-on-error set.
    pub success: bool,

    /// Failure message, recorded even when the failure was tolerated
    pub error: Option<String>,

    /// Wall-clock time spent in the step
    pub duration_ms: u64,

    /// Captured output from the collaborator
    pub log: String,
}

impl StepOutcome {
    /// Whether the step failed but the job carried on
    pub fn tolerated_failure(&self) -> bool {
        self.success && self.error.is_some()
    }
}

/// A step outcome tagged with the step's name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub outcome: StepOutcome,
}

/// Rejected status change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transition for job '{job}': {from} -> {to}")]
pub struct InvalidTransition {
    pub job: String,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Terminal (or in-flight) state of one job in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Job name
    pub name: String,

    /// Current status
    pub status: JobStatus,

    /// Set when status is Failed
    pub failure: Option<FailureReason>,

    /// Set when status is Skipped
    pub skip: Option<SkipReason>,

    /// When the job entered Running
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,

    /// Outcomes of the steps that ran, in order
    pub steps: Vec<StepRecord>,
}

impl JobResult {
    /// A fresh, pending result
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: JobStatus::Pending,
            failure: None,
            skip: None,
            started_at: None,
            finished_at: None,
            steps: Vec::new(),
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), InvalidTransition> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Skipped)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        );

        if !allowed {
            return Err(InvalidTransition {
                job: self.name.clone(),
                from: self.status,
                to,
            });
        }

        self.status = to;
        Ok(())
    }

    /// Pending -> Running
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(at);
        Ok(())
    }

    /// Running -> Succeeded
    pub fn succeed(&mut self, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Succeeded)?;
        self.finished_at = Some(at);
        Ok(())
    }

    /// Running -> Failed, or Pending -> Failed for cancellation only
    pub fn fail(&mut self, reason: FailureReason, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if self.status == JobStatus::Pending && reason != FailureReason::Cancelled {
            return Err(InvalidTransition {
                job: self.name.clone(),
                from: self.status,
                to: JobStatus::Failed,
            });
        }
        self.transition(JobStatus::Failed)?;
        self.failure = Some(reason);
        self.finished_at = Some(at);
        Ok(())
    }

    /// Pending -> Skipped
    pub fn skip(&mut self, reason: SkipReason, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Skipped)?;
        self.skip = Some(reason);
        self.finished_at = Some(at);
        Ok(())
    }

    /// Whether the job failed because the run was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self.failure, Some(FailureReason::Cancelled))
    }

    /// Whether the job failed for a reason other than cancellation
    pub fn is_failure(&self) -> bool {
        self.status == JobStatus::Failed && !self.is_cancelled()
    }

    /// Elapsed time between start and finish, if the job ran
    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        Some((finished - started).num_milliseconds().max(0) as u64)
    }
}

/// Overall status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Every non-skipped job succeeded
    Succeeded,

    /// At least one job failed
    Failed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Complete report for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Pipeline name
    pub pipeline: String,

    /// Context the run executed under
    pub context: RunContext,

    /// One result per job, in definition order
    pub jobs: Vec<JobResult>,

    /// Aggregated status
    pub status: PipelineStatus,

    /// When scheduling began
    pub started_at: DateTime<Utc>,

    /// When the graph reached quiescence
    pub finished_at: DateTime<Utc>,
}

impl PipelineResult {
    /// Aggregate job results: Succeeded iff every non-Skipped job Succeeded
    pub fn aggregate(jobs: &[JobResult]) -> PipelineStatus {
        let all_ok = jobs
            .iter()
            .filter(|j| j.status != JobStatus::Skipped)
            .all(|j| j.status == JobStatus::Succeeded);

        if all_ok {
            PipelineStatus::Succeeded
        } else {
            PipelineStatus::Failed
        }
    }

    /// Look up a job's result by name
    pub fn job(&self, name: &str) -> Option<&JobResult> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Whether any job was cancelled
    pub fn was_cancelled(&self) -> bool {
        self.jobs.iter().any(JobResult::is_cancelled)
    }

    /// Whether the pipeline succeeded
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_job_lifecycle() {
        let mut job = JobResult::pending("build");
        let now = Utc::now();

        job.start(now).unwrap();
        assert_eq!(job.status, JobStatus::Running);

        job.succeed(now).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_terminal_status_never_regresses() {
        let mut job = JobResult::pending("build");
        let now = Utc::now();
        job.skip(SkipReason::TriggerNotMet, now).unwrap();

        let err = job.start(now).unwrap_err();
        assert_eq!(err.from, JobStatus::Skipped);
        assert_eq!(err.to, JobStatus::Running);
        assert_eq!(job.status, JobStatus::Skipped);
    }

    #[test]
    fn test_pending_can_only_fail_through_cancellation() {
        let now = Utc::now();

        let mut timed_out = JobResult::pending("bench");
        assert!(timed_out
            .fail(FailureReason::Timeout { limit_seconds: 1 }, now)
            .is_err());
        assert_eq!(timed_out.status, JobStatus::Pending);

        let mut cancelled = JobResult::pending("bench");
        cancelled.fail(FailureReason::Cancelled, now).unwrap();
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_failure());
        assert!(cancelled.started_at.is_none());
    }

    #[test]
    fn test_aggregate_ignores_skipped_jobs() {
        let now = Utc::now();
        let mut ok = JobResult::pending("setup");
        ok.start(now).unwrap();
        ok.succeed(now).unwrap();

        let mut skipped = JobResult::pending("bench");
        skipped.skip(SkipReason::TriggerNotMet, now).unwrap();

        assert_eq!(
            PipelineResult::aggregate(&[ok.clone(), skipped.clone()]),
            PipelineStatus::Succeeded
        );

        let mut failed = JobResult::pending("build");
        failed.start(now).unwrap();
        failed
            .fail(
                FailureReason::StepFailed {
                    step: "compile".to_string(),
                    error: "exit code 1".to_string(),
                },
                now,
            )
            .unwrap();

        assert_eq!(
            PipelineResult::aggregate(&[ok, skipped, failed]),
            PipelineStatus::Failed
        );
    }
}
