//! Event types for the run log.
//!
//! Every job and step transition is recorded as an immutable event in an
//! append-only log, so a run can be inspected after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::JobStatus;

/// A single event in the append-only run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Job name (if applicable)
    pub job: Option<String>,

    /// Step name (if applicable)
    pub step: Option<String>,

    /// Type of event
    pub event_type: EventType,

    /// Human-readable summary (NO secrets)
    pub summary: String,

    /// Job status after this event (job-level events only)
    pub status: Option<JobStatus>,

    /// Time taken in milliseconds (for finished steps/jobs)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,

    /// Structured details (depends on event type)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    /// Create a new run-level event with the current timestamp
    pub fn new(run_id: Uuid, event_type: EventType, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            job: None,
            step: None,
            event_type,
            summary: summary.into(),
            status: None,
            duration_ms: None,
            error: None,
            data: None,
        }
    }

    /// Attach the job this event concerns, with its status
    pub fn for_job(mut self, job: impl Into<String>, status: JobStatus) -> Self {
        self.job = Some(job.into());
        self.status = Some(status);
        self
    }

    /// Attach the step this event concerns
    pub fn for_step(mut self, job: impl Into<String>, step: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self.step = Some(step.into());
        self
    }

    /// Add duration information
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Add error information
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Add structured details
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Scheduling began
    RunStarted,

    /// All jobs reached a terminal status
    RunCompleted,

    /// Cancellation was requested
    RunCancelled,

    /// A job entered Running
    JobStarted,

    /// A job succeeded
    JobSucceeded,

    /// A job failed (step failure, timeout, cancellation)
    JobFailed,

    /// A job was skipped
    JobSkipped,

    /// A step began
    StepStarted,

    /// A step finished successfully (or its failure was tolerated)
    StepCompleted,

    /// A step failed and stopped its job
    StepFailed,

    /// A notification was delivered
    NotificationSent,

    /// A notification could not be delivered
    NotificationFailed,
}
