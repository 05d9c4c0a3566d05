//! Run state reconstructed from the run log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::RunContext;
use super::events::{Event, EventType};
use super::result::{JobStatus, PipelineStatus};

/// A pipeline run as seen through its event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier
    pub id: Uuid,

    /// Name of the pipeline being executed
    pub pipeline_name: String,

    /// Context recorded at start, if present
    pub context: Option<RunContext>,

    /// Current state of the run
    pub state: RunState,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run completed (if applicable)
    pub completed_at: Option<DateTime<Utc>>,

    /// Last known status of each job
    pub job_statuses: BTreeMap<String, JobStatus>,
}

/// State of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunState {
    /// Jobs still in flight
    Running,

    /// Cancellation requested, jobs winding down
    Cancelling,

    /// Reached quiescence
    Finished { status: PipelineStatus, cancelled: bool },
}

impl RunRecord {
    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first = events.first()?;

        let mut run = Self {
            id: first.run_id,
            pipeline_name: String::new(),
            context: None,
            state: RunState::Running,
            started_at: first.timestamp,
            completed_at: None,
            job_statuses: BTreeMap::new(),
        };

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                self.started_at = event.timestamp;
                if let Some(data) = &event.data {
                    if let Some(name) = data.get("pipeline").and_then(|v| v.as_str()) {
                        self.pipeline_name = name.to_string();
                    }
                    self.context = data
                        .get("context")
                        .and_then(|v| serde_json::from_value(v.clone()).ok());
                }
            }
            EventType::RunCancelled => {
                if self.state == RunState::Running {
                    self.state = RunState::Cancelling;
                }
            }
            EventType::RunCompleted => {
                let status = event
                    .data
                    .as_ref()
                    .and_then(|d| d.get("status"))
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or(PipelineStatus::Failed);
                let cancelled = event
                    .data
                    .as_ref()
                    .and_then(|d| d.get("cancelled"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                self.state = RunState::Finished { status, cancelled };
                self.completed_at = Some(event.timestamp);
            }
            EventType::JobStarted
            | EventType::JobSucceeded
            | EventType::JobFailed
            | EventType::JobSkipped => {
                if let (Some(job), Some(status)) = (&event.job, event.status) {
                    self.job_statuses.insert(job.clone(), status);
                }
            }
            EventType::StepStarted
            | EventType::StepCompleted
            | EventType::StepFailed
            | EventType::NotificationSent
            | EventType::NotificationFailed => {}
        }
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        !matches!(self.state, RunState::Finished { .. })
    }

    /// Short label for listings
    pub fn state_label(&self) -> &'static str {
        match &self.state {
            RunState::Running => "running",
            RunState::Cancelling => "cancelling",
            RunState::Finished { cancelled: true, .. } => "cancelled",
            RunState::Finished {
                status: PipelineStatus::Succeeded,
                ..
            } => "succeeded",
            RunState::Finished { .. } => "failed",
        }
    }
}
