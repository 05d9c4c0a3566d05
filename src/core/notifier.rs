//! Failure notification.
//!
//! After a run reaches quiescence the notifier inspects the job results
//! once, decides whether anyone should hear about it, and hands a
//! message to a `NotificationChannel`. Delivery problems are logged and
//! reported back, never raised.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::NotificationChannel;
use crate::domain::{EventKind, JobResult, PipelineResult, PipelineStatus, RunContext};

use super::error::NotificationDeliveryError;

/// When a run should produce a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyCondition {
    /// A job failed on the canonical branch
    #[default]
    CanonicalBranchFailure,

    /// A job failed on any branch
    AnyFailure,

    /// Every run, whatever the outcome
    Always,

    /// Never notify
    Never,
}

/// What gets reported to the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub pipeline: String,
    pub run_id: Uuid,
    pub branch: String,
    pub event_kind: EventKind,
    /// Jobs that failed for reasons other than cancellation
    pub failed_jobs: Vec<String>,
    pub status: PipelineStatus,
}

impl NotificationEvent {
    /// Plain-text message for the channel
    pub fn message(&self) -> String {
        match self.status {
            PipelineStatus::Failed if !self.failed_jobs.is_empty() => format!(
                "Pipeline '{}' failed on {} ({}, run {}): {}",
                self.pipeline,
                self.branch,
                self.event_kind,
                self.run_id,
                self.failed_jobs.join(", ")
            ),
            status => format!(
                "Pipeline '{}' {} on {} ({}, run {})",
                self.pipeline, status, self.branch, self.event_kind, self.run_id
            ),
        }
    }
}

/// Result of a notify attempt
#[derive(Debug)]
pub enum NotifyOutcome {
    /// The condition did not hold
    NotFired,

    /// Message handed to the channel
    Delivered(NotificationEvent),

    /// Condition held but delivery failed
    DeliveryFailed(NotificationEvent, NotificationDeliveryError),
}

impl NotifyOutcome {
    pub fn fired(&self) -> bool {
        !matches!(self, Self::NotFired)
    }
}

/// Evaluates the notify condition and delivers through a channel
pub struct Notifier {
    condition: NotifyCondition,
    canonical_branch: String,
    channel: Arc<dyn NotificationChannel>,
}

impl Notifier {
    /// Create a notifier with the default condition (canonical branch failure on "main")
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self {
            condition: NotifyCondition::default(),
            canonical_branch: "main".to_string(),
            channel,
        }
    }

    pub fn with_condition(mut self, condition: NotifyCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_canonical_branch(mut self, branch: impl Into<String>) -> Self {
        self.canonical_branch = branch.into();
        self
    }

    pub fn condition(&self) -> NotifyCondition {
        self.condition
    }

    /// Decide whether these results warrant a notification. Pure.
    pub fn evaluate(
        &self,
        pipeline: &str,
        jobs: &[JobResult],
        ctx: &RunContext,
    ) -> Option<NotificationEvent> {
        let failed_jobs: Vec<String> = jobs
            .iter()
            .filter(|j| j.is_failure())
            .map(|j| j.name.clone())
            .collect();

        let fire = match self.condition {
            NotifyCondition::CanonicalBranchFailure => {
                !failed_jobs.is_empty() && ctx.is_branch(&self.canonical_branch)
            }
            NotifyCondition::AnyFailure => !failed_jobs.is_empty(),
            NotifyCondition::Always => true,
            NotifyCondition::Never => false,
        };

        fire.then(|| NotificationEvent {
            pipeline: pipeline.to_string(),
            run_id: ctx.run_id,
            branch: ctx.branch.clone(),
            event_kind: ctx.event_kind,
            failed_jobs,
            status: PipelineResult::aggregate(jobs),
        })
    }

    /// Evaluate once and deliver if the condition holds
    #[instrument(skip_all, fields(pipeline = %result.pipeline, run_id = %result.context.run_id))]
    pub async fn notify(&self, result: &PipelineResult) -> NotifyOutcome {
        let Some(event) = self.evaluate(&result.pipeline, &result.jobs, &result.context) else {
            return NotifyOutcome::NotFired;
        };

        match self.channel.send(&event.message()).await {
            Ok(()) => {
                info!(channel = self.channel.name(), "Notification sent");
                NotifyOutcome::Delivered(event)
            }
            Err(source) => {
                let err = NotificationDeliveryError {
                    channel: self.channel.name().to_string(),
                    source,
                };
                warn!(error = %err, "Notification delivery failed");
                NotifyOutcome::DeliveryFailed(event, err)
            }
        }
    }
}
