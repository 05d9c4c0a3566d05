//! Error taxonomy for the orchestration engine.
//!
//! Step failures, timeouts and cancellation are not errors at this level;
//! they resolve jobs to Failed and are described by `FailureReason`.

use thiserror::Error;

/// Malformed pipeline definition. Fatal: the pipeline never starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Pipeline name cannot be empty")]
    EmptyName,

    #[error("Pipeline '{0}' has no jobs")]
    NoJobs(String),

    #[error("Job {0} has an empty name")]
    EmptyJobName(usize),

    #[error("Duplicate job name '{0}'")]
    DuplicateJob(String),

    #[error("Job '{0}' has no steps")]
    NoSteps(String),

    #[error("Job '{job}': step {index} has an empty name")]
    EmptyStepName { job: String, index: usize },

    #[error("Job '{job}': duplicate step name '{step}'")]
    DuplicateStep { job: String, step: String },

    #[error("Job '{job}' depends on unknown job '{dependency}'")]
    DanglingDependency { job: String, dependency: String },

    #[error("Job '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Dependency cycle between jobs: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Job '{job}': invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        job: String,
        pattern: String,
        reason: String,
    },
}

/// Artifact store failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No record matches the lookup. Not a failure for calling jobs.
    #[error("Artifact '{name}' not found{}", key_suffix(.key))]
    NotFound { name: String, key: Option<String> },

    /// The backing medium could not be read or written
    #[error("Artifact storage unavailable: {0}")]
    StorageUnavailable(String),
}

fn key_suffix(key: &Option<String>) -> String {
    match key {
        Some(k) => format!(" (key '{}')", k),
        None => String::new(),
    }
}

impl StoreError {
    /// Build a NotFound for an exact-key lookup
    pub fn not_found(name: &str, key: Option<&str>) -> Self {
        Self::NotFound {
            name: name.to_string(),
            key: key.map(str::to_string),
        }
    }

    /// Wrap any I/O-ish error as StorageUnavailable
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Notification channel failure. Logged only, never propagated.
#[derive(Debug, Error)]
#[error("Failed to deliver notification via {channel}: {source}")]
pub struct NotificationDeliveryError {
    pub channel: String,
    #[source]
    pub source: anyhow::Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_jobs() {
        let err = ConfigurationError::Cycle(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.to_string(), "Dependency cycle between jobs: a, b");
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(
            StoreError::not_found("baselines", Some("bench-main")).to_string(),
            "Artifact 'baselines' not found (key 'bench-main')"
        );
        assert_eq!(
            StoreError::not_found("baselines", None).to_string(),
            "Artifact 'baselines' not found"
        );
        assert!(StoreError::not_found("x", None).is_not_found());
        assert!(!StoreError::unavailable("disk full").is_not_found());
    }
}
