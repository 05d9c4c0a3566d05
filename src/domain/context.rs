//! Run context supplied by the invoking environment.
//!
//! Created once when a pipeline is invoked and read-only thereafter.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of event started the pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Commits pushed to a branch
    Push,

    /// Pull request opened or updated
    PullRequest,

    /// Manually dispatched run
    Manual,
}

impl EventKind {
    /// Stable lowercase name, as used in key templates and env vars
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::PullRequest => "pull_request",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of a single pipeline invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// Event that triggered this run
    pub event_kind: EventKind,

    /// Branch the run executes against
    pub branch: String,

    /// Unique identifier for this run
    pub run_id: Uuid,
}

impl RunContext {
    /// Create a new run context
    pub fn new(event_kind: EventKind, branch: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            event_kind,
            branch: branch.into(),
            run_id,
        }
    }

    /// Create a run context with a freshly generated run id
    pub fn generate(event_kind: EventKind, branch: impl Into<String>) -> Self {
        Self::new(event_kind, branch, Uuid::new_v4())
    }

    /// Whether this run targets the given branch
    pub fn is_branch(&self, branch: &str) -> bool {
        self.branch == branch
    }
}
