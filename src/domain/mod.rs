//! Domain types for the benchgate orchestrator.
//!
//! This module contains the core data structures:
//! - RunContext: Who/what/where a run executes for
//! - Results: Job and pipeline status
//! - Artifact: Records held by the artifact store
//! - Events: Immutable run-log entries
//! - Run: Run state rebuilt from the log

pub mod artifact;
pub mod context;
pub mod events;
pub mod result;
pub mod run;

// Re-export commonly used types
pub use artifact::{payload_digest, ArtifactRecord};
pub use context::{EventKind, RunContext};
pub use events::{Event, EventType};
pub use result::{
    FailureReason, InvalidTransition, JobResult, JobStatus, PipelineResult, PipelineStatus,
    SkipReason, StepOutcome, StepRecord,
};
pub use run::{RunRecord, RunState};
