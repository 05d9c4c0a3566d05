//! Core orchestration logic.
//!
//! This module contains:
//! - Pipeline: Definitions, loading and validation
//! - Graph: Job dependency DAG
//! - Trigger: Job eligibility predicates
//! - Runner: Single-step execution
//! - Executor: Graph scheduling to quiescence
//! - ArtifactStore: Append-only cache with branch fallback
//! - Notifier: Failure notification
//! - EventStore: Append-only run log
//! - Supersede: Cancelling stale runs on feature branches

pub mod artifact_store;
pub mod cancel;
pub mod error;
pub mod event_store;
pub mod executor;
pub mod graph;
pub mod limits;
pub mod notifier;
pub mod pipeline;
pub mod runner;
pub mod supersede;
pub mod trigger;

// Re-export commonly used types
pub use artifact_store::{
    fingerprint_files, render_key, ArtifactStore, FsArtifactStore, MemoryArtifactStore,
};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use error::{ConfigurationError, NotificationDeliveryError, StoreError};
pub use event_store::EventStore;
pub use executor::Executor;
pub use graph::{JobGraph, JobId};
pub use limits::ExecutionLimits;
pub use notifier::{NotificationEvent, Notifier, NotifyCondition, NotifyOutcome};
pub use pipeline::{ArtifactSpec, Job, Pipeline, Step, StepAction};
pub use runner::{StepRunner, WorkingContext};
pub use supersede::{ActiveRuns, CancelWatch};
pub use trigger::{CustomTrigger, Trigger};
