//! benchgate - Benchmark pipeline orchestrator
//!
//! Runs a graph of build and measurement jobs against one revision,
//! restores baselines from earlier runs, and reports failures for the
//! canonical branch.
//!
//! # Architecture
//!
//! - Jobs form a DAG; a single scheduling loop resolves each job to
//!   Succeeded, Failed or Skipped, running independent jobs concurrently
//! - Steps within a job run strictly in order and stop at the first
//!   blocking failure
//! - Artifacts are append-only; a restore that misses its exact key falls
//!   back to the newest record on the canonical branch
//! - Every transition is written to a JSONL run log
//!
//! # Modules
//!
//! - `adapters`: External collaborators (shell executor, notification channels)
//! - `core`: Orchestration logic (Pipeline, Executor, ArtifactStore, Notifier)
//! - `domain`: Data structures (RunContext, JobResult, ArtifactRecord, Event)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a pipeline for a pull request
//! benchgate run benchmark --branch feature/x --event pull-request
//!
//! # Check run status
//! benchgate status <run-id>
//!
//! # Fetch the latest baseline from main
//! benchgate artifacts fetch baselines --out baseline.json
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use self::core::{
    ArtifactStore, CancelHandle, CancelSignal, ConfigurationError, Executor, Job, Notifier,
    Pipeline, Step, StepRunner, Trigger,
};
pub use domain::{
    ArtifactRecord, EventKind, JobResult, JobStatus, PipelineResult, PipelineStatus, RunContext,
};

// External collaborators
pub use adapters::{NotificationChannel, ShellExecutor, StepExecutor};
