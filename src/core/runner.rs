//! Step runner.
//!
//! Runs a single step and captures its outcome. `run` steps go to the
//! configured `StepExecutor`; `restore` and `save` steps talk to the
//! artifact store. The runner never retries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{StepCommand, StepExecutor};
use crate::domain::{RunContext, StepOutcome};

use super::artifact_store::{fingerprint_files, render_key, ArtifactStore};
use super::cancel::CancelSignal;
use super::pipeline::{ArtifactSpec, Step, StepAction};

/// Everything a step needs to know about where and for whom it runs
#[derive(Debug, Clone)]
pub struct WorkingContext {
    /// The run this step belongs to
    pub run: RunContext,

    /// Name of the enclosing job
    pub job: String,

    /// Base directory; a step's `working_directory` is relative to it
    pub working_dir: PathBuf,

    /// Pipeline, job and run variables (step env is layered on top)
    pub env: HashMap<String, String>,

    /// Run-wide cancellation
    pub cancel: CancelSignal,
}

impl WorkingContext {
    /// Directory a given step runs in
    pub fn step_dir(&self, step: &Step) -> PathBuf {
        match &step.working_directory {
            Some(dir) => self.working_dir.join(dir),
            None => self.working_dir.clone(),
        }
    }
}

/// Failure of a single step attempt
struct StepFailure {
    error: String,
    log: String,
}

impl StepFailure {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            log: String::new(),
        }
    }
}

/// Runs steps against an executor and an artifact store
#[derive(Clone)]
pub struct StepRunner {
    executor: Arc<dyn StepExecutor>,
    store: Arc<dyn ArtifactStore>,
    canonical_branch: String,
}

impl StepRunner {
    /// Create a runner; fallback lookups default to the "main" branch
    pub fn new(executor: Arc<dyn StepExecutor>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            executor,
            store,
            canonical_branch: "main".to_string(),
        }
    }

    /// Branch used for artifact fallback when a spec names none
    pub fn with_canonical_branch(mut self, branch: impl Into<String>) -> Self {
        self.canonical_branch = branch.into();
        self
    }

    pub fn canonical_branch(&self) -> &str {
        &self.canonical_branch
    }

    /// Run one step to its outcome.
    ///
    /// A failed step with `continue_on_error` still reports `success`,
    /// with the error recorded alongside.
    #[instrument(skip_all, fields(job = %ctx.job, step = %step.name))]
    pub async fn run(&self, step: &Step, ctx: &WorkingContext) -> StepOutcome {
        let started = Instant::now();
        let dir = ctx.step_dir(step);

        debug!(action = %step.action.describe(), "Running step");

        let result = match &step.action {
            StepAction::Run(command) => self.run_command(step, command, &dir, ctx).await,
            StepAction::Restore(spec) => self.restore(spec, &dir, ctx).await,
            StepAction::Save(spec) => self.save(spec, &dir, ctx).await,
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(log) => StepOutcome {
                success: true,
                error: None,
                duration_ms,
                log,
            },
            Err(failure) => {
                if step.continue_on_error {
                    warn!(error = %failure.error, "Step failed, continuing (continue_on_error)");
                }
                StepOutcome {
                    success: step.continue_on_error,
                    error: Some(failure.error),
                    duration_ms,
                    log: failure.log,
                }
            }
        }
    }

    async fn run_command(
        &self,
        step: &Step,
        command: &str,
        dir: &Path,
        ctx: &WorkingContext,
    ) -> Result<String, StepFailure> {
        let mut env = ctx.env.clone();
        env.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let invocation = StepCommand {
            job: ctx.job.clone(),
            step: step.name.clone(),
            command: command.to_string(),
            working_dir: dir.to_path_buf(),
            env,
        };

        let output = self
            .executor
            .execute(&invocation, &ctx.cancel)
            .await
            .map_err(|e| StepFailure::new(format!("{:#}", e)))?;

        match output.exit_code {
            Some(0) => Ok(output.log),
            Some(code) => Err(StepFailure {
                error: format!("exit code {}", code),
                log: output.log,
            }),
            None => Err(StepFailure {
                error: "terminated without exit code".to_string(),
                log: output.log,
            }),
        }
    }

    async fn resolve_key(
        &self,
        spec: &ArtifactSpec,
        dir: &Path,
        ctx: &WorkingContext,
    ) -> Result<String, StepFailure> {
        let key = render_key(&spec.key, &ctx.run, &ctx.job);
        if spec.hash_files.is_empty() {
            return Ok(key);
        }

        let base = dir.to_path_buf();
        let patterns = spec.hash_files.clone();
        let fingerprint = tokio::task::spawn_blocking(move || fingerprint_files(&base, &patterns))
            .await
            .map_err(|e| StepFailure::new(format!("Fingerprint task failed: {}", e)))?
            .map_err(|e| StepFailure::new(format!("{:#}", e)))?;

        Ok(format!("{}-{}", key, fingerprint))
    }

    async fn restore(
        &self,
        spec: &ArtifactSpec,
        dir: &Path,
        ctx: &WorkingContext,
    ) -> Result<String, StepFailure> {
        let key = self.resolve_key(spec, dir, ctx).await?;

        let record = match self.store.get(&spec.artifact, &key).await {
            Ok(record) => Some(record),
            Err(e) if e.is_not_found() => {
                let branch = spec
                    .fallback_branch
                    .as_deref()
                    .unwrap_or(&self.canonical_branch);
                debug!(artifact = %spec.artifact, %key, branch, "Exact key missed, trying fallback");

                match self.store.get_latest_fallback(&spec.artifact, branch).await {
                    Ok(record) => Some(record),
                    Err(e) => {
                        info!(artifact = %spec.artifact, error = %e, "No artifact to restore, proceeding without it");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(artifact = %spec.artifact, error = %e, "Artifact store unavailable, proceeding without it");
                None
            }
        };

        let Some(record) = record else {
            return Ok(format!("artifact '{}' not restored (key {})", spec.artifact, key));
        };

        let target = dir.join(&spec.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StepFailure::new(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        fs::write(&target, &record.payload)
            .await
            .map_err(|e| StepFailure::new(format!("Failed to write {}: {}", target.display(), e)))?;

        Ok(format!(
            "restored '{}' key {} from run {} ({} bytes) to {}",
            record.name,
            record.key,
            record.run_id,
            record.size_bytes,
            target.display()
        ))
    }

    async fn save(
        &self,
        spec: &ArtifactSpec,
        dir: &Path,
        ctx: &WorkingContext,
    ) -> Result<String, StepFailure> {
        let key = self.resolve_key(spec, dir, ctx).await?;
        let source = dir.join(&spec.path);

        let payload = fs::read(&source)
            .await
            .map_err(|e| StepFailure::new(format!("Failed to read {}: {}", source.display(), e)))?;

        match self.store.put(&spec.artifact, &key, payload, &ctx.run).await {
            Ok(record) => Ok(format!(
                "saved '{}' key {} ({} bytes, {})",
                record.name, record.key, record.size_bytes, record.digest
            )),
            Err(e) => {
                warn!(artifact = %spec.artifact, error = %e, "Artifact store unavailable, result not saved");
                Ok(format!("artifact '{}' not saved: {}", spec.artifact, e))
            }
        }
    }
}
