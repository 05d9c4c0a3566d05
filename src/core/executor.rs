//! Pipeline graph executor.
//!
//! A single scheduling loop owns every `JobResult` and is the only place
//! statuses change. Job bodies run as tokio tasks and report back through
//! a `JoinSet`; the loop wakes whenever a job finishes or cancellation is
//! requested, resolves whatever became ready, and exits once the graph is
//! quiescent (every job terminal, nothing in flight).

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    Event, EventType, FailureReason, JobResult, JobStatus, PipelineResult, RunContext, SkipReason,
    StepRecord,
};

use super::cancel::CancelSignal;
use super::error::ConfigurationError;
use super::event_store::EventStore;
use super::graph::{JobGraph, JobId};
use super::notifier::{Notifier, NotifyOutcome};
use super::pipeline::{Job, Pipeline};
use super::runner::{StepRunner, WorkingContext};

/// How a job body ended
#[derive(Debug)]
enum JobEnd {
    Succeeded,
    StepFailed { step: String, error: String },
    TimedOut,
    Cancelled,
}

/// What a job task reports back to the scheduling loop
struct JobReport {
    steps: Vec<StepRecord>,
    end: JobEnd,
}

/// Runs pipelines
pub struct Executor {
    runner: StepRunner,
    working_dir: PathBuf,
    events: Option<Arc<EventStore>>,
    notifier: Option<Arc<Notifier>>,
}

impl Executor {
    /// Create an executor running steps in the current directory
    pub fn new(runner: StepRunner) -> Self {
        Self {
            runner,
            working_dir: PathBuf::from("."),
            events: None,
            notifier: None,
        }
    }

    /// Base directory for steps
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Record run events to a log
    pub fn with_event_store(mut self, store: Arc<EventStore>) -> Self {
        self.events = Some(store);
        self
    }

    /// Notify once the run is quiescent
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    /// Execute a pipeline to quiescence.
    ///
    /// Only a malformed definition is an error; every job failure,
    /// timeout and cancellation is reported in the result.
    #[instrument(skip_all, fields(pipeline = %pipeline.name, run_id = %ctx.run_id, branch = %ctx.branch))]
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        ctx: RunContext,
        cancel: CancelSignal,
    ) -> Result<PipelineResult, ConfigurationError> {
        let graph = pipeline.validate()?;
        let started_at = Utc::now();

        info!(jobs = graph.len(), event = %ctx.event_kind, "Starting pipeline");
        log_event(
            self.events.as_deref(),
            Event::new(ctx.run_id, EventType::RunStarted, format!("Pipeline '{}' started", pipeline.name))
                .with_data(serde_json::json!({ "pipeline": pipeline.name, "context": ctx })),
        )
        .await;

        let mut run = RunProgress {
            results: pipeline.jobs.iter().map(|j| JobResult::pending(&j.name)).collect(),
            triggers: vec![None; pipeline.jobs.len()],
            tasks: JoinSet::new(),
        };
        let mut cancelled = false;

        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                self.cancel_pending(&mut run, &ctx).await;
            }

            if !cancelled {
                self.schedule(pipeline, &graph, &ctx, &cancel, &mut run).await;
            }

            if run.tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = run.tasks.join_next() => {
                    if let Some(joined) = joined {
                        match joined {
                            Ok((id, report)) => self.finish_job(pipeline, id, report, &ctx, &mut run).await,
                            Err(e) => error!(error = %e, "Job supervisor task failed"),
                        }
                    }
                }
                _ = cancel.cancelled(), if !cancelled => {}
            }
        }

        let jobs = run.results;
        let status = PipelineResult::aggregate(&jobs);
        let result = PipelineResult {
            pipeline: pipeline.name.clone(),
            context: ctx,
            jobs,
            status,
            started_at,
            finished_at: Utc::now(),
        };

        info!(%status, cancelled = result.was_cancelled(), "Pipeline finished");
        log_event(
            self.events.as_deref(),
            Event::new(
                result.context.run_id,
                EventType::RunCompleted,
                format!("Pipeline '{}' {}", result.pipeline, status),
            )
            .with_duration((result.finished_at - result.started_at).num_milliseconds().max(0) as u64)
            .with_data(serde_json::json!({ "status": status, "cancelled": result.was_cancelled() })),
        )
        .await;

        if let Some(notifier) = &self.notifier {
            self.deliver(notifier, &result).await;
        }

        Ok(result)
    }

    /// Resolve every Pending job whose dependencies are all terminal,
    /// in topological order, and start those that should run.
    async fn schedule(
        &self,
        pipeline: &Pipeline,
        graph: &JobGraph,
        ctx: &RunContext,
        cancel: &CancelSignal,
        run: &mut RunProgress,
    ) {
        for &id in graph.topological_order() {
            if run.results[id.0].status != JobStatus::Pending {
                continue;
            }

            let deps = graph.dependencies(id);
            if !deps.iter().all(|d| run.results[d.0].status.is_terminal()) {
                continue;
            }

            // Upstream failure short-circuits before the trigger is consulted
            if let Some(dep) = deps
                .iter()
                .find(|d| run.results[d.0].status != JobStatus::Succeeded)
            {
                let reason = SkipReason::UpstreamNotSucceeded {
                    dependency: graph.name(*dep).to_string(),
                };
                self.skip_job(id, reason, ctx, run).await;
                continue;
            }

            let job = &pipeline.jobs[id.0];
            let eligible = *run.triggers[id.0].get_or_insert_with(|| job.trigger.evaluate(ctx));
            if !eligible {
                self.skip_job(id, SkipReason::TriggerNotMet, ctx, run).await;
                continue;
            }

            if !pipeline.limits.has_capacity(run.tasks.len()) {
                debug!(job = %job.name, "Parallelism cap reached, job stays pending");
                continue;
            }

            self.start_job(pipeline, id, job, ctx, cancel, run).await;
        }
    }

    async fn start_job(
        &self,
        pipeline: &Pipeline,
        id: JobId,
        job: &Job,
        ctx: &RunContext,
        cancel: &CancelSignal,
        run: &mut RunProgress,
    ) {
        if let Err(e) = run.results[id.0].start(Utc::now()) {
            error!(error = %e, "Refusing to start job");
            return;
        }

        info!(job = %job.name, "Job started");
        log_event(
            self.events.as_deref(),
            Event::new(ctx.run_id, EventType::JobStarted, format!("Job '{}' started", job.name))
                .for_job(&job.name, JobStatus::Running),
        )
        .await;

        let wctx = WorkingContext {
            run: ctx.clone(),
            job: job.name.clone(),
            working_dir: self.working_dir.clone(),
            env: job_env(pipeline, job, ctx),
            cancel: cancel.clone(),
        };
        let timeout = job.timeout(&pipeline.limits);
        let grace = pipeline.limits.cancel_grace();
        let runner = self.runner.clone();
        let events = self.events.clone();
        let job = job.clone();

        run.tasks.spawn(async move {
            // The body runs in its own task so a panic is attributable to this job
            let body = tokio::spawn(run_job(runner, job, wctx, timeout, grace, events));
            let report = body.await.map_err(|e| {
                if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                }
            });
            (id, report)
        });
    }

    async fn finish_job(
        &self,
        pipeline: &Pipeline,
        id: JobId,
        report: Result<JobReport, String>,
        ctx: &RunContext,
        run: &mut RunProgress,
    ) {
        let now = Utc::now();
        let job = &pipeline.jobs[id.0];
        let result = &mut run.results[id.0];

        let transition = match report {
            Ok(report) => {
                result.steps = report.steps;
                match report.end {
                    JobEnd::Succeeded => result.succeed(now),
                    JobEnd::StepFailed { step, error } => {
                        result.fail(FailureReason::StepFailed { step, error }, now)
                    }
                    JobEnd::TimedOut => result.fail(
                        FailureReason::Timeout {
                            limit_seconds: job.timeout(&pipeline.limits).as_secs(),
                        },
                        now,
                    ),
                    JobEnd::Cancelled => result.fail(FailureReason::Cancelled, now),
                }
            }
            Err(error) => result.fail(FailureReason::Aborted { error }, now),
        };

        if let Err(e) = transition {
            error!(error = %e, "Job result rejected");
            return;
        }

        let event = match (&result.status, &result.failure) {
            (JobStatus::Succeeded, _) => {
                info!(job = %job.name, duration_ms = ?result.duration_ms(), "Job succeeded");
                Event::new(ctx.run_id, EventType::JobSucceeded, format!("Job '{}' succeeded", job.name))
            }
            (_, Some(reason)) => {
                warn!(job = %job.name, %reason, "Job failed");
                Event::new(ctx.run_id, EventType::JobFailed, format!("Job '{}' failed", job.name))
                    .with_error(reason.to_string())
            }
            (_, None) => {
                Event::new(ctx.run_id, EventType::JobFailed, format!("Job '{}' failed", job.name))
            }
        };

        let mut event = event.for_job(&job.name, result.status);
        if let Some(ms) = result.duration_ms() {
            event = event.with_duration(ms);
        }
        log_event(self.events.as_deref(), event).await;
    }

    async fn skip_job(&self, id: JobId, reason: SkipReason, ctx: &RunContext, run: &mut RunProgress) {
        let result = &mut run.results[id.0];
        let summary = format!("Job '{}' skipped: {}", result.name, reason);

        if let Err(e) = result.skip(reason, Utc::now()) {
            error!(error = %e, "Refusing to skip job");
            return;
        }

        info!(job = %result.name, reason = ?result.skip, "Job skipped");
        log_event(
            self.events.as_deref(),
            Event::new(ctx.run_id, EventType::JobSkipped, summary).for_job(&result.name, JobStatus::Skipped),
        )
        .await;
    }

    /// Pending jobs never start once the run is cancelled
    async fn cancel_pending(&self, run: &mut RunProgress, ctx: &RunContext) {
        warn!(in_flight = run.tasks.len(), "Cancellation requested");
        log_event(
            self.events.as_deref(),
            Event::new(ctx.run_id, EventType::RunCancelled, "Cancellation requested"),
        )
        .await;

        let now = Utc::now();
        for result in run.results.iter_mut().filter(|r| r.status == JobStatus::Pending) {
            if let Err(e) = result.fail(FailureReason::Cancelled, now) {
                error!(error = %e, "Failed to cancel pending job");
                continue;
            }
            log_event(
                self.events.as_deref(),
                Event::new(ctx.run_id, EventType::JobFailed, format!("Job '{}' cancelled", result.name))
                    .for_job(&result.name, JobStatus::Failed)
                    .with_error(FailureReason::Cancelled.to_string()),
            )
            .await;
        }
    }

    async fn deliver(&self, notifier: &Notifier, result: &PipelineResult) {
        let run_id = result.context.run_id;
        let event = match notifier.notify(result).await {
            NotifyOutcome::NotFired => return,
            NotifyOutcome::Delivered(n) => {
                Event::new(run_id, EventType::NotificationSent, n.message())
            }
            NotifyOutcome::DeliveryFailed(n, e) => {
                Event::new(run_id, EventType::NotificationFailed, n.message()).with_error(e.to_string())
            }
        };
        log_event(self.events.as_deref(), event).await;
    }
}

/// Mutable state of one run, owned by the scheduling loop
struct RunProgress {
    results: Vec<JobResult>,
    /// Memoised trigger outcomes; each trigger is evaluated at most once
    triggers: Vec<Option<bool>>,
    tasks: JoinSet<(JobId, Result<JobReport, String>)>,
}

/// Environment for every step of a job (step env is layered on by the runner)
fn job_env(pipeline: &Pipeline, job: &Job, ctx: &RunContext) -> HashMap<String, String> {
    let mut env = pipeline.env.clone();
    env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env.insert("BENCHGATE_RUN_ID".to_string(), ctx.run_id.to_string());
    env.insert("BENCHGATE_BRANCH".to_string(), ctx.branch.clone());
    env.insert("BENCHGATE_EVENT".to_string(), ctx.event_kind.as_str().to_string());
    env.insert("BENCHGATE_JOB".to_string(), job.name.clone());
    env
}

/// Run a job's steps, racing them against the timeout and cancellation
async fn run_job(
    runner: StepRunner,
    job: Job,
    ctx: WorkingContext,
    timeout: Duration,
    grace: Duration,
    events: Option<Arc<EventStore>>,
) -> JobReport {
    let mut steps = Vec::with_capacity(job.steps.len());

    let end = {
        let body = run_steps(&runner, &job, &ctx, events.as_deref(), &mut steps);
        tokio::pin!(body);

        tokio::select! {
            end = &mut body => match end {
                // A step that failed because it was interrupted counts as cancelled
                JobEnd::StepFailed { .. } if ctx.cancel.is_cancelled() => JobEnd::Cancelled,
                end => end,
            },
            _ = tokio::time::sleep(timeout) => {
                warn!(job = %job.name, limit = ?timeout, "Job timed out");
                JobEnd::TimedOut
            }
            _ = ctx.cancel.cancelled() => {
                if tokio::time::timeout(grace, &mut body).await.is_err() {
                    warn!(job = %job.name, grace = ?grace, "Job did not stop within the cancellation grace period");
                }
                JobEnd::Cancelled
            }
        }
    };

    JobReport { steps, end }
}

/// Steps strictly in order; stops at the first blocking failure
async fn run_steps(
    runner: &StepRunner,
    job: &Job,
    ctx: &WorkingContext,
    events: Option<&EventStore>,
    records: &mut Vec<StepRecord>,
) -> JobEnd {
    let run_id = ctx.run.run_id;

    for step in &job.steps {
        if ctx.cancel.is_cancelled() {
            return JobEnd::Cancelled;
        }

        log_event(
            events,
            Event::new(run_id, EventType::StepStarted, format!("Step '{}' started", step.name))
                .for_step(&job.name, &step.name),
        )
        .await;

        let outcome = runner.run(step, ctx).await;

        let event = if outcome.success {
            Event::new(run_id, EventType::StepCompleted, format!("Step '{}' completed", step.name))
        } else {
            Event::new(run_id, EventType::StepFailed, format!("Step '{}' failed", step.name))
        };
        let mut event = event
            .for_step(&job.name, &step.name)
            .with_duration(outcome.duration_ms);
        if let Some(error) = &outcome.error {
            event = event.with_error(error.clone());
        }
        log_event(events, event).await;

        let failed = !outcome.success;
        let error = outcome.error.clone().unwrap_or_default();
        records.push(StepRecord {
            name: step.name.clone(),
            outcome,
        });

        if failed {
            return JobEnd::StepFailed {
                step: step.name.clone(),
                error,
            };
        }
    }

    JobEnd::Succeeded
}

/// Run-log writes never fail the pipeline
async fn log_event(store: Option<&EventStore>, event: Event) {
    if let Some(store) = store {
        if let Err(e) = store.append(&event).await {
            warn!(error = %e, "Failed to write run log");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("job panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("job panicked: {}", s)
    } else {
        "job panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::DryRunExecutor;
    use crate::core::artifact_store::MemoryArtifactStore;
    use crate::core::pipeline::Step;
    use crate::core::trigger::Trigger;
    use crate::domain::EventKind;

    fn executor() -> Executor {
        Executor::new(StepRunner::new(
            Arc::new(DryRunExecutor::new()),
            Arc::new(MemoryArtifactStore::new()),
        ))
    }

    #[test]
    fn test_job_env_layers() {
        let mut pipeline = Pipeline::new("p");
        pipeline.env.insert("A".to_string(), "pipeline".to_string());
        pipeline.env.insert("B".to_string(), "pipeline".to_string());
        let mut job = Job::new("bench");
        job.env.insert("B".to_string(), "job".to_string());

        let ctx = RunContext::generate(EventKind::PullRequest, "dev");
        let env = job_env(&pipeline, &job, &ctx);

        assert_eq!(env["A"], "pipeline");
        assert_eq!(env["B"], "job");
        assert_eq!(env["BENCHGATE_BRANCH"], "dev");
        assert_eq!(env["BENCHGATE_EVENT"], "pull_request");
        assert_eq!(env["BENCHGATE_JOB"], "bench");
        assert_eq!(env["BENCHGATE_RUN_ID"], ctx.run_id.to_string());
    }

    #[tokio::test]
    async fn test_invalid_pipeline_never_starts() {
        let pipeline = Pipeline::new("p").job(Job::new("a").needs("ghost").step(Step::run("x", "true")));

        let err = executor()
            .execute(&pipeline, RunContext::generate(EventKind::Push, "main"), CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::DanglingDependency { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_pipeline() {
        let pipeline = Pipeline::new("p")
            .job(Job::new("setup").step(Step::run("toolchain", "rustup show")))
            .job(
                Job::new("bench")
                    .needs("setup")
                    .trigger(Trigger::NotBranch(vec!["main".to_string()]))
                    .step(Step::run("run", "cargo bench")),
            );

        let result = executor()
            .execute(&pipeline, RunContext::generate(EventKind::Push, "main"), CancelSignal::never())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.job("setup").unwrap().status, JobStatus::Succeeded);
        assert_eq!(result.job("bench").unwrap().skip, Some(SkipReason::TriggerNotMet));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "job panicked: boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "job panicked: bang");
        assert_eq!(panic_message(Box::new(7u8)), "job panicked");
    }
}
