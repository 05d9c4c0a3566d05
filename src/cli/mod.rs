//! Command-line interface for benchgate.
//!
//! Provides commands for running and validating pipelines, inspecting
//! past runs, cancelling runs, and browsing the artifact store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{
    DryRunExecutor, LogChannel, NotificationChannel, ShellExecutor, StepExecutor, TelegramChannel,
    WebhookChannel,
};
use crate::config::{self, ResolvedConfig};
use crate::core::{
    cancel_pair, ActiveRuns, ArtifactStore, EventStore, Executor, FsArtifactStore,
    MemoryArtifactStore, Notifier, Pipeline, StepRunner,
};
use crate::domain::{EventKind, JobStatus, PipelineResult, RunContext};

/// benchgate - Benchmark pipeline orchestrator
#[derive(Parser, Debug)]
#[command(name = "benchgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline
    Run {
        /// Pipeline file, or name (looks for pipelines/<name>.yaml, then <name>.yaml)
        pipeline: String,

        /// Branch the run executes against
        #[arg(short, long, env = "BENCHGATE_BRANCH")]
        branch: String,

        /// Event that triggered the run
        #[arg(short, long, value_enum, default_value = "push", env = "BENCHGATE_EVENT")]
        event: EventArg,

        /// Run ID (generated if not provided)
        #[arg(long)]
        run_id: Option<Uuid>,

        /// Working directory for steps (default: current directory)
        #[arg(short, long)]
        workdir: Option<PathBuf>,

        /// Log commands instead of running them
        #[arg(long)]
        dry_run: bool,

        /// Do not send notifications
        #[arg(long)]
        no_notify: bool,

        /// Keep artifacts in memory for this run only
        #[arg(long)]
        memory_store: bool,
    },

    /// Validate a pipeline definition
    Validate {
        /// Pipeline file or name
        pipeline: String,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Ask a running pipeline to cancel
    Cancel {
        /// Run ID (UUID)
        run_id: String,
    },

    /// Inspect the artifact store
    Artifacts {
        #[command(subcommand)]
        command: ArtifactCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum ArtifactCommands {
    /// List records for an artifact name
    List {
        /// Artifact name
        name: String,

        /// Only records produced on this branch
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Write an artifact payload to a file
    Fetch {
        /// Artifact name
        name: String,

        /// Exact key (otherwise the latest record on --branch)
        #[arg(short, long)]
        key: Option<String>,

        /// Branch for latest lookup (default: canonical branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },
}

/// Event kind for CLI (maps to EventKind)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EventArg {
    /// Commits pushed to a branch
    Push,

    /// Pull request opened or updated
    PullRequest,

    /// Manually dispatched
    Manual,
}

impl From<EventArg> for EventKind {
    fn from(e: EventArg) -> Self {
        match e {
            EventArg::Push => EventKind::Push,
            EventArg::PullRequest => EventKind::PullRequest,
            EventArg::Manual => EventKind::Manual,
        }
    }
}

/// Options for `run`
struct RunOptions {
    branch: String,
    event: EventKind,
    run_id: Option<Uuid>,
    workdir: Option<PathBuf>,
    dry_run: bool,
    no_notify: bool,
    memory_store: bool,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                pipeline,
                branch,
                event,
                run_id,
                workdir,
                dry_run,
                no_notify,
                memory_store,
            } => {
                let options = RunOptions {
                    branch,
                    event: event.into(),
                    run_id,
                    workdir,
                    dry_run,
                    no_notify,
                    memory_store,
                };
                run_pipeline(&pipeline, options).await
            }
            Commands::Validate { pipeline } => validate_pipeline(&pipeline),
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Cancel { run_id } => cancel_run(&run_id),
            Commands::Artifacts { command } => match command {
                ArtifactCommands::List { name, branch } => list_artifacts(&name, branch).await,
                ArtifactCommands::Fetch {
                    name,
                    key,
                    branch,
                    out,
                } => fetch_artifact(&name, key, branch, &out).await,
            },
            Commands::Config => show_config(),
        }
    }
}

/// Run a pipeline to completion
async fn run_pipeline(name: &str, options: RunOptions) -> Result<()> {
    let pipeline = load_pipeline(name)?;
    let cfg = config::config()?;

    let ctx = RunContext::new(
        options.event,
        options.branch,
        options.run_id.unwrap_or_else(Uuid::new_v4),
    );
    let run_id = ctx.run_id;
    let branch = ctx.branch.clone();

    let store: Arc<dyn ArtifactStore> = if options.memory_store {
        Arc::new(MemoryArtifactStore::new())
    } else {
        Arc::new(FsArtifactStore::open_default().await?)
    };

    let step_executor: Arc<dyn StepExecutor> = if options.dry_run {
        Arc::new(DryRunExecutor::new())
    } else {
        Arc::new(ShellExecutor::new())
    };

    let workdir = match options.workdir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };

    let runner = StepRunner::new(step_executor, store).with_canonical_branch(&cfg.canonical_branch);
    let events = Arc::new(EventStore::open(run_id).await?);
    let mut executor = Executor::new(runner)
        .with_working_dir(workdir)
        .with_event_store(events);

    if !options.no_notify {
        let notifier = Notifier::new(notification_channel(cfg))
            .with_condition(cfg.notify.condition)
            .with_canonical_branch(&cfg.canonical_branch);
        executor = executor.with_notifier(notifier);
    }

    let (handle, signal) = cancel_pair();

    let ctrl_c = tokio::spawn({
        let handle = handle.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                handle.cancel();
            }
        }
    });

    let active = ActiveRuns::open_default()?;
    if let Some(previous) = active.claim(&branch, run_id)? {
        eprintln!("Superseding run {} on {}", previous, branch);
    }
    let cancel_watch = match active.watch(run_id, handle) {
        Ok(watch) => Some(watch),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Run cannot be cancelled by a newer run");
            None
        }
    };

    eprintln!("Run {} ({} on {})", run_id, pipeline.name, branch);
    let outcome = executor.execute(&pipeline, ctx, signal).await;

    drop(cancel_watch);
    ctrl_c.abort();
    if let Err(e) = active.release(&branch, run_id) {
        warn!(error = %e, "Failed to release active run");
    }

    let result = outcome?;
    print_result(&result);

    if !result.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

/// Pick the configured notification channel (Telegram, then webhook, then log)
fn notification_channel(cfg: &ResolvedConfig) -> Arc<dyn NotificationChannel> {
    if let Some(telegram) = &cfg.notify.telegram {
        Arc::new(TelegramChannel::from_config(telegram.clone()))
    } else if let Some(url) = &cfg.notify.webhook_url {
        Arc::new(WebhookChannel::new(url.clone()))
    } else {
        Arc::new(LogChannel)
    }
}

fn print_result(result: &PipelineResult) {
    println!();
    println!("{:<24} {:<10} {:>10}  {}", "JOB", "STATUS", "DURATION", "DETAIL");
    println!("{}", "-".repeat(75));

    for job in &result.jobs {
        let duration = job
            .duration_ms()
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        let detail = match (job.status, &job.failure, &job.skip) {
            (JobStatus::Failed, Some(reason), _) => reason.to_string(),
            (JobStatus::Skipped, _, Some(reason)) => reason.to_string(),
            _ => {
                let tolerated = job.steps.iter().filter(|s| s.outcome.tolerated_failure()).count();
                if tolerated > 0 {
                    format!("{} step(s) failed with continue_on_error", tolerated)
                } else {
                    String::new()
                }
            }
        };
        println!("{:<24} {:<10} {:>10}  {}", job.name, job.status, duration, detail);
    }

    println!();
    let cancelled = if result.was_cancelled() { " (cancelled)" } else { "" };
    eprintln!(
        "[Run {} {}{}]",
        result.context.run_id, result.status, cancelled
    );
}

/// Validate a pipeline and print its job order
fn validate_pipeline(name: &str) -> Result<()> {
    let pipeline = load_pipeline(name)?;
    let graph = pipeline.validate()?;

    println!("Pipeline '{}' is valid ({} jobs)", pipeline.name, graph.len());
    for &id in graph.topological_order() {
        let needs: Vec<&str> = graph.dependencies(id).iter().map(|&d| graph.name(d)).collect();
        if needs.is_empty() {
            println!("  {}", graph.name(id));
        } else {
            println!("  {} (needs: {})", graph.name(id), needs.join(", "));
        }
    }

    Ok(())
}

fn parse_run_id(run_id: &str) -> Result<Uuid> {
    Uuid::parse_str(run_id).with_context(|| format!("Invalid run ID: {}", run_id))
}

/// Show the status of a run
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = parse_run_id(run_id_str)?;

    let run = EventStore::open(run_id)
        .await?
        .record()
        .await?
        .with_context(|| format!("No events found for run {}", run_id))?;

    println!("Run ID: {}", run.id);
    println!("Pipeline: {}", run.pipeline_name);
    if let Some(ctx) = &run.context {
        println!("Branch: {}", ctx.branch);
        println!("Event: {}", ctx.event_kind);
    }
    println!("State: {}", run.state_label());
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    println!("\nJob statuses:");
    for (job, status) in &run.job_statuses {
        println!("  {}: {}", job, status);
    }

    Ok(())
}

/// List recent runs
async fn list_runs(limit: usize) -> Result<()> {
    let runs = EventStore::records_in(&EventStore::base_directory()?).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<20} {:<12}", "RUN ID", "PIPELINE", "BRANCH", "STATE");
    println!("{}", "-".repeat(92));

    for run in runs.into_iter().take(limit) {
        let branch = run.context.as_ref().map(|c| c.branch.as_str()).unwrap_or("-");
        println!(
            "{:<38} {:<20} {:<20} {:<12}",
            run.id,
            run.pipeline_name,
            branch,
            run.state_label()
        );
    }

    Ok(())
}

/// Request cancellation of a run in another process
fn cancel_run(run_id_str: &str) -> Result<()> {
    let run_id = parse_run_id(run_id_str)?;
    ActiveRuns::open_default()?.request_cancel(run_id)?;
    info!(%run_id, "Cancellation requested");
    println!("Cancellation requested for run {}", run_id);
    Ok(())
}

/// List artifact records
async fn list_artifacts(name: &str, branch: Option<String>) -> Result<()> {
    let store = FsArtifactStore::open_default().await?;
    let records: Vec<_> = store
        .list(name)
        .await?
        .into_iter()
        .filter(|r| branch.as_deref().map_or(true, |b| r.branch == b))
        .collect();

    if records.is_empty() {
        println!("No records for '{}'", name);
        return Ok(());
    }

    println!("{:<40} {:<20} {:>10}  {:<25} {}", "KEY", "BRANCH", "BYTES", "CREATED", "RUN ID");
    println!("{}", "-".repeat(135));
    for r in records {
        println!(
            "{:<40} {:<20} {:>10}  {:<25} {}",
            r.key,
            r.branch,
            r.size_bytes,
            r.created_at.format("%Y-%m-%d %H:%M:%S"),
            r.run_id
        );
    }

    Ok(())
}

/// Fetch an artifact by exact key or latest-on-branch
async fn fetch_artifact(
    name: &str,
    key: Option<String>,
    branch: Option<String>,
    out: &Path,
) -> Result<()> {
    let store = FsArtifactStore::open_default().await?;

    let record = match key {
        Some(key) => store.get(name, &key).await?,
        None => {
            let branch = branch.unwrap_or_else(config::canonical_branch);
            store.get_latest_fallback(name, &branch).await?
        }
    };

    tokio::fs::write(out, &record.payload)
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!(
        "Wrote '{}' key {} ({} bytes, run {}) to {}",
        record.name,
        record.key,
        record.size_bytes,
        record.run_id,
        out.display()
    );
    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("benchgate configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:       {}", cfg.home.display());
    println!("  Runs:       {}", cfg.home.join("runs").display());
    println!("  Artifacts:  {}", cfg.home.join("artifacts").display());
    println!("  Active:     {}", cfg.home.join("active").display());
    println!();
    println!("Canonical branch: {}", cfg.canonical_branch);
    println!();
    println!("Notifications:");
    println!("  Condition: {:?}", cfg.notify.condition);
    let channel = if cfg.notify.telegram.is_some() {
        "telegram"
    } else if cfg.notify.webhook_url.is_some() {
        "webhook"
    } else {
        "log"
    };
    println!("  Channel:   {}", channel);

    Ok(())
}

/// Load a pipeline by path or name
fn load_pipeline(name: &str) -> Result<Pipeline> {
    let direct = PathBuf::from(name);
    let named = PathBuf::from("pipelines").join(format!("{}.yaml", name));
    let local = PathBuf::from(format!("{}.yaml", name));

    let path = [&direct, &named, &local]
        .into_iter()
        .find(|p| p.is_file())
        .with_context(|| {
            format!(
                "Pipeline '{}' not found. Looked for:\n  - {}\n  - {}\n  - {}",
                name,
                direct.display(),
                named.display(),
                local.display()
            )
        })?;

    let pipeline = Pipeline::from_file(path)?;
    pipeline.validate()?;
    Ok(pipeline)
}
