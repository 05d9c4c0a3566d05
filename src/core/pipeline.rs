//! Pipeline definitions and loading.
//!
//! Pipelines are defined in YAML as a set of jobs. Each job is an ordered
//! list of steps, a set of upstream jobs it `needs`, and a trigger.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::error::ConfigurationError;
use super::graph::JobGraph;
use super::limits::ExecutionLimits;
use super::trigger::Trigger;

/// A complete pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline name (used in CLI and notifications)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Environment shared by every step
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Execution limits for this pipeline
    #[serde(default)]
    pub limits: ExecutionLimits,

    /// Jobs, in definition order
    pub jobs: Vec<Job>,
}

impl Pipeline {
    /// Create an empty pipeline (builder entry point)
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            env: HashMap::new(),
            limits: ExecutionLimits::default(),
            jobs: Vec::new(),
        }
    }

    /// Add a job
    pub fn job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    /// Replace the execution limits
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Load a pipeline from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a pipeline from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse pipeline YAML")
    }

    /// Validate the definition and build its job graph
    pub fn validate(&self) -> Result<JobGraph, ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::EmptyName);
        }

        if self.jobs.is_empty() {
            return Err(ConfigurationError::NoJobs(self.name.clone()));
        }

        for (i, job) in self.jobs.iter().enumerate() {
            if job.name.trim().is_empty() {
                return Err(ConfigurationError::EmptyJobName(i));
            }
            job.validate_steps()?;
            job.trigger
                .validate()
                .map_err(|(pattern, reason)| ConfigurationError::InvalidPattern {
                    job: job.name.clone(),
                    pattern,
                    reason,
                })?;
        }

        JobGraph::build(&self.jobs)
    }

    /// Get a job by name
    pub fn get_job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// A schedulable unit of ordered steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job name (unique within pipeline)
    pub name: String,

    /// Upstream jobs that must succeed first
    #[serde(default)]
    pub needs: Vec<String>,

    /// Eligibility predicate (default: always)
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub trigger: Trigger,

    /// Override timeout for this job (uses limits.job_timeout_seconds if not set)
    pub timeout_seconds: Option<u64>,

    /// Environment for every step of this job
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Steps, executed strictly in order
    pub steps: Vec<Step>,
}

impl Job {
    /// Create a job with no steps
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            needs: Vec::new(),
            trigger: Trigger::Always,
            timeout_seconds: None,
            env: HashMap::new(),
            steps: Vec::new(),
        }
    }

    /// Append a step
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Declare an upstream dependency
    pub fn needs(mut self, job: impl Into<String>) -> Self {
        self.needs.push(job.into());
        self
    }

    /// Set the trigger predicate
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Set the timeout
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Get the effective timeout for this job
    pub fn timeout(&self, limits: &ExecutionLimits) -> Duration {
        let seconds = self.timeout_seconds.unwrap_or(limits.job_timeout_seconds);
        Duration::from_secs(seconds)
    }

    fn validate_steps(&self) -> Result<(), ConfigurationError> {
        if self.steps.is_empty() {
            return Err(ConfigurationError::NoSteps(self.name.clone()));
        }

        let mut seen = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(ConfigurationError::EmptyStepName {
                    job: self.name.clone(),
                    index,
                });
            }
            if !seen.insert(step.name.as_str()) {
                return Err(ConfigurationError::DuplicateStep {
                    job: self.name.clone(),
                    step: step.name.clone(),
                });
            }
        }

        Ok(())
    }
}

/// A single unit of work within a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StepDef")]
pub struct Step {
    /// Step name (unique within job)
    pub name: String,

    /// What the step does: `run`, `restore` or `save`
    #[serde(flatten)]
    pub action: StepAction,

    /// Keep going when this step fails (the failure is still recorded)
    #[serde(default)]
    pub continue_on_error: bool,

    /// Directory relative to the run's working directory
    pub working_directory: Option<PathBuf>,

    /// Extra environment for this step
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Step {
    fn with_action(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            continue_on_error: false,
            working_directory: None,
            env: HashMap::new(),
        }
    }

    /// A shell command step
    pub fn run(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_action(name, StepAction::Run(command.into()))
    }

    /// A step that restores an artifact to disk
    pub fn restore(name: impl Into<String>, spec: ArtifactSpec) -> Self {
        Self::with_action(name, StepAction::Restore(spec))
    }

    /// A step that saves a file as an artifact
    pub fn save(name: impl Into<String>, spec: ArtifactSpec) -> Self {
        Self::with_action(name, StepAction::Save(spec))
    }

    /// Tolerate failure of this step
    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    /// Run in a subdirectory
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

/// Step as written in YAML: exactly one of `run`, `restore` or `save`
#[derive(Deserialize)]
struct StepDef {
    name: String,
    run: Option<String>,
    restore: Option<ArtifactSpec>,
    save: Option<ArtifactSpec>,
    #[serde(default)]
    continue_on_error: bool,
    working_directory: Option<PathBuf>,
    #[serde(default)]
    env: HashMap<String, String>,
}

impl TryFrom<StepDef> for Step {
    type Error = String;

    fn try_from(def: StepDef) -> Result<Self, Self::Error> {
        let action = match (def.run, def.restore, def.save) {
            (Some(command), None, None) => StepAction::Run(command),
            (None, Some(spec), None) => StepAction::Restore(spec),
            (None, None, Some(spec)) => StepAction::Save(spec),
            (run, restore, save) => {
                let declared: Vec<&str> = [
                    run.is_some().then_some("run"),
                    restore.is_some().then_some("restore"),
                    save.is_some().then_some("save"),
                ]
                .into_iter()
                .flatten()
                .collect();
                return Err(if declared.is_empty() {
                    format!("step '{}' needs one of run, restore or save", def.name)
                } else {
                    format!(
                        "step '{}' declares {}; only one action is allowed",
                        def.name,
                        declared.join(" and ")
                    )
                });
            }
        };

        Ok(Self {
            name: def.name,
            action,
            continue_on_error: def.continue_on_error,
            working_directory: def.working_directory,
            env: def.env,
        })
    }
}

/// Step body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Shell command handed to the step executor
    Run(String),

    /// Fetch an artifact (exact key, then latest on the fallback branch)
    Restore(ArtifactSpec),

    /// Store a file as an artifact
    Save(ArtifactSpec),
}

impl StepAction {
    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            Self::Run(cmd) => format!("run `{}`", cmd),
            Self::Restore(spec) => format!("restore '{}'", spec.artifact),
            Self::Save(spec) => format!("save '{}'", spec.artifact),
        }
    }
}

/// Where an artifact lives in the store and on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Logical artifact name
    pub artifact: String,

    /// Key template; `{branch}`, `{run_id}`, `{event}` and `{job}` are substituted
    pub key: String,

    /// Glob patterns whose contents are fingerprinted into the key
    #[serde(default)]
    pub hash_files: Vec<String>,

    /// File to read (save) or write (restore), relative to the step's directory
    pub path: PathBuf,

    /// Branch to fall back to on an exact miss (default: the canonical branch)
    pub fallback_branch: Option<String>,
}

impl ArtifactSpec {
    pub fn new(artifact: impl Into<String>, key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            artifact: artifact.into(),
            key: key.into(),
            hash_files: Vec::new(),
            path: path.into(),
            fallback_branch: None,
        }
    }

    pub fn with_fallback_branch(mut self, branch: impl Into<String>) -> Self {
        self.fallback_branch = Some(branch.into());
        self
    }

    pub fn hashing(mut self, pattern: impl Into<String>) -> Self {
        self.hash_files.push(pattern.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PIPELINE_YAML: &str = r#"
name: benchmarks
description: Benchmark pipeline

limits:
  job_timeout_seconds: 900

jobs:
  - name: setup
    steps:
      - name: toolchain
        run: rustup show

  - name: bench
    needs: [setup]
    trigger:
      not_branch: [main]
    timeout_seconds: 120
    steps:
      - name: download baseline
        restore:
          artifact: baselines
          key: "bench-{branch}"
          path: target/baseline.json
        continue_on_error: true
      - name: run
        run: cargo bench
        working_directory: bench
      - name: upload
        save:
          artifact: baselines
          key: "bench-{branch}"
          hash_files: ["Cargo.lock"]
          path: target/bench.json
"#;

    #[test]
    fn test_pipeline_parsing() {
        let pipeline = Pipeline::from_yaml(TEST_PIPELINE_YAML).unwrap();

        assert_eq!(pipeline.name, "benchmarks");
        assert_eq!(pipeline.jobs.len(), 2);
        assert_eq!(pipeline.limits.job_timeout_seconds, 900);

        let bench = pipeline.get_job("bench").unwrap();
        assert_eq!(bench.needs, vec!["setup".to_string()]);
        assert_eq!(bench.steps.len(), 3);
        assert!(bench.steps[0].continue_on_error);
        assert!(matches!(bench.steps[0].action, StepAction::Restore(_)));
        assert_eq!(bench.steps[1].action, StepAction::Run("cargo bench".to_string()));
        assert_eq!(bench.steps[1].working_directory, Some(PathBuf::from("bench")));

        match &bench.steps[2].action {
            StepAction::Save(spec) => assert_eq!(spec.hash_files, vec!["Cargo.lock".to_string()]),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_job_timeout_override() {
        let pipeline = Pipeline::from_yaml(TEST_PIPELINE_YAML).unwrap();

        let setup = pipeline.get_job("setup").unwrap();
        assert_eq!(setup.timeout(&pipeline.limits), Duration::from_secs(900));

        let bench = pipeline.get_job("bench").unwrap();
        assert_eq!(bench.timeout(&pipeline.limits), Duration::from_secs(120));
    }

    #[test]
    fn test_pipeline_validation() {
        let pipeline = Pipeline::from_yaml(TEST_PIPELINE_YAML).unwrap();
        let graph = pipeline.validate().unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_step_without_action_rejected() {
        let yaml = r#"
name: invalid
jobs:
  - name: build
    steps:
      - name: nothing
"#;
        assert!(Pipeline::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_step_with_two_actions_rejected() {
        let yaml = r#"
name: invalid
jobs:
  - name: build
    steps:
      - name: compile and upload
        run: cargo build
        save:
          artifact: a
          key: k
          path: out.json
"#;
        let err = Pipeline::from_yaml(yaml).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("declares run and save"), "{}", message);
    }

    #[test]
    fn test_duplicate_step_names() {
        let pipeline = Pipeline::new("p").job(
            Job::new("build")
                .step(Step::run("compile", "cargo build"))
                .step(Step::run("compile", "cargo build --release")),
        );

        assert_eq!(
            pipeline.validate().unwrap_err(),
            ConfigurationError::DuplicateStep {
                job: "build".to_string(),
                step: "compile".to_string()
            }
        );
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        assert_eq!(
            Pipeline::new("p").validate().unwrap_err(),
            ConfigurationError::NoJobs("p".to_string())
        );
        assert_eq!(
            Pipeline::new("p").job(Job::new("build")).validate().unwrap_err(),
            ConfigurationError::NoSteps("build".to_string())
        );
    }

    #[test]
    fn test_invalid_branch_pattern() {
        let pipeline = Pipeline::new("p").job(
            Job::new("bench")
                .trigger(Trigger::Branch(vec!["release/[".to_string()]))
                .step(Step::run("run", "true")),
        );

        assert!(matches!(
            pipeline.validate(),
            Err(ConfigurationError::InvalidPattern { .. })
        ));
    }
}
