//! Shared fixtures for integration tests.
//!
//! `ScriptedExecutor` interprets step commands as a tiny script language
//! instead of spawning processes:
//!
//! - `ok`            exit 0
//! - `exit:N`        exit with code N
//! - `sleep:MS`      sleep, stopping early (no exit code) on cancellation
//! - `hang:MS`       sleep, ignoring cancellation
//! - `env:VAR`       exit 0, log the value of VAR
//! - `panic`         panic inside the executor

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use benchgate::adapters::{ExecOutput, StepCommand, StepExecutor};
use benchgate::core::{MemoryArtifactStore, StepRunner};
use benchgate::{CancelSignal, Executor};

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct Call {
    /// "job/step"
    pub label: String,
    pub started: Instant,
    pub finished: Option<Instant>,
}

#[derive(Default)]
pub struct ScriptedExecutor {
    calls: Mutex<Vec<Call>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Labels in start order
    pub fn invocations(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.label.clone()).collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call(&self, label: &str) -> Option<Call> {
        self.calls().into_iter().find(|c| c.label == label)
    }

    /// Highest number of steps observed running at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn begin(&self, label: String) -> usize {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                label,
                started: Instant::now(),
                finished: None,
            });
            calls.len() - 1
        };
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        index
    }

    fn end(&self, index: usize) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap()[index].finished = Some(Instant::now());
    }
}

/// Decrements the running count even when the step future is dropped
struct Running<'a> {
    exec: &'a ScriptedExecutor,
    index: usize,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.exec.end(self.index);
    }
}

fn millis(arg: &str) -> Duration {
    Duration::from_millis(arg.parse().expect("duration in ms"))
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, cmd: &StepCommand, cancel: &CancelSignal) -> anyhow::Result<ExecOutput> {
        let index = self.begin(format!("{}/{}", cmd.job, cmd.step));
        let _running = Running { exec: self, index };

        let (op, arg) = cmd.command.split_once(':').unwrap_or((cmd.command.as_str(), ""));
        match op {
            "ok" => Ok(ExecOutput::ok("ok")),
            "exit" => Ok(ExecOutput::exited(arg.parse().expect("exit code"), "exited")),
            "sleep" => {
                tokio::select! {
                    _ = tokio::time::sleep(millis(arg)) => Ok(ExecOutput::ok("slept")),
                    _ = cancel.cancelled() => Ok(ExecOutput { exit_code: None, log: "interrupted".to_string() }),
                }
            }
            "hang" => {
                tokio::time::sleep(millis(arg)).await;
                Ok(ExecOutput::ok("hung"))
            }
            "env" => Ok(ExecOutput::ok(cmd.env.get(arg).cloned().unwrap_or_default())),
            "panic" => panic!("scripted panic in {}", cmd.step),
            other => anyhow::bail!("unknown scripted command '{}'", other),
        }
    }
}

/// Executor wired to a scripted step executor and an in-memory store
pub fn executor(scripted: &Arc<ScriptedExecutor>) -> Executor {
    executor_with_store(scripted, Arc::new(MemoryArtifactStore::new()))
}

pub fn executor_with_store(scripted: &Arc<ScriptedExecutor>, store: Arc<MemoryArtifactStore>) -> Executor {
    let runner = StepRunner::new(scripted.clone(), store);
    Executor::new(runner)
}
