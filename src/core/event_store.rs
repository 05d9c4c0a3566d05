//! Append-only run log with file-based persistence.
//!
//! One JSONL file per run at `$BENCHGATE_HOME/runs/<run_id>/events.jsonl`.
//! Jobs of a run append concurrently; a mutex keeps each event on its own
//! line. A run killed mid-write may leave a torn final line, which replay
//! drops. Corruption anywhere else is an error.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Event, EventType, RunRecord};

const EVENTS_FILE: &str = "events.jsonl";

/// Event log of a single run
pub struct EventStore {
    run_id: Uuid,
    run_dir: PathBuf,
    events_path: PathBuf,
    /// Serialises appends from concurrently running jobs
    write_lock: Mutex<()>,
}

impl EventStore {
    /// Open the log for a run under the configured runs directory
    pub async fn open(run_id: Uuid) -> Result<Self> {
        Self::open_in(&Self::base_directory()?, run_id).await
    }

    /// Open the log for a run under `base_dir`, creating the run directory
    pub async fn open_in(base_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = base_dir.join(run_id.to_string());

        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        Ok(Self {
            run_id,
            events_path: run_dir.join(EVENTS_FILE),
            run_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Runs directory ($BENCHGATE_HOME/runs)
    pub fn base_directory() -> Result<PathBuf> {
        crate::config::runs_dir()
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Append one event as a single line
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut line = serde_json::to_vec(event).context("Failed to serialize event")?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open run log: {}", self.events_path.display()))?;

        file.write_all(&line)
            .await
            .with_context(|| format!("Failed to append to run log: {}", self.events_path.display()))?;
        file.flush().await.context("Failed to flush run log")?;

        Ok(())
    }

    /// All events in append order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        let content = match fs::read_to_string(&self.events_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read run log: {}", self.events_path.display()))
            }
        };

        parse_events(&content, self.run_id)
    }

    /// Events matching a predicate, in append order
    pub async fn find_events<F>(&self, predicate: F) -> Result<Vec<Event>>
    where
        F: Fn(&Event) -> bool,
    {
        let events = self.replay().await?;
        Ok(events.into_iter().filter(predicate).collect())
    }

    /// Most recent event of a type
    pub async fn last_event_of_type(&self, event_type: EventType) -> Result<Option<Event>> {
        let events = self.replay().await?;
        Ok(events.into_iter().rev().find(|e| e.event_type == event_type))
    }

    /// Run state rebuilt from the log; None for an empty log
    pub async fn record(&self) -> Result<Option<RunRecord>> {
        Ok(RunRecord::from_events(&self.replay().await?))
    }

    /// Run IDs under the configured runs directory
    pub async fn list_runs() -> Result<Vec<Uuid>> {
        Self::list_runs_in(&Self::base_directory()?).await
    }

    /// Run IDs under `base_dir` (subdirectories named by UUID)
    pub async fn list_runs_in(base_dir: &Path) -> Result<Vec<Uuid>> {
        let mut entries = match fs::read_dir(base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list runs in {}", base_dir.display()))
            }
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|n| Uuid::parse_str(n).ok()) {
                runs.push(id);
            }
        }

        Ok(runs)
    }

    /// Records of every readable run under `base_dir`, newest first.
    /// Unreadable logs are skipped with a warning.
    pub async fn records_in(base_dir: &Path) -> Result<Vec<RunRecord>> {
        let mut records = Vec::new();

        for run_id in Self::list_runs_in(base_dir).await? {
            let store = Self::open_in(base_dir, run_id).await?;
            match store.record().await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(%run_id, error = %format!("{:#}", e), "Skipping unreadable run log"),
            }
        }

        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }
}

fn parse_events(content: &str, run_id: Uuid) -> Result<Vec<Event>> {
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut events = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str::<Event>(line) {
            Ok(event) => events.push(event),
            Err(e) if i + 1 == lines.len() && !content.ends_with('\n') => {
                warn!(%run_id, error = %e, "Dropping torn final line of run log");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Corrupt run log entry {} for run {}", i + 1, run_id))
            }
        }
    }

    Ok(events)
}
