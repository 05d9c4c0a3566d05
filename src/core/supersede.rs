//! Supersession of runs on non-canonical branches.
//!
//! When a new run starts on a feature branch, the previous run for that
//! branch is no longer interesting and is asked to cancel. Runs are
//! separate processes, so coordination happens through files:
//!
//! - `branches/<branch-hash>` holds the run id currently active for a branch
//! - `cancel/<run_id>` is a cancellation marker the owning process watches for
//!
//! Canonical-branch runs are never superseded.

use std::fs::{self as stdfs, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use fs2::FileExt;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::payload_digest;

use super::cancel::CancelHandle;

/// Debounce window for cancel-marker events
const MARKER_DEBOUNCE: Duration = Duration::from_millis(200);

/// Registry of the active run per branch
#[derive(Debug, Clone)]
pub struct ActiveRuns {
    root: PathBuf,
    canonical_branch: String,
}

impl ActiveRuns {
    /// Open (creating if needed) the registry at `root`
    pub fn open(root: impl Into<PathBuf>, canonical_branch: impl Into<String>) -> Result<Self> {
        let root = root.into();
        for sub in ["branches", "cancel"] {
            let dir = root.join(sub);
            stdfs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        Ok(Self {
            root,
            canonical_branch: canonical_branch.into(),
        })
    }

    /// Open the registry at the configured location ($BENCHGATE_HOME/active)
    pub fn open_default() -> Result<Self> {
        Self::open(crate::config::active_dir()?, crate::config::canonical_branch())
    }

    fn branch_file(&self, branch: &str) -> PathBuf {
        let digest = payload_digest(branch.as_bytes());
        self.root.join("branches").join(&digest[..16])
    }

    fn marker(&self, run_id: Uuid) -> PathBuf {
        self.root.join("cancel").join(run_id.to_string())
    }

    fn lock_file(&self) -> Result<stdfs::File> {
        let path = self.root.join("active.lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path.display()))?;
        Ok(file)
    }

    /// Record `run_id` as the active run for `branch`.
    ///
    /// Returns the superseded run, if any; a cancel marker has been written
    /// for it. Canonical-branch runs are not recorded and supersede nothing.
    pub fn claim(&self, branch: &str, run_id: Uuid) -> Result<Option<Uuid>> {
        if branch == self.canonical_branch {
            return Ok(None);
        }

        let _lock = self.lock_file()?;
        let path = self.branch_file(branch);

        let previous = read_run_id(&path)?.filter(|prev| *prev != run_id);

        stdfs::write(&path, run_id.to_string())
            .with_context(|| format!("Failed to write {}", path.display()))?;

        if let Some(prev) = previous {
            self.request_cancel(prev)?;
            info!(%branch, superseded = %prev, by = %run_id, "Superseding previous run");
        }

        Ok(previous)
    }

    /// Ask a run (in any process) to cancel
    pub fn request_cancel(&self, run_id: Uuid) -> Result<()> {
        let marker = self.marker(run_id);
        stdfs::write(&marker, b"")
            .with_context(|| format!("Failed to write cancel marker: {}", marker.display()))
    }

    /// Whether cancellation has been requested for a run
    pub fn is_cancel_requested(&self, run_id: Uuid) -> bool {
        self.marker(run_id).exists()
    }

    /// Watch `cancel/` for this run's marker and fire `handle` when it
    /// appears. Watching stops when the returned guard is dropped.
    pub fn watch(&self, run_id: Uuid, handle: CancelHandle) -> Result<CancelWatch> {
        let cancel_dir = self.root.join("cancel");
        let marker_name = run_id.to_string();

        let on_events = {
            let handle = handle.clone();
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let hit = events
                        .iter()
                        .any(|e| e.path.file_name().and_then(|n| n.to_str()) == Some(marker_name.as_str()));
                    if hit && !handle.is_cancelled() {
                        info!(%run_id, "Cancellation requested");
                        handle.cancel();
                    }
                }
                Err(e) => warn!(%run_id, error = %e, "Cancel marker watch error"),
            }
        };

        let mut debouncer = new_debouncer(MARKER_DEBOUNCE, on_events)
            .context("Failed to create cancel marker watcher")?;
        debouncer
            .watcher()
            .watch(&cancel_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", cancel_dir.display()))?;

        // A marker written before the watch was registered raises no event
        if self.is_cancel_requested(run_id) {
            info!(%run_id, "Cancellation requested");
            handle.cancel();
        }

        debug!(%run_id, dir = %cancel_dir.display(), "Watching for cancel marker");
        Ok(CancelWatch { _debouncer: debouncer })
    }

    /// Drop `run_id`'s claim on `branch` (if it still holds it) and its marker
    pub fn release(&self, branch: &str, run_id: Uuid) -> Result<()> {
        if branch != self.canonical_branch {
            let _lock = self.lock_file()?;
            let path = self.branch_file(branch);
            if read_run_id(&path)? == Some(run_id) {
                remove_if_exists(&path)?;
            }
        }

        remove_if_exists(&self.marker(run_id))?;
        debug!(%branch, %run_id, "Released active run");
        Ok(())
    }
}

/// Keeps a cancel-marker watch alive
pub struct CancelWatch {
    _debouncer: Debouncer<RecommendedWatcher>,
}

fn read_run_id(path: &Path) -> Result<Option<Uuid>> {
    match stdfs::read_to_string(path) {
        Ok(content) => match Uuid::parse_str(content.trim()) {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt active-run file");
                Ok(None)
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match stdfs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
