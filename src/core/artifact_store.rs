//! Append-only artifact store with cross-run fallback.
//!
//! Records are never overwritten: every `put` appends a new record, and
//! "latest" is computed at query time from creation timestamps. There is
//! no mutable latest pointer, so concurrent writers need no coordination
//! beyond an append lock on the index.

use std::fs::OpenOptions as StdOpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use fs2::FileExt;
use glob::glob;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{ArtifactRecord, RunContext};

use super::error::StoreError;

/// Storage for artifact records
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Append a new record. Never overwrites earlier records.
    async fn put(
        &self,
        name: &str,
        key: &str,
        payload: Vec<u8>,
        run: &RunContext,
    ) -> Result<ArtifactRecord, StoreError>;

    /// Exact (name, key) match; the most recent one if several exist
    async fn get(&self, name: &str, key: &str) -> Result<ArtifactRecord, StoreError>;

    /// Most recent record for `name` produced by a run on `branch`
    async fn get_latest_fallback(&self, name: &str, branch: &str) -> Result<ArtifactRecord, StoreError>;

    /// Metadata of every record under `name`, oldest first (payloads empty)
    async fn list(&self, name: &str) -> Result<Vec<ArtifactRecord>, StoreError>;
}

/// Pick the latest record; on equal timestamps the later-appended one wins
fn latest<'a, I>(records: I) -> Option<&'a ArtifactRecord>
where
    I: Iterator<Item = &'a ArtifactRecord>,
{
    records.enumerate().max_by_key(|(i, r)| (r.created_at, *i)).map(|(_, r)| r)
}

// ============================================================================
// Filesystem store
// ============================================================================

/// File-based store: payloads under `blobs/<sha256>`, metadata in `index.jsonl`
pub struct FsArtifactStore {
    root: PathBuf,
    blobs_dir: PathBuf,
    index_path: PathBuf,
}

impl FsArtifactStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        let blobs_dir = root.join("blobs");

        fs::create_dir_all(&blobs_dir)
            .await
            .with_context(|| format!("Failed to create artifact directory: {}", blobs_dir.display()))?;

        Ok(Self {
            index_path: root.join("index.jsonl"),
            root,
            blobs_dir,
        })
    }

    /// Open the store at the configured location ($BENCHGATE_HOME/artifacts)
    pub async fn open_default() -> anyhow::Result<Self> {
        Self::open(crate::config::artifacts_dir()?).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.blobs_dir.join(digest)
    }

    async fn write_blob(&self, record: &ArtifactRecord) -> Result<(), StoreError> {
        let path = self.blob_path(&record.digest);
        if fs::try_exists(&path).await.unwrap_or(false) {
            // Content-addressed: identical payload already present
            return Ok(());
        }

        // Unique per writer: identical payloads saved concurrently must not
        // share a temp file
        let tmp = self.blobs_dir.join(format!("{}.{}.tmp", record.digest, Uuid::new_v4()));
        fs::write(&tmp, &record.payload).await.map_err(StoreError::unavailable)?;

        match fs::rename(&tmp, &path).await {
            Ok(()) => Ok(()),
            Err(_) if fs::try_exists(&path).await.unwrap_or(false) => {
                // Another writer landed the same content first
                let _ = fs::remove_file(&tmp).await;
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                Err(StoreError::unavailable(e))
            }
        }
    }

    async fn append_index(&self, record: &ArtifactRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record).map_err(StoreError::unavailable)?;
        let index_path = self.index_path.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = StdOpenOptions::new()
                .create(true)
                .append(true)
                .open(&index_path)?;

            // Exclusive lock so lines from concurrent writers never interleave
            file.lock_exclusive()?;
            writeln!(file, "{}", line)?;
            file.flush()?;
            // Lock is released when file is dropped
            Ok(())
        })
        .await
        .map_err(StoreError::unavailable)?
        .map_err(StoreError::unavailable)
    }

    async fn read_index(&self) -> Result<Vec<ArtifactRecord>, StoreError> {
        let content = match fs::read_to_string(&self.index_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::unavailable(e)),
        };

        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ArtifactRecord>(line) {
                Ok(record) => records.push(record),
                // A torn trailing line from a crashed writer is skipped
                Err(e) => debug!(error = %e, "Skipping unreadable index line"),
            }
        }

        Ok(records)
    }

    async fn load(&self, mut record: ArtifactRecord) -> Result<ArtifactRecord, StoreError> {
        record.payload = fs::read(self.blob_path(&record.digest))
            .await
            .map_err(StoreError::unavailable)?;
        Ok(record)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        name: &str,
        key: &str,
        payload: Vec<u8>,
        run: &RunContext,
    ) -> Result<ArtifactRecord, StoreError> {
        let record = ArtifactRecord::new(name, key, run.run_id, run.branch.clone(), payload);

        self.write_blob(&record).await?;
        self.append_index(&record).await?;

        debug!(artifact = name, key, digest = %record.digest, "Stored artifact");
        Ok(record)
    }

    async fn get(&self, name: &str, key: &str) -> Result<ArtifactRecord, StoreError> {
        let records = self.read_index().await?;
        let found = latest(records.iter().filter(|r| r.name == name && r.key == key))
            .cloned()
            .ok_or_else(|| StoreError::not_found(name, Some(key)))?;
        self.load(found).await
    }

    async fn get_latest_fallback(&self, name: &str, branch: &str) -> Result<ArtifactRecord, StoreError> {
        let records = self.read_index().await?;
        let found = latest(records.iter().filter(|r| r.name == name && r.branch == branch))
            .cloned()
            .ok_or_else(|| StoreError::not_found(name, None))?;
        self.load(found).await
    }

    async fn list(&self, name: &str) -> Result<Vec<ArtifactRecord>, StoreError> {
        let records = self.read_index().await?;
        Ok(records.into_iter().filter(|r| r.name == name).collect())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store (ephemeral runs and tests)
#[derive(Default)]
pub struct MemoryArtifactStore {
    records: RwLock<Vec<ArtifactRecord>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a prepared record as-is (seeding, imports)
    pub async fn insert(&self, record: ArtifactRecord) {
        self.records.write().await.push(record);
    }

    /// Number of records held
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        name: &str,
        key: &str,
        payload: Vec<u8>,
        run: &RunContext,
    ) -> Result<ArtifactRecord, StoreError> {
        let record = ArtifactRecord::new(name, key, run.run_id, run.branch.clone(), payload);
        self.records.write().await.push(record.clone());
        Ok(record)
    }

    async fn get(&self, name: &str, key: &str) -> Result<ArtifactRecord, StoreError> {
        let records = self.records.read().await;
        latest(records.iter().filter(|r| r.name == name && r.key == key))
            .cloned()
            .ok_or_else(|| StoreError::not_found(name, Some(key)))
    }

    async fn get_latest_fallback(&self, name: &str, branch: &str) -> Result<ArtifactRecord, StoreError> {
        let records = self.records.read().await;
        latest(records.iter().filter(|r| r.name == name && r.branch == branch))
            .cloned()
            .ok_or_else(|| StoreError::not_found(name, None))
    }

    async fn list(&self, name: &str) -> Result<Vec<ArtifactRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.name == name)
            .map(|r| ArtifactRecord {
                payload: Vec::new(),
                ..r.clone()
            })
            .collect())
    }
}

// ============================================================================
// Cache keys
// ============================================================================

/// Substitute `{branch}`, `{run_id}`, `{event}` and `{job}` in a key template
pub fn render_key(template: &str, run: &RunContext, job: &str) -> String {
    template
        .replace("{branch}", &run.branch)
        .replace("{run_id}", &run.run_id.to_string())
        .replace("{event}", run.event_kind.as_str())
        .replace("{job}", job)
}

/// Fingerprint the files matched by `patterns` under `base`.
///
/// Hashes each matched file's relative path and contents in sorted path
/// order; returns the first 16 hex chars of the SHA-256. No matches hash
/// to the digest of nothing, so the key stays stable.
pub fn fingerprint_files(base: &Path, patterns: &[String]) -> anyhow::Result<String> {
    let mut files = Vec::new();

    for pattern in patterns {
        let full = base.join(pattern);
        let full = full.to_string_lossy();
        for entry in glob(&full).with_context(|| format!("Invalid hash_files pattern: {}", pattern))? {
            let path = entry.with_context(|| format!("Failed to read match for {}", pattern))?;
            if path.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    files.dedup();

    let mut hasher = Sha256::new();
    for path in &files {
        let rel = path.strip_prefix(base).unwrap_or(path);
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        let contents = std::fs::read(path)
            .with_context(|| format!("Failed to read {} for fingerprinting", path.display()))?;
        hasher.update(&contents);
    }

    let digest = hasher.finalize();
    Ok(hex::encode(&digest[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventKind;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn ctx(branch: &str) -> RunContext {
        RunContext::generate(EventKind::Push, branch)
    }

    #[tokio::test]
    async fn test_put_is_append_only() {
        let temp = TempDir::new().unwrap();
        let store = FsArtifactStore::open(temp.path()).await.unwrap();

        store.put("baselines", "k", b"first".to_vec(), &ctx("main")).await.unwrap();
        store.put("baselines", "k", b"second".to_vec(), &ctx("main")).await.unwrap();

        let all = store.list("baselines").await.unwrap();
        assert_eq!(all.len(), 2);

        let got = store.get("baselines", "k").await.unwrap();
        assert_eq!(got.payload, b"second");
    }

    #[tokio::test]
    async fn test_identical_payloads_share_a_blob() {
        let temp = TempDir::new().unwrap();
        let store = FsArtifactStore::open(temp.path()).await.unwrap();

        let a = store.put("baselines", "a", b"same".to_vec(), &ctx("main")).await.unwrap();
        let b = store.put("baselines", "b", b"same".to_vec(), &ctx("dev")).await.unwrap();
        assert_eq!(a.digest, b.digest);

        let blobs = std::fs::read_dir(temp.path().join("blobs")).unwrap().count();
        assert_eq!(blobs, 1);
        assert_eq!(store.get("baselines", "b").await.unwrap().payload, b"same");
    }

    #[tokio::test]
    async fn test_concurrent_identical_payloads_all_recorded() {
        let temp = TempDir::new().unwrap();
        let store = std::sync::Arc::new(FsArtifactStore::open(temp.path()).await.unwrap());
        let run = ctx("main");

        for round in 0..20 {
            let mut handles = Vec::new();
            for job in 0..4 {
                let store = store.clone();
                let run = run.clone();
                handles.push(tokio::spawn(async move {
                    let payload = format!("round {}", round).into_bytes();
                    store.put("results", &format!("job{}", job), payload, &run).await
                }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }
        }

        assert_eq!(store.list("results").await.unwrap().len(), 80);
        let leftovers = std::fs::read_dir(temp.path().join("blobs"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
        assert_eq!(store.get("results", "job3").await.unwrap().payload, b"round 19");
    }

    #[tokio::test]
    async fn test_fs_fallback_by_branch() {
        let temp = TempDir::new().unwrap();
        let store = FsArtifactStore::open(temp.path()).await.unwrap();

        store.put("baselines", "bench-main-1", b"main".to_vec(), &ctx("main")).await.unwrap();
        store.put("baselines", "bench-dev-1", b"dev".to_vec(), &ctx("dev")).await.unwrap();

        let got = store.get_latest_fallback("baselines", "main").await.unwrap();
        assert_eq!(got.payload, b"main");

        let miss = store.get_latest_fallback("baselines", "release").await.unwrap_err();
        assert!(miss.is_not_found());
    }

    #[tokio::test]
    async fn test_missing_blob_is_storage_unavailable() {
        let temp = TempDir::new().unwrap();
        let store = FsArtifactStore::open(temp.path()).await.unwrap();

        let record = store.put("baselines", "k", b"data".to_vec(), &ctx("main")).await.unwrap();
        std::fs::remove_file(temp.path().join("blobs").join(&record.digest)).unwrap();

        let err = store.get("baselines", "k").await.unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_equal_timestamps_last_writer_wins() {
        let store = MemoryArtifactStore::new();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        store
            .insert(ArtifactRecord::new("b", "k", Uuid::new_v4(), "main", b"old".to_vec()).with_created_at(t))
            .await;
        store
            .insert(ArtifactRecord::new("b", "k", Uuid::new_v4(), "main", b"new".to_vec()).with_created_at(t))
            .await;

        assert_eq!(store.get("b", "k").await.unwrap().payload, b"new");
        assert_eq!(store.get_latest_fallback("b", "main").await.unwrap().payload, b"new");
    }

    #[test]
    fn test_render_key() {
        let run = RunContext::new(
            EventKind::PullRequest,
            "feature/x",
            Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
        );

        assert_eq!(
            render_key("bench-{branch}-{event}-{job}", &run, "bench"),
            "bench-feature/x-pull_request-bench"
        );
        assert_eq!(
            render_key("{run_id}", &run, "bench"),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn test_fingerprint_tracks_contents() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("Cargo.lock"), "v1").unwrap();

        let patterns = vec!["Cargo.lock".to_string()];
        let first = fingerprint_files(temp.path(), &patterns).unwrap();
        let again = fingerprint_files(temp.path(), &patterns).unwrap();
        assert_eq!(first, again);
        assert_eq!(first.len(), 16);

        std::fs::write(temp.path().join("Cargo.lock"), "v2").unwrap();
        let changed = fingerprint_files(temp.path(), &patterns).unwrap();
        assert_ne!(first, changed);
    }
}
