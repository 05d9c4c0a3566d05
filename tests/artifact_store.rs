//! Artifact Store Integration Tests
//!
//! Append-only history, latest-by-timestamp resolution, branch fallback
//! and restore/save steps flowing through a real pipeline run.

mod common;

use std::sync::Arc;

use benchgate::core::{ArtifactSpec, FsArtifactStore, MemoryArtifactStore, StoreError};
use benchgate::{
    ArtifactRecord, ArtifactStore, CancelSignal, EventKind, Job, JobStatus, Pipeline, RunContext,
    Step,
};
use chrono::{TimeZone, Utc};
use common::{executor_with_store, ScriptedExecutor};
use tempfile::TempDir;

fn run_on(branch: &str) -> RunContext {
    RunContext::generate(EventKind::Push, branch)
}

/// Exercise the fallback contract against any store
async fn check_fallback_picks_latest(store: &dyn ArtifactStore) {
    let main_a = run_on("main");
    let main_b = run_on("main");

    store.put("baseline", "k-old", b"old".to_vec(), &main_a).await.unwrap();
    store.put("baseline", "k-new", b"new".to_vec(), &main_b).await.unwrap();
    store
        .put("baseline", "k-feature", b"feature".to_vec(), &run_on("feature/x"))
        .await
        .unwrap();

    let found = store.get_latest_fallback("baseline", "main").await.unwrap();
    assert_eq!(found.payload, b"new");
    assert_eq!(found.run_id, main_b.run_id);

    // Exact key lookup still reaches older records
    let old = store.get("baseline", "k-old").await.unwrap();
    assert_eq!(old.payload, b"old");

    // Everything is retained
    assert_eq!(store.list("baseline").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_memory_store_fallback() {
    check_fallback_picks_latest(&MemoryArtifactStore::new()).await;
}

#[tokio::test]
async fn test_fs_store_fallback() {
    let temp = TempDir::new().unwrap();
    let store = FsArtifactStore::open(temp.path()).await.unwrap();
    check_fallback_picks_latest(&store).await;
}

#[tokio::test]
async fn test_fallback_uses_timestamps_not_insertion_order() {
    let store = MemoryArtifactStore::new();
    let t5 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();
    let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();

    // Newer record appended first
    store
        .insert(ArtifactRecord::new("baseline", "k5", uuid::Uuid::new_v4(), "main", b"t5".to_vec()).with_created_at(t5))
        .await;
    store
        .insert(ArtifactRecord::new("baseline", "k1", uuid::Uuid::new_v4(), "main", b"t1".to_vec()).with_created_at(t1))
        .await;

    let found = store.get_latest_fallback("baseline", "main").await.unwrap();
    assert_eq!(found.payload, b"t5");
}

#[tokio::test]
async fn test_not_found_only_when_nothing_matches() {
    let store = MemoryArtifactStore::new();

    let err = store.get_latest_fallback("baseline", "main").await.unwrap_err();
    assert!(err.is_not_found());

    store
        .put("baseline", "k", b"x".to_vec(), &run_on("feature/x"))
        .await
        .unwrap();

    // A record exists, but not on the requested branch
    let err = store.get_latest_fallback("baseline", "main").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { key: None, .. }));

    let err = store.get("baseline", "other").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(store.get("baseline", "k").await.is_ok());
}

#[tokio::test]
async fn test_fs_store_persists_across_reopen() {
    let temp = TempDir::new().unwrap();
    let ctx = run_on("main");

    {
        let store = FsArtifactStore::open(temp.path()).await.unwrap();
        store.put("baseline", "k", b"first".to_vec(), &ctx).await.unwrap();
        store.put("baseline", "k", b"second".to_vec(), &ctx).await.unwrap();
    }

    let store = FsArtifactStore::open(temp.path()).await.unwrap();
    let history = store.list("baseline").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.payload.is_empty()));

    let found = store.get("baseline", "k").await.unwrap();
    assert_eq!(found.payload, b"second");
}

#[tokio::test]
async fn test_concurrent_puts_are_all_kept() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FsArtifactStore::open(temp.path()).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let ctx = RunContext::generate(EventKind::Push, "main");
            store
                .put("baseline", &format!("k{}", i), format!("payload {}", i).into_bytes(), &ctx)
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.list("baseline").await.unwrap().len(), 10);
    assert!(store.get_latest_fallback("baseline", "main").await.is_ok());
}

#[tokio::test]
async fn test_feature_branch_restores_canonical_baseline() {
    let workspace = TempDir::new().unwrap();
    std::fs::write(workspace.path().join("result.json"), r#"{"ns": 120}"#).unwrap();

    let store = Arc::new(MemoryArtifactStore::new());

    // Run on main saves the baseline
    let save = Pipeline::new("record").job(
        Job::new("bench")
            .step(Step::run("measure", "ok"))
            .step(Step::save("upload", ArtifactSpec::new("baselines", "bench-{branch}", "result.json"))),
    );
    let scripted = ScriptedExecutor::new();
    let result = executor_with_store(&scripted, store.clone())
        .with_working_dir(workspace.path())
        .execute(&save, run_on("main"), CancelSignal::never())
        .await
        .unwrap();
    assert!(result.is_success());
    assert_eq!(store.len().await, 1);

    // Feature branch has no exact match and falls back to main
    let restore = Pipeline::new("compare").job(
        Job::new("bench")
            .step(Step::restore(
                "download",
                ArtifactSpec::new("baselines", "bench-{branch}", "restored/baseline.json"),
            ))
            .step(Step::run("compare", "ok")),
    );
    let scripted = ScriptedExecutor::new();
    let result = executor_with_store(&scripted, store.clone())
        .with_working_dir(workspace.path())
        .execute(&restore, run_on("feature/x"), CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(result.job("bench").unwrap().status, JobStatus::Succeeded);
    let restored = std::fs::read_to_string(workspace.path().join("restored/baseline.json")).unwrap();
    assert_eq!(restored, r#"{"ns": 120}"#);
}

#[tokio::test]
async fn test_restore_miss_does_not_fail_job() {
    let workspace = TempDir::new().unwrap();
    let store = Arc::new(MemoryArtifactStore::new());

    let pipeline = Pipeline::new("compare").job(
        Job::new("bench")
            .step(Step::restore(
                "download",
                ArtifactSpec::new("baselines", "bench-{branch}", "baseline.json"),
            ))
            .step(Step::run("measure", "ok")),
    );

    let scripted = ScriptedExecutor::new();
    let result = executor_with_store(&scripted, store)
        .with_working_dir(workspace.path())
        .execute(&pipeline, run_on("feature/x"), CancelSignal::never())
        .await
        .unwrap();

    let bench = result.job("bench").unwrap();
    assert_eq!(bench.status, JobStatus::Succeeded);
    assert_eq!(bench.steps.len(), 2);
    assert!(!workspace.path().join("baseline.json").exists());
}
