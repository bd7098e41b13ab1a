mod common;

use chrono::Utc;
use common::{start, Scripted};
use hopcore::{CheckpointPolicy, Entry, Hop, JobGraph, JobResult, JobSettings};
use hopruntime::{CheckpointRecord, CheckpointStore, FileCheckpointStore, JobRunner, RunOptions};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

fn record(job_name: &str, namespace: &str) -> CheckpointRecord {
    CheckpointRecord {
        job_name: job_name.to_string(),
        namespace: namespace.to_string(),
        run_id: Uuid::new_v4(),
        run_start_date: Utc::now(),
        entry_name: "Load".to_string(),
        copy_nr: 1,
        attempt: 2,
        result: JobResult::failed(3, 1, "partial load"),
        parameters: HashMap::from([("DAY".to_string(), "monday".to_string())]),
        log_date: Utc::now(),
    }
}

#[tokio::test]
async fn save_lookup_and_clear() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::new(dir.path());
    let saved = record("nightly load", "-");

    assert!(store.lookup("nightly load", "-").await.unwrap().is_none());

    store.save(&saved).await.unwrap();
    let found = store.lookup("nightly load", "-").await.unwrap().unwrap();
    assert_eq!(found, saved);

    store.clear("nightly load", "-").await.unwrap();
    assert!(store.lookup("nightly load", "-").await.unwrap().is_none());
    // Clearing twice is fine.
    store.clear("nightly load", "-").await.unwrap();
}

#[tokio::test]
async fn records_are_kept_per_namespace() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::new(dir.path().join("nested"));

    store.save(&record("job/with:odd chars", "2024-01-01")).await.unwrap();
    store.save(&record("job/with:odd chars", "2024-01-02")).await.unwrap();

    let files = std::fs::read_dir(store.dir()).unwrap().count();
    assert_eq!(files, 2);
    assert_eq!(
        store
            .lookup("job/with:odd chars", "2024-01-02")
            .await
            .unwrap()
            .unwrap()
            .namespace,
        "2024-01-02"
    );
}

#[tokio::test]
async fn similar_names_do_not_share_a_file() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::new(dir.path());

    store.save(&record("nightly load", "-")).await.unwrap();
    assert!(store.lookup("nightly_load", "-").await.unwrap().is_none());

    store.save(&record("nightly", "2024/01/01")).await.unwrap();
    store.save(&record("nightly", "2024_01_01")).await.unwrap();
    assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 3);
    assert_eq!(
        store.lookup("nightly", "2024/01/01").await.unwrap().unwrap().namespace,
        "2024/01/01"
    );

    // The separator is escaped inside names.
    store.save(&record("a@b", "c")).await.unwrap();
    assert!(store.lookup("a", "b@c").await.unwrap().is_none());
}

#[tokio::test]
async fn records_of_another_job_are_ignored() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::new(dir.path());

    store.save(&record("other", "-")).await.unwrap();
    let stored = std::fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap().path();
    std::fs::rename(&stored, dir.path().join("nightly@-.json")).unwrap();

    assert!(store.lookup("nightly", "-").await.unwrap().is_none());
}

#[tokio::test]
async fn checkpoints_survive_a_new_runner() {
    let dir = TempDir::new().unwrap();
    let b = Scripted::succeed();
    let c = Scripted::fail_times(1);
    let (b_calls, c_calls) = (b.calls(), c.calls());

    let mut graph = JobGraph::new("persisted").with_settings(JobSettings {
        unique_connections: false,
        checkpoints: Some(CheckpointPolicy::default()),
    });
    let s = graph.add_entry(start());
    let b = graph.add_entry(Entry::new("B", b).checkpoint());
    let c = graph.add_entry(Entry::new("C", c));
    graph.add_hop(s, b, Hop::unconditional()).unwrap();
    graph.add_hop(b, c, Hop::on_success()).unwrap();
    let graph = Arc::new(graph);

    let runner = || common::runner().with_checkpoint_store(Arc::new(FileCheckpointStore::new(dir.path())));

    let first = runner().run(Arc::clone(&graph), RunOptions::new()).await.unwrap();
    assert!(!first.success);

    let second: JobRunner = runner();
    let result = second.run(graph, RunOptions::new()).await.unwrap();
    assert!(result.success);
    assert_eq!(b_calls.get(), 1);
    assert_eq!(c_calls.get(), 2);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
