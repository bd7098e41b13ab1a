use async_trait::async_trait;
use hopcore::{
    EntryConfig, EntryContext, EntryError, EntrySpec, Hop, JobDefinition, JobResult, JobSettings,
    UnitExecutor,
};
use hopruntime::{
    EntryFactory, EntryRegistry, HopRuntime, RunOptions, RunStatus, RuntimeConfig,
    TransactionGroupAllocator,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn runtime() -> HopRuntime {
    runtime_with(|_| {})
}

fn runtime_with(extra: impl FnOnce(&mut EntryRegistry)) -> HopRuntime {
    let mut registry = EntryRegistry::new();
    hopnodes::register_all(&mut registry);
    extra(&mut registry);
    HopRuntime::with_registry(registry, RuntimeConfig::default())
}

/// `START -> entries[0] -> entries[1] -> ...` with unconditional hops
fn linear(name: &str, entries: Vec<EntrySpec>) -> JobDefinition {
    let mut job = JobDefinition::new(name);
    let mut previous = job.add_entry(EntrySpec::new("START", "special.start").as_start());
    for entry in entries {
        let next = job.add_entry(entry);
        job.connect(&previous, &next, Hop::unconditional());
        previous = next;
    }
    job
}

#[tokio::test]
async fn outcome_and_log_entries() {
    let runtime = runtime();

    let job = linear(
        "greeting",
        vec![EntrySpec::new("Greet", "debug.log")
            .with_config("message", "Hello ${WHO}")
            .with_config("requires", serde_json::json!(["WHO"]))],
    );
    let result = runtime
        .execute(&job, RunOptions::new().with_variable("WHO", "world"))
        .await
        .unwrap();
    assert!(result.success);
    assert!(result.log_text.contains("Hello world"));

    let missing = runtime.execute(&job, RunOptions::new()).await.unwrap();
    assert!(!missing.success);
    assert_eq!(missing.nr_errors, 1);

    let job = linear(
        "doomed",
        vec![EntrySpec::new("Fail", "control.outcome")
            .with_config("success", false)
            .with_config("errors", 3)
            .with_config("message", "bad data")],
    );
    let result = runtime.execute(&job, RunOptions::new()).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.nr_errors, 3);
    assert!(result.log_text.contains("bad data"));
}

#[tokio::test]
async fn rows_flow_through_dummy_entries() {
    let job = linear(
        "rows",
        vec![
            EntrySpec::new("Rows", "data.rows")
                .with_config("rows", serde_json::json!([{ "id": 1 }, { "id": 2 }]))
                .with_config("files", serde_json::json!(["/tmp/out.csv"])),
            EntrySpec::new("Dummy", "special.dummy"),
        ],
    );

    let result = runtime().execute(&job, RunOptions::new()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.files.len(), 1);
    assert_eq!(result.files[0].origin.as_deref(), Some("Rows"));
    assert_eq!(result.lines_written, 2);
}

#[tokio::test]
async fn stop_cancels_a_waiting_delay() {
    let job = linear(
        "sleepy",
        vec![
            EntrySpec::new("Wait", "time.delay").with_config("delay_ms", 10_000),
            EntrySpec::new("After", "debug.log"),
        ],
    );
    let runtime = runtime();
    let handle = runtime.start(&job, RunOptions::new()).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = Instant::now();
    handle.stop();
    let state = Arc::clone(handle.state());
    let result = handle.wait().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(result.stopped);
    assert!(!result.success);
    assert_eq!(result.nr_errors, 0);
    assert_eq!(state.nr_errors(), 0);
    assert!(!result.log_text.contains("Cancelled"));
    assert_eq!(state.status(), RunStatus::Stopped);
}

#[tokio::test]
async fn failed_sub_job_follows_the_failure_hop() {
    let inner = linear(
        "inner",
        vec![EntrySpec::new("Fail", "control.outcome").with_config("success", false)],
    );

    let mut job = JobDefinition::new("outer");
    let start = job.add_entry(EntrySpec::new("START", "special.start").as_start());
    let sub = job.add_entry(
        EntrySpec::new("Inner", "job.sub").with_config("job", serde_json::to_value(&inner).unwrap()),
    );
    let ok = job.add_entry(EntrySpec::new("On success", "debug.log").with_config("message", "went well"));
    let err = job.add_entry(EntrySpec::new("On failure", "debug.log").with_config("message", "went wrong"));
    job.connect(&start, &sub, Hop::unconditional());
    job.connect(&sub, &ok, Hop::on_success());
    job.connect(&sub, &err, Hop::on_failure());

    let result = runtime().execute(&job, RunOptions::new()).await.unwrap();
    assert!(result.log_text.contains("went wrong"));
    assert!(!result.log_text.contains("went well"));
}

#[tokio::test]
async fn sub_job_from_file_receives_parameters() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("inner.json");
    let inner = linear(
        "inner",
        vec![EntrySpec::new("Echo", "debug.log")
            .with_config("message", "${SOURCE} for ${DAY}")
            .with_config("requires", serde_json::json!(["SOURCE", "DAY"]))],
    );
    std::fs::write(&path, serde_json::to_string(&inner).unwrap()).unwrap();

    let job = linear(
        "outer",
        vec![EntrySpec::new("Inner", "job.sub")
            .with_config("file", path.to_string_lossy().to_string())
            .with_config("parameters", serde_json::json!({ "SOURCE": "crm" }))],
    );
    let result = runtime()
        .execute(&job, RunOptions::new().with_variable("DAY", "monday"))
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.log_text.contains("crm for monday"));
}

/// Records the transaction group every invocation was handed
#[derive(Clone)]
struct TxProbe(Arc<Mutex<Vec<Option<String>>>>);

#[async_trait]
impl UnitExecutor for TxProbe {
    fn entry_type(&self) -> &str {
        "test.tx"
    }

    async fn execute(&mut self, ctx: EntryContext) -> Result<JobResult, EntryError> {
        self.0.lock().unwrap().push(ctx.transaction_id.clone());
        Ok(JobResult::succeeded(ctx.nr))
    }
}

struct TxProbeFactory(TxProbe);

impl EntryFactory for TxProbeFactory {
    fn create(&self, _config: &EntryConfig) -> Result<Box<dyn UnitExecutor>, EntryError> {
        Ok(Box::new(self.0.clone()))
    }

    fn entry_type(&self) -> &str {
        "test.tx"
    }
}

struct Sequence(Mutex<u32>);

impl TransactionGroupAllocator for Sequence {
    fn next_id(&self) -> String {
        let mut next = self.0.lock().unwrap();
        *next += 1;
        format!("tx-{next}")
    }
}

#[tokio::test]
async fn sub_jobs_share_the_transaction_group() {
    let probe = TxProbe(Arc::new(Mutex::new(Vec::new())));
    let seen = Arc::clone(&probe.0);
    let runtime = runtime_with(|registry| registry.register(Arc::new(TxProbeFactory(probe))));
    let grouped = JobSettings {
        unique_connections: true,
        checkpoints: None,
    };

    let mut inner = linear("inner", vec![EntrySpec::new("Probe", "test.tx")]);
    inner.settings = grouped.clone();
    let mut outer = linear(
        "outer",
        vec![
            EntrySpec::new("Probe", "test.tx"),
            EntrySpec::new("Inner", "job.sub").with_config("job", serde_json::to_value(&inner).unwrap()),
        ],
    );
    outer.settings = grouped;

    let graph = Arc::new(runtime.build(&outer).unwrap());
    let result = runtime
        .runner()
        .with_allocator(Arc::new(Sequence(Mutex::new(0))))
        .run(graph, RunOptions::new())
        .await
        .unwrap();

    assert!(result.success);
    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![Some("tx-1".to_string()), Some("tx-1".to_string())]
    );
}

#[tokio::test]
async fn start_interval_paces_the_run() {
    let mut job = JobDefinition::new("paced");
    job.add_entry(
        EntrySpec::new("START", "special.start")
            .as_start()
            .with_config("interval_ms", 60),
    );

    let started = Instant::now();
    let result = runtime().execute(&job, RunOptions::new()).await.unwrap();
    assert!(result.success);
    assert!(started.elapsed() >= Duration::from_millis(60));
}
