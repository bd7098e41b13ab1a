//! Checkpoint lookup, validation and persistence.
//!
//! The coordinator wraps a [`CheckpointStore`] so the walker never deals with
//! storage. A record holds the last checkpoint entry reached by a run; when a
//! later invocation of the same job finds it, the run restarts at that entry
//! with its stored result instead of at the start entry.

use crate::RunState;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hopcore::{
    CheckpointError, CheckpointPolicy, EngineError, Entry, GraphError, JobGraph, JobResult,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Namespace used when the policy names no parameter or it is unset
pub const DEFAULT_NAMESPACE: &str = "-";

/// Persisted checkpoint of one job within one namespace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointRecord {
    pub job_name: String,
    pub namespace: String,
    pub run_id: Uuid,
    /// Start of the first attempt of this logical run
    pub run_start_date: DateTime<Utc>,
    pub entry_name: String,
    pub copy_nr: u32,
    pub attempt: u32,
    pub result: JobResult,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    pub log_date: DateTime<Utc>,
}

/// Storage behind the checkpoint coordinator
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn lookup(
        &self,
        job_name: &str,
        namespace: &str,
    ) -> Result<Option<CheckpointRecord>, CheckpointError>;

    async fn save(&self, record: &CheckpointRecord) -> Result<(), CheckpointError>;

    async fn clear(&self, job_name: &str, namespace: &str) -> Result<(), CheckpointError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Keeps checkpoints for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: RwLock<HashMap<(String, String), CheckpointRecord>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<CheckpointRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn lookup(
        &self,
        job_name: &str,
        namespace: &str,
    ) -> Result<Option<CheckpointRecord>, CheckpointError> {
        let records = self.records.read().await;
        Ok(records
            .get(&(job_name.to_string(), namespace.to_string()))
            .cloned())
    }

    async fn save(&self, record: &CheckpointRecord) -> Result<(), CheckpointError> {
        let mut records = self.records.write().await;
        records.insert(
            (record.job_name.clone(), record.namespace.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn clear(&self, job_name: &str, namespace: &str) -> Result<(), CheckpointError> {
        let mut records = self.records.write().await;
        records.remove(&(job_name.to_string(), namespace.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// One JSON file per job and namespace inside a directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Both parts are percent-encoded, so `@` only ever appears as the separator
    fn path_for(&self, job_name: &str, namespace: &str) -> PathBuf {
        self.dir.join(format!(
            "{}@{}.json",
            urlencoding::encode(job_name),
            urlencoding::encode(namespace)
        ))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn lookup(
        &self,
        job_name: &str,
        namespace: &str,
    ) -> Result<Option<CheckpointRecord>, CheckpointError> {
        let path = self.path_for(job_name, namespace);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: CheckpointRecord = serde_json::from_slice(&bytes)?;
        if record.job_name != job_name || record.namespace != namespace {
            tracing::warn!(
                path = %path.display(),
                stored_job = %record.job_name,
                stored_namespace = %record.namespace,
                "checkpoint file belongs to another job, ignoring it"
            );
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn save(&self, record: &CheckpointRecord) -> Result<(), CheckpointError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&record.job_name, &record.namespace);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(record)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn clear(&self, job_name: &str, namespace: &str) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(self.path_for(job_name, namespace)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// CheckpointCoordinator
// ---------------------------------------------------------------------------

/// Applies a job's [`CheckpointPolicy`] on top of a store for one run
pub struct CheckpointCoordinator {
    store: Arc<dyn CheckpointStore>,
    policy: CheckpointPolicy,
    job_name: String,
    namespace: String,
}

impl CheckpointCoordinator {
    /// The namespace is resolved once, from the run's variables at start
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        policy: CheckpointPolicy,
        job_name: impl Into<String>,
        state: &RunState,
    ) -> Self {
        let namespace = policy
            .namespace_parameter
            .as_deref()
            .and_then(|name| state.variables().get(name).map(str::to_string))
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        Self {
            store,
            policy,
            job_name: job_name.into(),
            namespace,
        }
    }

    pub fn policy(&self) -> &CheckpointPolicy {
        &self.policy
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Look up the previous attempt and decide where this run starts.
    ///
    /// Leaves the state untouched apart from the defaults (attempt 1, start
    /// date now) when no usable checkpoint exists. Policy violations and
    /// unknown checkpoint entries are fatal.
    pub async fn prepare(&self, graph: &JobGraph, state: &RunState) -> Result<(), EngineError> {
        *state.checkpoint_mut() = Default::default();

        if state.ignore_checkpoints() {
            tracing::debug!(job = %self.job_name, "ignoring previous checkpoints");
            return Ok(());
        }

        let Some(record) = self.store.lookup(&self.job_name, &self.namespace).await? else {
            tracing::debug!(job = %self.job_name, namespace = %self.namespace, "no checkpoint found");
            return Ok(());
        };

        if let Some(minutes) = self.policy.retry_period_minutes.filter(|m| *m > 0) {
            // A window too large to represent never closes.
            let deadline = Duration::try_minutes(minutes)
                .and_then(|window| record.run_start_date.checked_add_signed(window));
            if deadline.is_some_and(|deadline| Utc::now() > deadline) {
                return Err(CheckpointError::RetryPeriodExceeded {
                    job: self.job_name.clone(),
                    namespace: self.namespace.clone(),
                }
                .into());
            }
        }

        if let Some(max_attempts) = self.policy.max_attempts.filter(|m| *m > 0) {
            if record.attempt + 1 > max_attempts {
                return Err(CheckpointError::MaxAttemptsExceeded {
                    job: self.job_name.clone(),
                    namespace: self.namespace.clone(),
                    attempts: record.attempt,
                }
                .into());
            }
        }

        let entry = graph
            .find_entry(&record.entry_name, record.copy_nr)
            .ok_or_else(|| GraphError::CheckpointEntryNotFound {
                name: record.entry_name.clone(),
                copy_nr: record.copy_nr,
            })?;

        {
            let mut checkpoint = state.checkpoint_mut();
            checkpoint.resume_entry = Some(entry);
            checkpoint.result = Some(record.result.clone());
            checkpoint.parameters = record.parameters.clone();
            checkpoint.run_id = Some(record.run_id);
            checkpoint.run_attempt = record.attempt + 1;
            checkpoint.run_start_date = record.run_start_date;
        }

        tracing::info!(
            job = %self.job_name,
            namespace = %self.namespace,
            entry = %record.entry_name,
            attempt = record.attempt + 1,
            "restarting from checkpoint"
        );

        // Record the new attempt number straight away.
        self.save(graph.entry(entry), &record.result, state).await?;
        Ok(())
    }

    /// Persist `result` as the checkpoint reached at `entry`
    pub async fn save(
        &self,
        entry: &Entry,
        result: &JobResult,
        state: &RunState,
    ) -> Result<(), CheckpointError> {
        let (run_id, attempt, run_start_date) = {
            let mut checkpoint = state.checkpoint_mut();
            let run_id = *checkpoint.run_id.get_or_insert_with(Uuid::new_v4);
            (run_id, checkpoint.run_attempt, checkpoint.run_start_date)
        };

        let parameters = if self.policy.save_parameters {
            state.variables().into_map()
        } else {
            HashMap::new()
        };

        let record = CheckpointRecord {
            job_name: self.job_name.clone(),
            namespace: self.namespace.clone(),
            run_id,
            run_start_date,
            entry_name: entry.key.name.clone(),
            copy_nr: entry.key.copy_nr,
            attempt,
            result: result.clone(),
            parameters,
            log_date: Utc::now(),
        };

        self.store.save(&record).await?;

        tracing::debug!(
            job = %self.job_name,
            entry = %entry.key,
            run_id = %run_id,
            attempt,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Prepare a stored checkpoint result for use as the resumed entry's result
    pub fn restore(&self, stored: JobResult, parameters: &HashMap<String, String>, state: &RunState) -> JobResult {
        let mut result = stored;
        result.success = true;
        result.nr_errors = 0;
        result.stopped = false;

        if self.policy.save_parameters {
            state.merge_variables(parameters);
        }
        if !self.policy.save_result_rows {
            result.rows.clear();
        }
        if !self.policy.save_result_files {
            result.files.clear();
        }
        result
    }

    /// Drop the checkpoint once a run went through without a single error
    pub async fn finish(&self, result: &JobResult) -> Result<(), CheckpointError> {
        if result.success && result.nr_errors == 0 {
            self.store.clear(&self.job_name, &self.namespace).await?;
            tracing::debug!(job = %self.job_name, namespace = %self.namespace, "checkpoint cleared");
        }
        Ok(())
    }
}
