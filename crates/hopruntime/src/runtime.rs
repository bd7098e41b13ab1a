use crate::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use crate::registry::EntryRegistry;
use crate::walker::{JobRunner, RunHandle, RunOptions};
use hopcore::{EngineError, EventBus, JobDefinition, JobEvent, JobGraph, JobId, JobResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Main runtime for executing jobs
pub struct HopRuntime {
    registry: Arc<EntryRegistry>,
    event_bus: Arc<EventBus>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: RuntimeConfig,
    jobs: Arc<RwLock<HashMap<JobId, Arc<JobGraph>>>>,
}

impl HopRuntime {
    /// Create a new runtime with default settings and no entry types
    pub fn new() -> Self {
        Self::with_registry(EntryRegistry::new(), RuntimeConfig::default())
    }

    /// Create a new runtime with a pre-populated registry
    pub fn with_registry(registry: EntryRegistry, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let checkpoints: Arc<dyn CheckpointStore> = match &config.checkpoint_dir {
            Some(dir) => Arc::new(FileCheckpointStore::new(dir.clone())),
            None => Arc::new(MemoryCheckpointStore::new()),
        };

        Self {
            registry: Arc::new(registry),
            event_bus,
            checkpoints,
            config,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<EntryRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn checkpoint_store(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// A runner wired to this runtime's registry, event bus and checkpoint store
    pub fn runner(&self) -> JobRunner {
        JobRunner::new(Arc::clone(&self.event_bus))
            .with_registry(Arc::clone(&self.registry))
            .with_checkpoint_store(Arc::clone(&self.checkpoints))
            .with_max_history(self.config.max_history)
    }

    /// Build and validate the graph of a job definition
    pub fn build(&self, definition: &JobDefinition) -> Result<JobGraph, EngineError> {
        Ok(self.registry.build_graph(definition)?)
    }

    /// Register a job so it can be run by id
    pub async fn register_job(&self, definition: &JobDefinition) -> Result<JobId, EngineError> {
        let graph = self.build(definition)?;
        let id = graph.id();
        self.jobs.write().await.insert(id, Arc::new(graph));
        Ok(id)
    }

    /// Execute a registered job by id
    pub async fn execute_job(&self, job_id: JobId, options: RunOptions) -> Result<JobResult, EngineError> {
        let graph = self
            .jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;

        self.runner().run(graph, options).await
    }

    /// Execute a job definition directly (without registration)
    pub async fn execute(&self, definition: &JobDefinition, options: RunOptions) -> Result<JobResult, EngineError> {
        let graph = Arc::new(self.build(definition)?);
        self.runner().run(graph, options).await
    }

    /// Start a job definition in the background
    pub fn start(&self, definition: &JobDefinition, options: RunOptions) -> Result<RunHandle, EngineError> {
        let graph = Arc::new(self.build(definition)?);
        Ok(self.runner().start(graph, options))
    }

    /// Subscribe to run events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<JobEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for HopRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a JSON job definition from disk
pub async fn load_definition(path: impl AsRef<Path>) -> Result<JobDefinition, EngineError> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    /// History records kept per run; 0 keeps everything
    pub max_history: usize,
    /// Persist checkpoints as JSON files here instead of in memory
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            max_history: crate::state::DEFAULT_MAX_HISTORY,
            checkpoint_dir: None,
        }
    }
}
