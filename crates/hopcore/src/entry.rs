use crate::{EntryEmitter, EntryError, EntryKey, JobDefinition, JobResult, Variables};
use async_trait::async_trait;
use dyn_clone::DynClone;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Static configuration of an entry as found in a job definition
pub type EntryConfig = HashMap<String, serde_json::Value>;

/// Payload logic of a job entry.
///
/// The walker never shares an executor between invocations: it clones the
/// graph's instance with [`Entry::clone_executor`](crate::Entry::clone_executor), binds the run variables
/// into the clone and executes that. Implementations may therefore keep
/// per-invocation state in `&mut self` without any locking.
#[async_trait]
pub trait UnitExecutor: DynClone + Send + Sync {
    /// Unique type identifier (e.g., "special.start", "time.delay")
    fn entry_type(&self) -> &str;

    /// Execute the entry. `ctx.previous` holds a private copy of the
    /// upstream result.
    async fn execute(&mut self, ctx: EntryContext) -> Result<JobResult, EntryError>;

    /// Whether the result's success flag decides conditional hops
    fn evaluates(&self) -> bool {
        true
    }

    /// Whether the carried error count is reset before this entry runs
    fn resets_errors_before_execution(&self) -> bool {
        true
    }

    /// Variables that must be bound before the entry can run
    fn required_variables(&self) -> Vec<String> {
        Vec::new()
    }

    fn bind_variables(&mut self, _variables: &Variables) {}
}

dyn_clone::clone_trait_object!(UnitExecutor);

/// Handle on the run that invoked an entry
#[async_trait]
pub trait RunControl: Send + Sync {
    /// Ask the whole run to stop after the entries currently executing
    fn stop(&self);

    fn is_stopped(&self) -> bool;

    fn transaction_id(&self) -> Option<String>;

    /// Run a nested job as part of this run, sharing its transaction group
    async fn run_nested(
        &self,
        job: &JobDefinition,
        previous: JobResult,
        variables: Variables,
    ) -> Result<JobResult, EntryError>;
}

/// Execution context passed to each entry
#[derive(Clone)]
pub struct EntryContext {
    pub entry: EntryKey,

    /// Invocation index: depth of this step in the current traversal
    pub nr: u32,

    /// Copy of the result produced upstream
    pub previous: JobResult,

    pub variables: Variables,

    /// Event emitter; lines logged here end up in the result's log text
    pub events: EntryEmitter,

    /// Cancelled once the run is asked to stop
    pub cancellation: CancellationToken,

    /// Shared transaction group when the job runs with unique connections
    pub transaction_id: Option<String>,

    pub run: Arc<dyn RunControl>,
}

impl EntryContext {
    pub fn require_variable(&self, name: &str) -> Result<&str, EntryError> {
        self.variables
            .get(name)
            .ok_or_else(|| EntryError::MissingVariable(name.to_string()))
    }
}
