use crate::JobResult;
use thiserror::Error;

/// Top-level error returned by a job run.
///
/// Unit failures never show up here: they are folded into the returned
/// [`JobResult`]. Only fatal configuration problems, checkpoint policy
/// violations and infrastructure failures are reported as errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Parallel branch launched from '{entry}' failed: {source}")]
    ParallelBranch {
        entry: String,
        #[source]
        source: Box<EngineError>,
        /// Folded result of every branch, with the failed ones counted as one error each.
        partial: Box<JobResult>,
    },

    #[error("Unable to join parallel branch '{entry}': {message}")]
    BranchJoin { entry: String, message: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Run exceeded the maximum of {0} steps")]
    StepLimitExceeded(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Partial result carried by a parallel branch failure, if any.
    pub fn partial_result(&self) -> Option<&JobResult> {
        match self {
            EngineError::ParallelBranch { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// Failure raised by a unit executor.
#[derive(Error, Debug, Clone)]
pub enum EntryError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Missing required variable: {0}")]
    MissingVariable(String),

    #[error("Sub-job failed: {0}")]
    SubJob(String),

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Job '{0}' has no start entry")]
    NoStartEntry(String),

    #[error("Job '{job}' has more than one start entry ('{first}' and '{second}')")]
    DuplicateStart {
        job: String,
        first: String,
        second: String,
    },

    #[error("Duplicate entry '{name}' copy {copy_nr}")]
    DuplicateEntry { name: String, copy_nr: u32 },

    #[error("Entry not found: '{name}' copy {copy_nr}")]
    EntryNotFound { name: String, copy_nr: u32 },

    #[error("Unable to find checkpoint entry with name '{name}' and copy number {copy_nr}")]
    CheckpointEntryNotFound { name: String, copy_nr: u32 },

    #[error("Unknown entry type: {0}")]
    UnknownEntryType(String),

    #[error("Invalid hop: {0}")]
    InvalidHop(String),

    #[error("Invalid configuration for entry '{entry}': {message}")]
    InvalidConfig { entry: String, message: String },
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Retry period exceeded, please reset job '{job}' for namespace '{namespace}'")]
    RetryPeriodExceeded { job: String, namespace: String },

    #[error(
        "Checkpoint for job '{job}' in namespace '{namespace}' reached the maximum number of retries after {attempts} attempts"
    )]
    MaxAttemptsExceeded {
        job: String,
        namespace: String,
        attempts: u32,
    },

    #[error("Checkpoint store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of an optional history sink; logged by the walker, never fatal
#[derive(Error, Debug, Clone)]
#[error("History sink error: {0}")]
pub struct SinkError(pub String);
