//! Job execution runtime
//!
//! This crate walks job graphs: it owns the per-run state, the checkpoint
//! machinery, the entry registry and the recursive walker that follows hops
//! sequentially or as parallel branches.

mod checkpoint;
mod listener;
mod registry;
mod runtime;
mod state;
mod transaction;
mod walker;

pub use checkpoint::{
    CheckpointCoordinator, CheckpointRecord, CheckpointStore, FileCheckpointStore,
    MemoryCheckpointStore, DEFAULT_NAMESPACE,
};
pub use listener::JobListener;
pub use registry::{EntryFactory, EntryRegistry, EntryTypeMetadata};
pub use runtime::{load_definition, HopRuntime, RuntimeConfig};
pub use state::{CheckpointState, RunState, RunStatus, DEFAULT_MAX_HISTORY, HISTORY_TRIM_BLOCK};
pub use transaction::{TransactionGroupAllocator, UuidTransactionAllocator};
pub use walker::{JobRun, JobRunner, RunHandle, RunOptions};
