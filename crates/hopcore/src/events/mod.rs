mod base;

pub use base::{EntryEmitter, EntryEvent, EventBus, ExecutionId, JobEvent};
