//! Standard entry library
//!
//! Collection of built-in entry types for common job steps

mod debug;
mod outcome;
mod rows;
mod special;
mod subjob;
mod time;

pub use debug::{LogEntry, LogEntryFactory};
pub use outcome::{OutcomeEntry, OutcomeEntryFactory};
pub use rows::{RowsEntry, RowsEntryFactory};
pub use special::{DummyEntry, DummyEntryFactory, StartEntry, StartEntryFactory};
pub use subjob::{SubJobEntry, SubJobEntryFactory};
pub use time::{DelayEntry, DelayEntryFactory};
use hopruntime::EntryRegistry;

use std::sync::Arc;

/// Register all standard entry types with a registry
pub fn register_all(registry: &mut EntryRegistry) {
    registry.register(Arc::new(StartEntryFactory));
    registry.register(Arc::new(DummyEntryFactory));
    registry.register(Arc::new(OutcomeEntryFactory));
    registry.register(Arc::new(DelayEntryFactory));
    registry.register(Arc::new(LogEntryFactory));
    registry.register(Arc::new(RowsEntryFactory));
    registry.register(Arc::new(SubJobEntryFactory));
}
