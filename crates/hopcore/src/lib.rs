//! Core abstractions for the hop engine
//!
//! This crate provides the graph model, the result type and the contracts
//! every entry and collaborator implements. It contains no walker: running
//! a job is the business of `hopruntime`.

mod entry;
mod error;
pub mod events;
mod graph;
mod history;
mod job;
mod result;
mod value;
mod variables;

pub use entry::{EntryConfig, EntryContext, RunControl, UnitExecutor};
pub use error::{CheckpointError, EngineError, EntryError, GraphError, SinkError};
pub use events::*;
pub use graph::{Entry, EntryKey, EntryRef, Hop, JobGraph, OutgoingHop};
pub use history::{HistoryEntry, HistorySink};
pub use job::{CheckpointPolicy, EntrySpec, HopSpec, JobDefinition, JobId, JobSettings};
pub use result::{JobResult, ResultFile, ResultSummary};
pub use value::{Row, Value};
pub use variables::{VariableBinder, Variables};
