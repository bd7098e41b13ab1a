//! Graph model of a job: entries connected by hops.
//!
//! A [`JobGraph`] is immutable once a run starts and may be shared between
//! runs behind an `Arc`. Nothing about a particular run is stored in it.

use crate::{GraphError, JobId, JobSettings, UnitExecutor};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Handle on an entry inside one [`JobGraph`]
pub type EntryRef = NodeIndex;

/// Identity of an entry copy: the same logical entry may appear several times
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    pub name: String,
    pub copy_nr: u32,
}

impl EntryKey {
    pub fn new(name: impl Into<String>, copy_nr: u32) -> Self {
        Self {
            name: name.into(),
            copy_nr,
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.copy_nr)
    }
}

/// A node of the job graph
#[derive(Clone)]
pub struct Entry {
    pub key: EntryKey,
    pub entry_type: String,
    pub is_start: bool,
    pub is_dummy: bool,
    /// Only honoured on the start entry: repeat the whole traversal until stopped
    pub repeat: bool,
    /// Fire outgoing hops as concurrent branches instead of one after the other
    pub launches_in_parallel: bool,
    pub evaluates: bool,
    pub reset_errors_before_execution: bool,
    pub is_checkpoint: bool,
    executor: Box<dyn UnitExecutor>,
}

impl Entry {
    pub fn new(name: impl Into<String>, executor: impl UnitExecutor + 'static) -> Self {
        Self::from_boxed(name, Box::new(executor))
    }

    pub fn from_boxed(name: impl Into<String>, executor: Box<dyn UnitExecutor>) -> Self {
        Self {
            key: EntryKey::new(name, 0),
            entry_type: executor.entry_type().to_string(),
            is_start: false,
            is_dummy: false,
            repeat: false,
            launches_in_parallel: false,
            evaluates: executor.evaluates(),
            reset_errors_before_execution: executor.resets_errors_before_execution(),
            is_checkpoint: false,
            executor,
        }
    }

    pub fn with_copy_nr(mut self, copy_nr: u32) -> Self {
        self.key.copy_nr = copy_nr;
        self
    }

    pub fn start(mut self) -> Self {
        self.is_start = true;
        self
    }

    pub fn dummy(mut self) -> Self {
        self.is_dummy = true;
        self
    }

    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.launches_in_parallel = true;
        self
    }

    pub fn checkpoint(mut self) -> Self {
        self.is_checkpoint = true;
        self
    }

    pub fn with_evaluation(mut self, evaluates: bool) -> Self {
        self.evaluates = evaluates;
        self
    }

    pub fn with_error_reset(mut self, reset: bool) -> Self {
        self.reset_errors_before_execution = reset;
        self
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// The graph's own executor instance; the walker only ever runs clones of it
    pub fn executor(&self) -> &dyn UnitExecutor {
        self.executor.as_ref()
    }

    /// A private copy of the executor for one invocation
    pub fn clone_executor(&self) -> Box<dyn UnitExecutor> {
        self.executor.clone()
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("entry_type", &self.entry_type)
            .field("is_start", &self.is_start)
            .field("launches_in_parallel", &self.launches_in_parallel)
            .field("evaluates", &self.evaluates)
            .field("is_checkpoint", &self.is_checkpoint)
            .finish_non_exhaustive()
    }
}

/// Directed, conditionally fired edge between two entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub enabled: bool,
    pub unconditional: bool,
    /// For conditional hops: fire on success (`true`) or on failure (`false`)
    pub passes_on_success: bool,
}

impl Hop {
    pub fn unconditional() -> Self {
        Self {
            enabled: true,
            unconditional: true,
            passes_on_success: true,
        }
    }

    pub fn on_success() -> Self {
        Self {
            enabled: true,
            unconditional: false,
            passes_on_success: true,
        }
    }

    pub fn on_failure() -> Self {
        Self {
            enabled: true,
            unconditional: false,
            passes_on_success: false,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether the hop fires given the source entry's evaluation flag and result
    pub fn fires(&self, source_evaluates: bool, success: bool) -> bool {
        self.enabled
            && (self.unconditional || (source_evaluates && self.passes_on_success == success))
    }
}

/// An outgoing hop as seen from its source entry
#[derive(Debug, Clone, Copy)]
pub struct OutgoingHop<'a> {
    pub to: EntryRef,
    pub hop: &'a Hop,
}

/// Complete job graph
#[derive(Debug, Clone)]
pub struct JobGraph {
    id: JobId,
    name: String,
    settings: JobSettings,
    graph: DiGraph<Entry, Hop>,
}

impl JobGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            settings: JobSettings::default(),
            graph: DiGraph::new(),
        }
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    pub fn with_settings(mut self, settings: JobSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    pub fn add_entry(&mut self, entry: Entry) -> EntryRef {
        self.graph.add_node(entry)
    }

    /// Add a hop. Hops leaving the same entry are evaluated in insertion order.
    pub fn add_hop(&mut self, from: EntryRef, to: EntryRef, hop: Hop) -> Result<(), GraphError> {
        for endpoint in [from, to] {
            if self.graph.node_weight(endpoint).is_none() {
                return Err(GraphError::InvalidHop(format!(
                    "endpoint {} is not part of job '{}'",
                    endpoint.index(),
                    self.name
                )));
            }
        }
        self.graph.add_edge(from, to, hop);
        Ok(())
    }

    /// Panics if `entry` does not belong to this graph
    pub fn entry(&self, entry: EntryRef) -> &Entry {
        &self.graph[entry]
    }

    pub fn entries(&self) -> impl Iterator<Item = (EntryRef, &Entry)> {
        self.graph
            .node_indices()
            .map(move |idx| (idx, &self.graph[idx]))
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn hop_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn find_start(&self) -> Option<EntryRef> {
        self.graph
            .node_indices()
            .find(|idx| self.graph[*idx].is_start)
    }

    pub fn find_entry(&self, name: &str, copy_nr: u32) -> Option<EntryRef> {
        self.graph.node_indices().find(|idx| {
            let key = &self.graph[*idx].key;
            key.name == name && key.copy_nr == copy_nr
        })
    }

    /// Enabled hops leaving `from`, in declared order
    pub fn outgoing_hops(&self, from: EntryRef) -> Vec<OutgoingHop<'_>> {
        let mut edges: Vec<_> = self
            .graph
            .edges(from)
            .filter(|edge| edge.weight().enabled)
            .collect();
        edges.sort_by_key(|edge| edge.id());
        edges
            .into_iter()
            .map(|edge| OutgoingHop {
                to: edge.target(),
                hop: edge.weight(),
            })
            .collect()
    }

    pub fn hop_between(&self, from: EntryRef, to: EntryRef) -> Option<&Hop> {
        self.graph
            .find_edge(from, to)
            .and_then(|edge| self.graph.edge_weight(edge))
    }

    /// Cycles are legal; this is only informative
    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Check the structural rules a run depends on: exactly one start entry
    /// and unique entry identities.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut start: Option<&Entry> = None;
        let mut seen = std::collections::HashSet::new();

        for (_, entry) in self.entries() {
            if !seen.insert(&entry.key) {
                return Err(GraphError::DuplicateEntry {
                    name: entry.key.name.clone(),
                    copy_nr: entry.key.copy_nr,
                });
            }
            if entry.is_start {
                if let Some(first) = start {
                    return Err(GraphError::DuplicateStart {
                        job: self.name.clone(),
                        first: first.key.to_string(),
                        second: entry.key.to_string(),
                    });
                }
                start = Some(entry);
            }
        }

        match start {
            Some(_) => Ok(()),
            None => Err(GraphError::NoStartEntry(self.name.clone())),
        }
    }
}
