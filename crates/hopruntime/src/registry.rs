use hopcore::{Entry, EntryConfig, EntryError, GraphError, JobDefinition, JobGraph, UnitExecutor};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating entry executors
pub trait EntryFactory: Send + Sync {
    /// Create a new executor from the entry's configuration
    fn create(&self, config: &EntryConfig) -> Result<Box<dyn UnitExecutor>, EntryError>;

    /// Get entry type identifier
    fn entry_type(&self) -> &str;

    /// Optional: describe the entry type for listings
    fn metadata(&self) -> EntryTypeMetadata {
        EntryTypeMetadata::default()
    }
}

/// Metadata about an entry type
#[derive(Debug, Clone)]
pub struct EntryTypeMetadata {
    pub description: String,
    pub category: String,
}

impl Default for EntryTypeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry of available entry types
pub struct EntryRegistry {
    factories: HashMap<String, Arc<dyn EntryFactory>>,
}

impl EntryRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register an entry factory
    pub fn register(&mut self, factory: Arc<dyn EntryFactory>) {
        let entry_type = factory.entry_type().to_string();
        tracing::debug!("Registering entry type: {}", entry_type);
        self.factories.insert(entry_type, factory);
    }

    /// Create an executor from an entry type and config
    pub fn create_executor(
        &self,
        entry_type: &str,
        config: &EntryConfig,
    ) -> Result<Box<dyn UnitExecutor>, GraphError> {
        let factory = self
            .factories
            .get(entry_type)
            .ok_or_else(|| GraphError::UnknownEntryType(entry_type.to_string()))?;

        factory.create(config).map_err(|e| GraphError::InvalidConfig {
            entry: entry_type.to_string(),
            message: e.to_string(),
        })
    }

    /// Build the runnable graph of a job definition and validate it
    pub fn build_graph(&self, definition: &JobDefinition) -> Result<JobGraph, GraphError> {
        let mut graph = JobGraph::new(definition.name.clone())
            .with_id(definition.id)
            .with_settings(definition.settings.clone());

        for spec in &definition.entries {
            let executor = self
                .create_executor(&spec.entry_type, &spec.config)
                .map_err(|e| match e {
                    GraphError::InvalidConfig { message, .. } => GraphError::InvalidConfig {
                        entry: spec.key().to_string(),
                        message,
                    },
                    other => other,
                })?;

            let mut entry = Entry::from_boxed(spec.name.clone(), executor).with_copy_nr(spec.copy_nr);
            entry.is_start = spec.start;
            entry.is_dummy = spec.dummy;
            entry.repeat = spec.repeat;
            entry.launches_in_parallel = spec.parallel;
            entry.is_checkpoint = spec.checkpoint;
            if let Some(evaluates) = spec.evaluates {
                entry.evaluates = evaluates;
            }
            if let Some(reset) = spec.reset_errors {
                entry.reset_errors_before_execution = reset;
            }
            graph.add_entry(entry);
        }

        for hop in &definition.hops {
            let resolve = |key: hopcore::EntryKey| {
                graph
                    .find_entry(&key.name, key.copy_nr)
                    .ok_or(GraphError::EntryNotFound {
                        name: key.name,
                        copy_nr: key.copy_nr,
                    })
            };
            let from = resolve(hop.from_key())?;
            let to = resolve(hop.to_key())?;
            graph.add_hop(from, to, hop.hop())?;
        }

        graph.validate()?;
        Ok(graph)
    }

    /// Get all registered entry types
    pub fn list_entry_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for an entry type
    pub fn get_metadata(&self, entry_type: &str) -> Option<EntryTypeMetadata> {
        self.factories.get(entry_type).map(|f| f.metadata())
    }
}

impl Default for EntryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
