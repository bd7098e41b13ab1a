use async_trait::async_trait;
use hopcore::{EntryConfig, EntryContext, EntryError, JobDefinition, JobResult, UnitExecutor, Variables};
use hopruntime::{EntryFactory, EntryTypeMetadata};
use std::path::PathBuf;

#[derive(Clone)]
enum JobSource {
    Inline(Box<JobDefinition>),
    File(PathBuf),
}

/// Runs another job as part of the current run.
///
/// The nested run inherits the caller's variables and transaction group,
/// sees the caller's stop flag, and receives the previous result as the
/// previous result of its first entry. Its final result becomes this
/// entry's result.
#[derive(Clone)]
pub struct SubJobEntry {
    source: JobSource,
    parameters: Variables,
}

impl SubJobEntry {
    pub fn inline(job: JobDefinition) -> Self {
        Self {
            source: JobSource::Inline(Box::new(job)),
            parameters: Variables::new(),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: JobSource::File(path.into()),
            parameters: Variables::new(),
        }
    }

    /// Extra variable handed only to the nested run
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.set(name, value);
        self
    }

    async fn definition(&self) -> Result<JobDefinition, EntryError> {
        match &self.source {
            JobSource::Inline(job) => Ok(job.as_ref().clone()),
            JobSource::File(path) => hopruntime::load_definition(path)
                .await
                .map_err(|e| EntryError::SubJob(format!("unable to load '{}': {e}", path.display()))),
        }
    }
}

#[async_trait]
impl UnitExecutor for SubJobEntry {
    fn entry_type(&self) -> &str {
        "job.sub"
    }

    async fn execute(&mut self, ctx: EntryContext) -> Result<JobResult, EntryError> {
        let job = self.definition().await?;
        ctx.events.info(format!("Starting sub-job '{}'", job.name));

        let mut variables = ctx.variables.clone();
        variables.extend(&self.parameters);

        let mut result = ctx.run.run_nested(&job, ctx.previous.clone(), variables).await?;
        result.entry_nr = ctx.nr;

        ctx.events.info(format!(
            "Sub-job '{}' finished (success: {}, errors: {})",
            job.name, result.success, result.nr_errors
        ));
        Ok(result)
    }
}

pub struct SubJobEntryFactory;

impl EntryFactory for SubJobEntryFactory {
    fn create(&self, config: &EntryConfig) -> Result<Box<dyn UnitExecutor>, EntryError> {
        let mut entry = match (config.get("job"), config.get("file").and_then(|v| v.as_str())) {
            (Some(job), _) => {
                let job: JobDefinition = serde_json::from_value(job.clone())
                    .map_err(|e| EntryError::Configuration(format!("invalid inline job: {e}")))?;
                SubJobEntry::inline(job)
            }
            (None, Some(path)) => SubJobEntry::from_file(path),
            (None, None) => {
                return Err(EntryError::Configuration(
                    "either 'job' or 'file' must be configured".to_string(),
                ))
            }
        };

        if let Some(parameters) = config.get("parameters").and_then(|v| v.as_object()) {
            for (name, value) in parameters {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                entry = entry.with_parameter(name.clone(), value);
            }
        }
        Ok(Box::new(entry))
    }

    fn entry_type(&self) -> &str {
        "job.sub"
    }

    fn metadata(&self) -> EntryTypeMetadata {
        EntryTypeMetadata {
            description: "Runs a nested job".to_string(),
            category: "job".to_string(),
        }
    }
}
