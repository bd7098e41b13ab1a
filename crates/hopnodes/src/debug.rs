use async_trait::async_trait;
use hopcore::{EntryConfig, EntryContext, EntryError, JobResult, UnitExecutor, Variables};
use hopruntime::{EntryFactory, EntryTypeMetadata};

/// Writes a message to the entry log. `${NAME}` placeholders are replaced
/// with the bound run variables.
#[derive(Clone)]
pub struct LogEntry {
    message: String,
    requires: Vec<String>,
    resolved: Option<String>,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            requires: Vec::new(),
            resolved: None,
        }
    }

    /// Refuse to run unless `name` is set
    pub fn requiring(mut self, name: impl Into<String>) -> Self {
        self.requires.push(name.into());
        self
    }
}

fn substitute(template: &str, variables: &Variables) -> String {
    let mut text = template.to_string();
    for (name, value) in variables.iter() {
        text = text.replace(&format!("${{{name}}}"), value);
    }
    text
}

#[async_trait]
impl UnitExecutor for LogEntry {
    fn entry_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&mut self, ctx: EntryContext) -> Result<JobResult, EntryError> {
        let message = self.resolved.take().unwrap_or_else(|| self.message.clone());
        tracing::debug!(entry = %ctx.entry, "{}", message);
        ctx.events.info(message);

        let mut result = ctx.previous;
        result.entry_nr = ctx.nr;
        result.success = result.nr_errors == 0;
        Ok(result)
    }

    fn required_variables(&self) -> Vec<String> {
        self.requires.clone()
    }

    fn bind_variables(&mut self, variables: &Variables) {
        self.resolved = Some(substitute(&self.message, variables));
    }
}

pub struct LogEntryFactory;

impl EntryFactory for LogEntryFactory {
    fn create(&self, config: &EntryConfig) -> Result<Box<dyn UnitExecutor>, EntryError> {
        let message = config
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");
        let mut entry = LogEntry::new(message);

        if let Some(requires) = config.get("requires") {
            let names = requires.as_array().ok_or_else(|| {
                EntryError::Configuration("requires must be a list of variable names".to_string())
            })?;
            for name in names {
                let name = name.as_str().ok_or_else(|| {
                    EntryError::Configuration("requires must be a list of variable names".to_string())
                })?;
                entry = entry.requiring(name);
            }
        }
        Ok(Box::new(entry))
    }

    fn entry_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> EntryTypeMetadata {
        EntryTypeMetadata {
            description: "Logs a message with run variables substituted".to_string(),
            category: "debug".to_string(),
        }
    }
}
