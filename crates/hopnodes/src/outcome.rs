use async_trait::async_trait;
use hopcore::{EntryConfig, EntryContext, EntryError, JobResult, UnitExecutor};
use hopruntime::{EntryFactory, EntryTypeMetadata};

/// Produces a fixed outcome. Useful to end a branch in success or failure.
#[derive(Clone)]
pub struct OutcomeEntry {
    success: bool,
    errors: u64,
    message: Option<String>,
}

impl OutcomeEntry {
    pub fn success() -> Self {
        Self {
            success: true,
            errors: 0,
            message: None,
        }
    }

    /// Failure counting `errors` errors (at least one)
    pub fn failure(errors: u64) -> Self {
        Self {
            success: false,
            errors: errors.max(1),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[async_trait]
impl UnitExecutor for OutcomeEntry {
    fn entry_type(&self) -> &str {
        "control.outcome"
    }

    async fn execute(&mut self, ctx: EntryContext) -> Result<JobResult, EntryError> {
        if let Some(message) = &self.message {
            ctx.events.info(message.clone());
        }
        let mut result = if self.success {
            JobResult::succeeded(ctx.nr)
        } else {
            JobResult::failed(ctx.nr, self.errors, self.message.clone().unwrap_or_default())
        };
        result.enforce_error_invariant();
        Ok(result)
    }
}

pub struct OutcomeEntryFactory;

impl EntryFactory for OutcomeEntryFactory {
    fn create(&self, config: &EntryConfig) -> Result<Box<dyn UnitExecutor>, EntryError> {
        let success = config
            .get("success")
            .map(|v| {
                v.as_bool()
                    .ok_or_else(|| EntryError::Configuration("success must be a boolean".to_string()))
            })
            .transpose()?
            .unwrap_or(true);
        let errors = config.get("errors").and_then(|v| v.as_u64()).unwrap_or(1);

        let mut entry = if success {
            OutcomeEntry::success()
        } else {
            OutcomeEntry::failure(errors)
        };
        if let Some(message) = config.get("message").and_then(|v| v.as_str()) {
            entry = entry.with_message(message);
        }
        Ok(Box::new(entry))
    }

    fn entry_type(&self) -> &str {
        "control.outcome"
    }

    fn metadata(&self) -> EntryTypeMetadata {
        EntryTypeMetadata {
            description: "Finishes with a configured success or failure".to_string(),
            category: "control".to_string(),
        }
    }
}
