use async_trait::async_trait;
use hopcore::{EntryConfig, EntryContext, EntryError, JobResult, UnitExecutor};
use hopruntime::{EntryFactory, EntryTypeMetadata};
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
#[derive(Clone)]
pub struct DelayEntry {
    delay_ms: u64,
}

impl DelayEntry {
    pub fn new(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

#[async_trait]
impl UnitExecutor for DelayEntry {
    fn entry_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&mut self, ctx: EntryContext) -> Result<JobResult, EntryError> {
        ctx.events.info(format!("Delaying for {}ms", self.delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(self.delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Ok(JobResult::stopped(ctx.nr)),
        }

        Ok(JobResult::succeeded(ctx.nr))
    }
}

pub struct DelayEntryFactory;

impl EntryFactory for DelayEntryFactory {
    fn create(&self, config: &EntryConfig) -> Result<Box<dyn UnitExecutor>, EntryError> {
        let delay_ms = config
            .get("delay_ms")
            .and_then(|v| v.as_f64())
            .unwrap_or(1000.0) as u64; // Default to 1 second if not specified
        Ok(Box::new(DelayEntry::new(delay_ms)))
    }

    fn entry_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> EntryTypeMetadata {
        EntryTypeMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
