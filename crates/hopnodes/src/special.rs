use async_trait::async_trait;
use hopcore::{EntryConfig, EntryContext, EntryError, JobResult, UnitExecutor};
use hopruntime::{EntryFactory, EntryTypeMetadata};
use tokio::time::{sleep, Duration};

/// Start of a job. Optionally waits `interval_ms` before letting the run go
/// on, which paces a repeating job.
#[derive(Clone, Default)]
pub struct StartEntry {
    interval_ms: u64,
}

impl StartEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }
}

#[async_trait]
impl UnitExecutor for StartEntry {
    fn entry_type(&self) -> &str {
        "special.start"
    }

    async fn execute(&mut self, ctx: EntryContext) -> Result<JobResult, EntryError> {
        if self.interval_ms > 0 {
            tokio::select! {
                _ = sleep(Duration::from_millis(self.interval_ms)) => {}
                _ = ctx.cancellation.cancelled() => {
                    return Ok(JobResult::stopped(ctx.nr));
                }
            }
        }
        Ok(JobResult::succeeded(ctx.nr))
    }

    fn evaluates(&self) -> bool {
        false
    }
}

pub struct StartEntryFactory;

impl EntryFactory for StartEntryFactory {
    fn create(&self, config: &EntryConfig) -> Result<Box<dyn UnitExecutor>, EntryError> {
        let interval_ms = match config.get("interval_ms") {
            None => 0,
            Some(value) => value.as_u64().ok_or_else(|| {
                EntryError::Configuration("interval_ms must be a non-negative integer".to_string())
            })?,
        };
        Ok(Box::new(StartEntry::new().with_interval_ms(interval_ms)))
    }

    fn entry_type(&self) -> &str {
        "special.start"
    }

    fn metadata(&self) -> EntryTypeMetadata {
        EntryTypeMetadata {
            description: "Starting point of a job".to_string(),
            category: "special".to_string(),
        }
    }
}

/// Does nothing: hands the previous result on unchanged
#[derive(Clone, Default)]
pub struct DummyEntry;

#[async_trait]
impl UnitExecutor for DummyEntry {
    fn entry_type(&self) -> &str {
        "special.dummy"
    }

    async fn execute(&mut self, ctx: EntryContext) -> Result<JobResult, EntryError> {
        let mut result = ctx.previous;
        result.entry_nr = ctx.nr;
        Ok(result)
    }

    fn resets_errors_before_execution(&self) -> bool {
        false
    }
}

pub struct DummyEntryFactory;

impl EntryFactory for DummyEntryFactory {
    fn create(&self, _config: &EntryConfig) -> Result<Box<dyn UnitExecutor>, EntryError> {
        Ok(Box::new(DummyEntry))
    }

    fn entry_type(&self) -> &str {
        "special.dummy"
    }

    fn metadata(&self) -> EntryTypeMetadata {
        EntryTypeMetadata {
            description: "Passes the previous result through".to_string(),
            category: "special".to_string(),
        }
    }
}
