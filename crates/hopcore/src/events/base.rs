use crate::{EntryKey, HistoryEntry, HistorySink, SinkError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted during a job run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    JobStarted {
        execution_id: ExecutionId,
        job_name: String,
        timestamp: DateTime<Utc>,
    },
    JobFinished {
        execution_id: ExecutionId,
        job_name: String,
        success: bool,
        nr_errors: u64,
        stopped: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    EntryStarted {
        execution_id: ExecutionId,
        entry: EntryKey,
        entry_type: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    EntryFinished {
        execution_id: ExecutionId,
        entry: EntryKey,
        success: bool,
        nr_errors: u64,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    CheckpointRestored {
        execution_id: ExecutionId,
        entry: EntryKey,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    EntryEvent {
        execution_id: ExecutionId,
        entry: EntryKey,
        event: EntryEvent,
        timestamp: DateTime<Utc>,
    },
    History(HistoryEntry),
}

/// Events raised by an entry while it executes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EntryEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
}

/// Event emitter handed to an executing entry.
///
/// Info and warning lines are also captured in a log buffer that the walker
/// copies into the entry's result once it returns.
#[derive(Clone)]
pub struct EntryEmitter {
    execution_id: ExecutionId,
    entry: EntryKey,
    sender: broadcast::Sender<JobEvent>,
    log: Arc<Mutex<String>>,
}

impl EntryEmitter {
    pub fn new(
        execution_id: ExecutionId,
        entry: EntryKey,
        sender: broadcast::Sender<JobEvent>,
    ) -> Self {
        Self {
            execution_id,
            entry,
            sender,
            log: Arc::new(Mutex::new(String::new())),
        }
    }

    /// Emit an entry-specific event
    pub fn emit(&self, event: EntryEvent) {
        let _ = self.sender.send(JobEvent::EntryEvent {
            execution_id: self.execution_id,
            entry: self.entry.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        self.capture(&message);
        self.emit(EntryEvent::Info { message });
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        self.capture(&format!("WARNING: {message}"));
        self.emit(EntryEvent::Warning { message });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(EntryEvent::Progress { percent, message });
    }

    /// Everything logged through this emitter (and its clones) so far
    pub fn log_text(&self) -> String {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn capture(&self, line: &str) {
        if let Ok(mut log) = self.log.lock() {
            if !log.is_empty() {
                log.push('\n');
            }
            log.push_str(line);
        }
    }
}

/// Broadcast bus carrying [`JobEvent`]s to any number of subscribers
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, entry: EntryKey) -> EntryEmitter {
        EntryEmitter::new(execution_id, entry, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Publishes history records on the bus so monitoring views can follow a run.
/// Having no subscriber is not an error.
impl HistorySink for EventBus {
    fn record(&self, entry: &HistoryEntry) -> Result<(), SinkError> {
        self.emit(JobEvent::History(entry.clone()));
        Ok(())
    }
}
