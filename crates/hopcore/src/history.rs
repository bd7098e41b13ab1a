use crate::{EntryKey, JobResult, ResultSummary, SinkError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One record of a run's execution history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub job_name: String,
    /// `None` for job-level records (started / finished)
    pub entry: Option<EntryKey>,
    pub comment: String,
    /// Why the entry was launched, e.g. "followed link after success"
    pub reason: Option<String>,
    pub result: Option<ResultSummary>,
    pub elapsed_ms: u64,
    /// Synthetic record written when a run restarts at a checkpoint
    pub is_checkpoint: bool,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn job(job_name: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            entry: None,
            comment: comment.into(),
            reason: None,
            result: None,
            elapsed_ms: 0,
            is_checkpoint: false,
            timestamp: Utc::now(),
        }
    }

    pub fn finished_entry(
        job_name: impl Into<String>,
        entry: EntryKey,
        result: &JobResult,
        elapsed_ms: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            entry: Some(entry),
            comment: "Job entry finished".to_string(),
            reason: Some(reason.into()),
            result: Some(result.summary()),
            elapsed_ms,
            is_checkpoint: false,
            timestamp: Utc::now(),
        }
    }

    pub fn restarted_at(job_name: impl Into<String>, entry: EntryKey, result: &JobResult) -> Self {
        Self {
            job_name: job_name.into(),
            entry: Some(entry),
            comment: "Job restarted at checkpoint".to_string(),
            reason: None,
            result: Some(result.summary()),
            elapsed_ms: 0,
            is_checkpoint: true,
            timestamp: Utc::now(),
        }
    }

    pub fn with_result(mut self, result: &JobResult) -> Self {
        self.result = Some(result.summary());
        self
    }
}

/// Optional streaming consumer of history records (e.g. a live progress view)
pub trait HistorySink: Send + Sync {
    fn record(&self, entry: &HistoryEntry) -> Result<(), SinkError>;
}
