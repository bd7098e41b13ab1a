use crate::Row;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Outcome of one entry execution, or of a whole (sub)graph once folded.
///
/// The type itself does not enforce `nr_errors > 0 => !success`: the walker
/// re-establishes that after every fold. `Clone` is a deep copy and is the
/// only way a result crosses from one step to the next.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub success: bool,
    pub nr_errors: u64,
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default)]
    pub files: Vec<ResultFile>,
    #[serde(default)]
    pub log_text: String,
    #[serde(default)]
    pub stopped: bool,
    /// Invocation index of the entry that produced this result
    #[serde(default)]
    pub entry_nr: u32,
    #[serde(default)]
    pub exit_status: i32,
    #[serde(default)]
    pub lines_read: u64,
    #[serde(default)]
    pub lines_written: u64,
    #[serde(default)]
    pub lines_rejected: u64,
    #[serde(default)]
    pub files_retrieved: u64,
}

impl JobResult {
    pub fn new(entry_nr: u32) -> Self {
        Self {
            entry_nr,
            ..Self::default()
        }
    }

    pub fn succeeded(entry_nr: u32) -> Self {
        Self {
            success: true,
            entry_nr,
            ..Self::default()
        }
    }

    /// Failed result with the given error count and a log line describing why
    pub fn failed(entry_nr: u32, nr_errors: u64, message: impl Into<String>) -> Self {
        let mut result = Self {
            success: false,
            nr_errors,
            entry_nr,
            ..Self::default()
        };
        result.append_log(message);
        result
    }

    /// Result returned for a step that observed the stop flag
    pub fn stopped(entry_nr: u32) -> Self {
        Self {
            stopped: true,
            entry_nr,
            ..Self::default()
        }
    }

    pub fn with_row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }

    pub fn with_file(mut self, file: ResultFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn append_log(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        if !self.log_text.is_empty() && !self.log_text.ends_with('\n') {
            self.log_text.push('\n');
        }
        self.log_text.push_str(&text);
    }

    /// Merge another result into this one.
    ///
    /// Counters are summed, rows and files are concatenated, log text is
    /// appended and the stopped flags are OR-ed. The success flag is left
    /// alone; the caller derives it from the error count afterwards.
    pub fn add(&mut self, other: &JobResult) {
        self.nr_errors += other.nr_errors;
        self.lines_read += other.lines_read;
        self.lines_written += other.lines_written;
        self.lines_rejected += other.lines_rejected;
        self.files_retrieved += other.files_retrieved;
        self.rows.extend(other.rows.iter().cloned());
        self.files.extend(other.files.iter().cloned());
        self.append_log(other.log_text.clone());
        self.stopped |= other.stopped;
    }

    /// Force `success = false` when errors were counted
    pub fn enforce_error_invariant(&mut self) {
        if self.nr_errors > 0 {
            self.success = false;
        }
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            success: self.success,
            nr_errors: self.nr_errors,
            nr_rows: self.rows.len(),
            nr_files: self.files.len(),
            stopped: self.stopped,
        }
    }
}

/// File produced or touched by an entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResultFile {
    pub path: PathBuf,
    /// Name of the entry that produced the file
    pub origin: Option<String>,
    pub comment: Option<String>,
}

impl ResultFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            origin: None,
            comment: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// Compact view of a result kept in the execution history
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultSummary {
    pub success: bool,
    pub nr_errors: u64,
    pub nr_rows: usize,
    pub nr_files: usize,
    pub stopped: bool,
}
