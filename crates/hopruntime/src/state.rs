//! Mutable state of one job invocation.
//!
//! `RunState` is the only object shared between concurrently running
//! branches of a run. Flags and counters are atomics; everything else sits
//! behind short-lived `std::sync` locks that are never held across an await.

use chrono::{DateTime, Utc};
use hopcore::{EntryKey, EntryRef, ExecutionId, HistoryEntry, JobResult, Variables};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default number of history records kept per run
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// Number of records dropped at once when the history overflows
pub const HISTORY_TRIM_BLOCK: usize = 50;

/// Externally visible lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Waiting,
    Running,
    Halting,
    Stopped,
    Finished,
    FinishedWithErrors,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunStatus::Waiting => "Waiting",
            RunStatus::Running => "Running",
            RunStatus::Halting => "Halting",
            RunStatus::Stopped => "Stopped",
            RunStatus::Finished => "Finished",
            RunStatus::FinishedWithErrors => "Finished (with errors)",
        };
        f.write_str(text)
    }
}

/// Checkpoint bookkeeping of a run
#[derive(Debug, Clone)]
pub struct CheckpointState {
    /// Entry to restart at; consumed by the first step that reaches it
    pub resume_entry: Option<EntryRef>,
    pub result: Option<JobResult>,
    pub parameters: HashMap<String, String>,
    /// Identifies the logical run across attempts; allocated on first save
    pub run_id: Option<Uuid>,
    pub run_attempt: u32,
    pub run_start_date: DateTime<Utc>,
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self {
            resume_entry: None,
            result: None,
            parameters: HashMap::new(),
            run_id: None,
            run_attempt: 1,
            run_start_date: Utc::now(),
        }
    }
}

pub struct RunState {
    execution_id: ExecutionId,
    job_name: String,
    parent: Option<Arc<RunState>>,

    initialized: AtomicBool,
    active: AtomicBool,
    stopped: AtomicBool,
    finished: AtomicBool,
    nr_errors: AtomicU64,
    steps: AtomicU64,

    max_history: usize,
    history: Mutex<VecDeque<HistoryEntry>>,

    transaction_id: Option<String>,
    ignore_checkpoints: bool,
    checkpoint: Mutex<CheckpointState>,

    variables: RwLock<Variables>,
    /// Present only for interactive runs
    active_entries: Option<Mutex<HashMap<EntryKey, usize>>>,
    final_result: Mutex<Option<JobResult>>,
    cancellation: CancellationToken,
}

impl RunState {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            job_name: job_name.into(),
            parent: None,
            initialized: AtomicBool::new(false),
            active: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            nr_errors: AtomicU64::new(0),
            steps: AtomicU64::new(0),
            max_history: DEFAULT_MAX_HISTORY,
            history: Mutex::new(VecDeque::new()),
            transaction_id: None,
            ignore_checkpoints: false,
            checkpoint: Mutex::new(CheckpointState::default()),
            variables: RwLock::new(Variables::new()),
            active_entries: None,
            final_result: Mutex::new(None),
            cancellation: CancellationToken::new(),
        }
    }

    /// Child state of a nested run: it observes the parent's stop flag
    pub fn with_parent(mut self, parent: Arc<RunState>) -> Self {
        self.cancellation = parent.cancellation.child_token();
        self.parent = Some(parent);
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: Option<String>) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    pub fn with_variables(self, variables: Variables) -> Self {
        if let Ok(mut current) = self.variables.write() {
            current.extend(&variables);
        }
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.active_entries = interactive.then(|| Mutex::new(HashMap::new()));
        self
    }

    pub fn ignoring_checkpoints(mut self, ignore: bool) -> Self {
        self.ignore_checkpoints = ignore;
        self
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn parent(&self) -> Option<&Arc<RunState>> {
        self.parent.as_ref()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn ignore_checkpoints(&self) -> bool {
        self.ignore_checkpoints
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    // -- lifecycle flags ----------------------------------------------------

    pub(crate) fn mark_started(&self) {
        self.finished.store(false, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_finished(&self, result: JobResult) {
        if let Ok(mut slot) = self.final_result.lock() {
            *slot = Some(result);
        }
        self.active.store(false, Ordering::SeqCst);
        self.finished.store(true, Ordering::SeqCst);
    }

    /// Ask the run to stop. Safe to call from any task, any number of times.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.cancellation.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|parent| parent.is_stopped())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn final_result(&self) -> Option<JobResult> {
        self.final_result.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn status(&self) -> RunStatus {
        if !self.is_initialized() {
            return RunStatus::Waiting;
        }
        let stopped = self.is_stopped();
        if self.is_active() {
            return if stopped {
                RunStatus::Halting
            } else {
                RunStatus::Running
            };
        }
        if stopped {
            return RunStatus::Stopped;
        }
        let with_errors = self
            .final_result()
            .is_some_and(|result| result.nr_errors > 0);
        if with_errors {
            RunStatus::FinishedWithErrors
        } else {
            RunStatus::Finished
        }
    }

    // -- counters -----------------------------------------------------------

    pub fn nr_errors(&self) -> u64 {
        self.nr_errors.load(Ordering::SeqCst)
    }

    pub(crate) fn add_errors(&self, nr: u64) {
        if nr > 0 {
            self.nr_errors.fetch_add(nr, Ordering::SeqCst);
        }
    }

    pub fn reset_errors(&self) {
        self.nr_errors.store(0, Ordering::SeqCst);
    }

    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }

    /// Count one more step; returns the new total
    pub(crate) fn count_step(&self) -> u64 {
        self.steps.fetch_add(1, Ordering::SeqCst) + 1
    }

    // -- history ------------------------------------------------------------

    pub(crate) fn push_history(&self, record: HistoryEntry) {
        let mut history = lock(&self.history);
        history.push_back(record);
        if self.max_history > 0 && history.len() > self.max_history + HISTORY_TRIM_BLOCK {
            history.drain(..HISTORY_TRIM_BLOCK);
        }
    }

    /// Snapshot of the retained history, oldest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        lock(&self.history).iter().cloned().collect()
    }

    // -- variables ----------------------------------------------------------

    pub fn variables(&self) -> Variables {
        self.variables
            .read()
            .map(|vars| vars.clone())
            .unwrap_or_default()
    }

    pub fn set_variable(&self, name: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut vars) = self.variables.write() {
            vars.set(name, value);
        }
    }

    pub(crate) fn merge_variables(&self, values: &HashMap<String, String>) {
        if let Ok(mut vars) = self.variables.write() {
            for (name, value) in values {
                vars.set(name.clone(), value.clone());
            }
        }
    }

    // -- interactive monitoring ---------------------------------------------

    pub(crate) fn enter_entry(&self, key: &EntryKey) {
        if let Some(active) = &self.active_entries {
            *lock(active).entry(key.clone()).or_insert(0) += 1;
        }
    }

    pub(crate) fn leave_entry(&self, key: &EntryKey) {
        if let Some(active) = &self.active_entries {
            let mut active = lock(active);
            if let Some(count) = active.get_mut(key) {
                *count -= 1;
                if *count == 0 {
                    active.remove(key);
                }
            }
        }
    }

    /// Entries currently executing; always empty for non-interactive runs
    pub fn active_entries(&self) -> Vec<EntryKey> {
        self.active_entries
            .as_ref()
            .map(|active| {
                let mut keys: Vec<_> = lock(active).keys().cloned().collect();
                keys.sort();
                keys
            })
            .unwrap_or_default()
    }

    // -- checkpoints --------------------------------------------------------

    pub fn checkpoint(&self) -> CheckpointState {
        lock(&self.checkpoint).clone()
    }

    pub fn run_attempt(&self) -> u32 {
        lock(&self.checkpoint).run_attempt
    }

    pub fn run_id(&self) -> Option<Uuid> {
        lock(&self.checkpoint).run_id
    }

    pub(crate) fn checkpoint_mut(&self) -> MutexGuard<'_, CheckpointState> {
        lock(&self.checkpoint)
    }

    /// Hand out the stored checkpoint result if `entry` is the resume point.
    /// The resume point is consumed so a later revisit executes normally.
    pub(crate) fn take_resume(&self, entry: EntryRef) -> Option<(JobResult, HashMap<String, String>)> {
        let mut checkpoint = lock(&self.checkpoint);
        if checkpoint.resume_entry != Some(entry) {
            return None;
        }
        checkpoint.resume_entry = None;
        let result = checkpoint.result.clone().unwrap_or_default();
        Some((result, checkpoint.parameters.clone()))
    }
}

impl fmt::Debug for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunState")
            .field("execution_id", &self.execution_id)
            .field("job_name", &self.job_name)
            .field("status", &self.status())
            .field("nr_errors", &self.nr_errors())
            .field("transaction_id", &self.transaction_id)
            .finish_non_exhaustive()
    }
}

/// A poisoned lock only means another branch panicked mid-update; the data
/// (history, counters by key) is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
