//! The job walker: recursive traversal of a job graph.
//!
//! A run starts at the start entry (or at a checkpoint entry when resuming)
//! and follows hops entry by entry. An entry flagged `launches_in_parallel`
//! fires all its hops as spawned branches and joins them before returning;
//! any other entry follows its hops one after the other. Results of parallel
//! branches are folded into the result of the entry that launched them.
//!
//! # Step
//!
//! 1. Return a stopped result if the run was asked to stop.
//! 2. Restore the checkpoint result if this entry is the resume point,
//!    otherwise execute a fresh clone of the entry's executor.
//! 3. Record history, count errors, persist a checkpoint if required.
//! 4. Evaluate hops in declared order and follow the ones that fire.
//! 5. Join parallel branches, fold their results, and force
//!    `success = false` whenever errors were counted.

use crate::checkpoint::{CheckpointCoordinator, CheckpointStore};
use crate::listener::JobListener;
use crate::registry::EntryRegistry;
use crate::state::{RunState, RunStatus, DEFAULT_MAX_HISTORY};
use crate::transaction::{TransactionGroupAllocator, UuidTransactionAllocator};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use hopcore::{
    EngineError, EntryContext, EntryError, EntryRef, EventBus, GraphError, HistoryEntry,
    HistorySink, JobDefinition, JobEvent, JobGraph, JobResult, RunControl, Variables,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Per-run options
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Run state of the invoking run, for nested jobs
    pub parent: Option<Arc<RunState>>,
    pub ignore_checkpoints: bool,
    /// History records kept; defaults to the runner's setting. 0 keeps everything.
    pub max_history: Option<usize>,
    /// Track the entries currently executing
    pub interactive: bool,
    /// Stop the run with an error once this many steps were taken
    pub max_steps: Option<u64>,
    pub variables: Variables,
    /// Result handed to the first entry as its previous result
    pub initial_result: Option<JobResult>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(mut self, parent: Arc<RunState>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn ignoring_checkpoints(mut self) -> Self {
        self.ignore_checkpoints = true;
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = Some(max_history);
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.set(name, value);
        self
    }

    pub fn with_initial_result(mut self, result: JobResult) -> Self {
        self.initial_result = Some(result);
        self
    }
}

/// Launches job runs against a set of collaborators
#[derive(Clone)]
pub struct JobRunner {
    events: Arc<EventBus>,
    registry: Option<Arc<EntryRegistry>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    history_sink: Option<Arc<dyn HistorySink>>,
    allocator: Arc<dyn TransactionGroupAllocator>,
    listeners: Vec<Arc<dyn JobListener>>,
    max_history: usize,
}

impl JobRunner {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            events,
            registry: None,
            checkpoints: None,
            history_sink: None,
            allocator: Arc::new(UuidTransactionAllocator),
            listeners: Vec::new(),
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    /// Registry used to build nested job definitions
    pub fn with_registry(mut self, registry: Arc<EntryRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_history_sink(mut self, sink: Arc<dyn HistorySink>) -> Self {
        self.history_sink = Some(sink);
        self
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn TransactionGroupAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn JobListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Create the run state of a new invocation without starting it
    pub fn prepare(&self, graph: Arc<JobGraph>, options: RunOptions) -> JobRun {
        let transaction_id = if graph.settings().unique_connections {
            options
                .parent
                .as_ref()
                .and_then(|parent| parent.transaction_id().map(str::to_string))
                .or_else(|| Some(self.allocator.next_id()))
        } else {
            None
        };

        let mut state = RunState::new(graph.name())
            .with_max_history(options.max_history.unwrap_or(self.max_history))
            .with_transaction_id(transaction_id)
            .interactive(options.interactive)
            .ignoring_checkpoints(options.ignore_checkpoints);
        if let Some(parent) = &options.parent {
            state = state
                .with_variables(parent.variables())
                .with_parent(Arc::clone(parent));
        }
        let state = Arc::new(state.with_variables(options.variables.clone()));

        JobRun {
            runner: self.clone(),
            graph,
            state,
            max_steps: options.max_steps,
            initial_result: options.initial_result,
        }
    }

    /// Run a job to completion
    pub async fn run(&self, graph: Arc<JobGraph>, options: RunOptions) -> Result<JobResult, EngineError> {
        self.prepare(graph, options).execute().await
    }

    /// Run a job in the background
    pub fn start(&self, graph: Arc<JobGraph>, options: RunOptions) -> RunHandle {
        let run = self.prepare(graph, options);
        let state = Arc::clone(run.state());
        let handle = tokio::spawn(run.execute());
        RunHandle { state, handle }
    }
}

/// Handle on a job running in the background
pub struct RunHandle {
    state: Arc<RunState>,
    handle: JoinHandle<Result<JobResult, EngineError>>,
}

impl RunHandle {
    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    /// Cooperative stop: entries already executing are allowed to finish
    pub fn stop(&self) {
        self.state.stop();
    }

    pub fn status(&self) -> RunStatus {
        self.state.status()
    }

    pub async fn wait(self) -> Result<JobResult, EngineError> {
        self.handle.await.map_err(|e| EngineError::BranchJoin {
            entry: self.state.job_name().to_string(),
            message: e.to_string(),
        })?
    }
}

/// A prepared invocation of one job
pub struct JobRun {
    runner: JobRunner,
    graph: Arc<JobGraph>,
    state: Arc<RunState>,
    max_steps: Option<u64>,
    initial_result: Option<JobResult>,
}

impl JobRun {
    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    pub fn stop(&self) {
        self.state.stop();
    }

    pub fn status(&self) -> RunStatus {
        self.state.status()
    }

    pub async fn execute(self) -> Result<JobResult, EngineError> {
        let JobRun {
            runner,
            graph,
            state,
            max_steps,
            initial_result,
        } = self;
        let started = Instant::now();
        let job_name = graph.name().to_string();

        state.mark_started();
        for listener in &runner.listeners {
            listener.job_started(&state);
        }
        runner.events.emit(JobEvent::JobStarted {
            execution_id: state.execution_id(),
            job_name: job_name.clone(),
            timestamp: Utc::now(),
        });
        state.push_history(HistoryEntry::job(&job_name, "Job started"));
        tracing::info!(job = %job_name, execution_id = %state.execution_id(), "job started");

        let checkpoints = match (&runner.checkpoints, &graph.settings().checkpoints) {
            (Some(store), Some(policy)) => Some(Arc::new(CheckpointCoordinator::new(
                Arc::clone(store),
                policy.clone(),
                job_name.clone(),
                &state,
            ))),
            _ => None,
        };

        let walker = Arc::new(Walker {
            runner: runner.clone(),
            graph: Arc::clone(&graph),
            state: Arc::clone(&state),
            checkpoints: checkpoints.clone(),
            max_steps,
        });

        let outcome = walker.walk(initial_result).await;

        let outcome = match outcome {
            Ok(mut result) => {
                if state.is_stopped() {
                    result.stopped = true;
                    result.success = false;
                }
                result.enforce_error_invariant();
                match &checkpoints {
                    Some(coordinator) => coordinator
                        .finish(&result)
                        .await
                        .map(|()| result)
                        .map_err(EngineError::from),
                    None => Ok(result),
                }
            }
            Err(e) => Err(e),
        };

        let final_result = match &outcome {
            Ok(result) => result.clone(),
            Err(e) => {
                tracing::error!(job = %job_name, error = %e, "job failed");
                let mut failed = e
                    .partial_result()
                    .cloned()
                    .unwrap_or_else(|| JobResult::failed(0, 1, e.to_string()));
                failed.nr_errors = failed.nr_errors.max(1);
                failed.enforce_error_invariant();
                state.add_errors(1);
                failed
            }
        };

        state.push_history(HistoryEntry::job(&job_name, "Job finished").with_result(&final_result));
        state.mark_finished(final_result.clone());
        for listener in &runner.listeners {
            listener.job_finished(&state, &final_result);
        }
        runner.events.emit(JobEvent::JobFinished {
            execution_id: state.execution_id(),
            job_name: job_name.clone(),
            success: final_result.success,
            nr_errors: final_result.nr_errors,
            stopped: final_result.stopped,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        tracing::info!(
            job = %job_name,
            success = final_result.success,
            nr_errors = final_result.nr_errors,
            stopped = final_result.stopped,
            "job finished"
        );

        outcome
    }
}

/// Everything a step needs, shared by all branches of one run
struct Walker {
    runner: JobRunner,
    graph: Arc<JobGraph>,
    state: Arc<RunState>,
    checkpoints: Option<Arc<CheckpointCoordinator>>,
    max_steps: Option<u64>,
}

impl Walker {
    async fn walk(self: &Arc<Self>, initial_result: Option<JobResult>) -> Result<JobResult, EngineError> {
        if let Some(coordinator) = &self.checkpoints {
            coordinator.prepare(&self.graph, &self.state).await?;
        }

        let start = self
            .state
            .checkpoint()
            .resume_entry
            .or_else(|| self.graph.find_start())
            .ok_or_else(|| GraphError::NoStartEntry(self.graph.name().to_string()))?;

        let start_entry = self.graph.entry(start);
        if !(start_entry.is_start && start_entry.repeat) {
            return Arc::clone(self)
                .step(start, initial_result, 0, "Started".to_string())
                .await;
        }

        // Repeating start entry: the last iteration's result is the run's result.
        let mut result = None;
        let mut iteration: u64 = 0;
        while !self.state.is_stopped() {
            let previous = initial_result.clone();
            result = Some(
                Arc::clone(self)
                    .step(start, previous, 0, "Started".to_string())
                    .await?,
            );
            iteration += 1;
            if iteration % 500 == 0 {
                tracing::info!(job = %self.graph.name(), iteration, "repeating job");
            }
        }
        Ok(result.unwrap_or_else(|| JobResult::stopped(0)))
    }

    fn step(
        self: Arc<Self>,
        id: EntryRef,
        previous: Option<JobResult>,
        nr: u32,
        reason: String,
    ) -> BoxFuture<'static, Result<JobResult, EngineError>> {
        async move {
            if self.state.is_stopped() {
                return Ok(JobResult::stopped(nr));
            }
            if let Some(max_steps) = self.max_steps {
                if self.state.count_step() > max_steps {
                    tracing::error!(job = %self.graph.name(), max_steps, "step limit exceeded, stopping");
                    self.state.stop();
                    return Err(EngineError::StepLimitExceeded(max_steps));
                }
            }

            let graph = Arc::clone(&self.graph);
            let entry = graph.entry(id);
            let previous = previous.unwrap_or_else(|| JobResult::new(nr));

            let result = match self.state.take_resume(id) {
                Some((stored, parameters)) => self.restore_checkpoint(id, stored, &parameters),
                None => self.execute_entry(id, previous, nr, &reason).await?,
            };

            let mut last_sequential: Option<JobResult> = None;
            let mut branches: Vec<(String, JoinHandle<Result<JobResult, EngineError>>)> = Vec::new();

            for next in graph.outgoing_hops(id) {
                if self.state.is_stopped() {
                    break;
                }
                if !next.hop.fires(entry.evaluates, result.success) {
                    tracing::debug!(from = %entry.key, to = %graph.entry(next.to).key, "hop not followed");
                    continue;
                }

                let next_entry = graph.entry(next.to);
                let next_reason = if next.hop.unconditional {
                    "Followed unconditional link"
                } else if result.success {
                    "Followed link after success"
                } else {
                    "Followed link after failure"
                };

                let mut carried = result.clone();
                if next_entry.reset_errors_before_execution {
                    carried.nr_errors = 0;
                }

                if entry.launches_in_parallel {
                    let branch = Arc::clone(&self).step(next.to, Some(carried), nr + 1, next_reason.to_string());
                    branches.push((next_entry.key.to_string(), tokio::spawn(branch)));
                    tracing::info!(entry = %next_entry.key, "launched job entry in parallel");
                } else {
                    tracing::info!(entry = %next_entry.key, "starting job entry");
                    let sub = Arc::clone(&self)
                        .step(next.to, Some(carried), nr + 1, next_reason.to_string())
                        .await?;
                    tracing::info!(entry = %next_entry.key, success = sub.success, "finished job entry");
                    last_sequential = Some(sub);
                }
            }

            // Join every branch before looking at any failure.
            let mut branch_results = Vec::with_capacity(branches.len());
            let mut first_error: Option<EngineError> = None;
            for (name, handle) in branches {
                let branch_error = match handle.await {
                    Ok(Ok(branch_result)) => {
                        branch_results.push(branch_result);
                        continue;
                    }
                    Ok(Err(e)) => e,
                    Err(join_error) => EngineError::BranchJoin {
                        entry: name.clone(),
                        message: join_error.to_string(),
                    },
                };
                tracing::error!(entry = %name, error = %branch_error, "unexpected error in parallel branch");
                branch_results.push(JobResult::failed(nr + 1, 1, branch_error.to_string()));
                first_error.get_or_insert(branch_error);
            }

            let mut folded = last_sequential.unwrap_or(result);
            for branch_result in &branch_results {
                folded.add(branch_result);
            }
            folded.enforce_error_invariant();

            match first_error {
                Some(source) => Err(EngineError::ParallelBranch {
                    entry: entry.key.to_string(),
                    source: Box::new(source),
                    partial: Box::new(folded),
                }),
                None => Ok(folded),
            }
        }
        .boxed()
    }

    fn restore_checkpoint(
        &self,
        id: EntryRef,
        stored: JobResult,
        parameters: &std::collections::HashMap<String, String>,
    ) -> JobResult {
        let entry = self.graph.entry(id);
        let result = match &self.checkpoints {
            Some(coordinator) => coordinator.restore(stored, parameters, &self.state),
            None => stored,
        };

        self.state
            .push_history(HistoryEntry::restarted_at(self.graph.name(), entry.key.clone(), &result));
        self.runner.events.emit(JobEvent::CheckpointRestored {
            execution_id: self.state.execution_id(),
            entry: entry.key.clone(),
            attempt: self.state.run_attempt(),
            timestamp: Utc::now(),
        });
        tracing::info!(entry = %entry.key, "restarting from checkpoint job entry");
        result
    }

    async fn execute_entry(
        self: &Arc<Self>,
        id: EntryRef,
        previous: JobResult,
        nr: u32,
        reason: &str,
    ) -> Result<JobResult, EngineError> {
        let entry = self.graph.entry(id);
        let variables = self.state.variables();

        let mut executor = entry.clone_executor();
        hopcore::VariableBinder::copy_into(&variables, executor.as_mut());

        let emitter = self
            .runner
            .events
            .create_emitter(self.state.execution_id(), entry.key.clone());
        let ctx = EntryContext {
            entry: entry.key.clone(),
            nr,
            previous,
            variables: variables.clone(),
            events: emitter.clone(),
            cancellation: self.state.cancellation().child_token(),
            transaction_id: self.state.transaction_id().map(str::to_string),
            run: Arc::new(RunContext {
                runner: self.runner.clone(),
                state: Arc::clone(&self.state),
            }),
        };

        tracing::debug!(entry = %entry.key, nr, reason, "executing job entry");
        self.state.enter_entry(&entry.key);
        self.runner.events.emit(JobEvent::EntryStarted {
            execution_id: self.state.execution_id(),
            entry: entry.key.clone(),
            entry_type: entry.entry_type.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        let missing = executor
            .required_variables()
            .into_iter()
            .find(|name| !variables.contains(name));
        let outcome = match missing {
            Some(name) => Ok(Err(EntryError::MissingVariable(name))),
            None => AssertUnwindSafe(executor.execute(ctx)).catch_unwind().await,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        // The entry's own lines come first, the failure reason last.
        let mut result = match outcome {
            Ok(Ok(mut result)) => {
                result.append_log(emitter.log_text());
                result
            }
            Ok(Err(e)) => {
                tracing::error!(entry = %entry.key, error = %e, "job entry failed");
                let mut failed = JobResult::failed(nr, 1, emitter.log_text());
                failed.append_log(e.to_string());
                failed
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(entry = %entry.key, panic = %message, "job entry panicked");
                let mut failed = JobResult::failed(nr, 1, emitter.log_text());
                failed.append_log(format!("entry panicked: {message}"));
                failed
            }
        };
        result.entry_nr = nr;
        self.state.leave_entry(&entry.key);

        self.state.add_errors(result.nr_errors);

        let record = HistoryEntry::finished_entry(self.graph.name(), entry.key.clone(), &result, elapsed_ms, reason);
        self.state.push_history(record.clone());
        if let Some(sink) = &self.runner.history_sink {
            if let Err(e) = sink.record(&record) {
                tracing::warn!(entry = %entry.key, error = %e, "history sink rejected record");
            }
        }
        self.runner.events.emit(JobEvent::EntryFinished {
            execution_id: self.state.execution_id(),
            entry: entry.key.clone(),
            success: result.success,
            nr_errors: result.nr_errors,
            duration_ms: elapsed_ms,
            timestamp: Utc::now(),
        });

        if entry.is_checkpoint {
            if let Some(coordinator) = &self.checkpoints {
                coordinator.save(entry, &result, &self.state).await?;
            }
        }

        Ok(result)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// [`RunControl`] handed to entries: lets them stop the run or start nested jobs
struct RunContext {
    runner: JobRunner,
    state: Arc<RunState>,
}

#[async_trait]
impl RunControl for RunContext {
    fn stop(&self) {
        self.state.stop();
    }

    fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    fn transaction_id(&self) -> Option<String> {
        self.state.transaction_id().map(str::to_string)
    }

    async fn run_nested(
        &self,
        job: &JobDefinition,
        previous: JobResult,
        variables: Variables,
    ) -> Result<JobResult, EntryError> {
        let registry = self.runner.registry.as_ref().ok_or_else(|| {
            EntryError::SubJob("no entry registry available to build nested jobs".to_string())
        })?;
        let graph = registry
            .build_graph(job)
            .map_err(|e| EntryError::SubJob(e.to_string()))?;

        let mut options = RunOptions::new()
            .with_parent(Arc::clone(&self.state))
            .with_initial_result(previous);
        options.variables = variables;
        options.ignore_checkpoints = self.state.ignore_checkpoints();

        self.runner
            .run(Arc::new(graph), options)
            .await
            .map_err(|e| EntryError::SubJob(e.to_string()))
    }
}
