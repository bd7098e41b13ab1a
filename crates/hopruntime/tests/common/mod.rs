#![allow(dead_code)]

use async_trait::async_trait;
use hopcore::{
    Entry, EntryContext, EntryError, EventBus, Hop, JobGraph, JobResult, Row, UnitExecutor,
    Variables,
};
use hopruntime::JobRunner;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn runner() -> JobRunner {
    JobRunner::new(Arc::new(EventBus::new(256)))
}

/// Invocation counter shared between an executor and its clones
#[derive(Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Clone)]
enum Behaviour {
    Succeed,
    Fail(u64),
    /// Claims success while reporting errors
    Inconsistent(u64),
    /// Fails the first `n` invocations, then succeeds
    FailTimes(usize),
    Panic,
    PassThrough,
    /// Stops the run on the `n`th invocation
    StopOn(usize),
}

/// Executor whose outcome is fixed by the test
#[derive(Clone)]
pub struct Scripted {
    behaviour: Behaviour,
    calls: Calls,
    delay: Option<Duration>,
    rows: Vec<Row>,
    evaluates: bool,
    resets: bool,
    requires: Vec<String>,
    seen: Arc<Mutex<Vec<ContextSnapshot>>>,
    bound: Option<Variables>,
}

/// What an executor observed when it ran
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub nr: u32,
    pub previous: JobResult,
    pub transaction_id: Option<String>,
    pub bound: Option<Variables>,
}

impl Scripted {
    fn with_behaviour(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            calls: Calls::default(),
            delay: None,
            rows: Vec::new(),
            evaluates: true,
            resets: true,
            requires: Vec::new(),
            seen: Arc::new(Mutex::new(Vec::new())),
            bound: None,
        }
    }

    pub fn succeed() -> Self {
        Self::with_behaviour(Behaviour::Succeed)
    }

    pub fn fail(errors: u64) -> Self {
        Self::with_behaviour(Behaviour::Fail(errors))
    }

    pub fn inconsistent(errors: u64) -> Self {
        Self::with_behaviour(Behaviour::Inconsistent(errors))
    }

    pub fn fail_times(times: usize) -> Self {
        Self::with_behaviour(Behaviour::FailTimes(times))
    }

    pub fn panicking() -> Self {
        Self::with_behaviour(Behaviour::Panic)
    }

    /// Hands the previous result on and keeps its error count
    pub fn pass_through() -> Self {
        let mut scripted = Self::with_behaviour(Behaviour::PassThrough);
        scripted.resets = false;
        scripted
    }

    pub fn stop_on(invocation: usize) -> Self {
        Self::with_behaviour(Behaviour::StopOn(invocation))
    }

    pub fn slow(mut self, millis: u64) -> Self {
        self.delay = Some(Duration::from_millis(millis));
        self
    }

    pub fn with_row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }

    pub fn non_evaluating(mut self) -> Self {
        self.evaluates = false;
        self
    }

    pub fn requiring(mut self, name: &str) -> Self {
        self.requires.push(name.to_string());
        self
    }

    pub fn calls(&self) -> Calls {
        self.calls.clone()
    }

    pub fn seen(&self) -> Arc<Mutex<Vec<ContextSnapshot>>> {
        Arc::clone(&self.seen)
    }
}

#[async_trait]
impl UnitExecutor for Scripted {
    fn entry_type(&self) -> &str {
        "test.scripted"
    }

    async fn execute(&mut self, ctx: EntryContext) -> Result<JobResult, EntryError> {
        let invocation = self.calls.bump();
        self.seen.lock().unwrap().push(ContextSnapshot {
            nr: ctx.nr,
            previous: ctx.previous.clone(),
            transaction_id: ctx.transaction_id.clone(),
            bound: self.bound.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut result = match &self.behaviour {
            Behaviour::Succeed => JobResult::succeeded(ctx.nr),
            Behaviour::Fail(errors) => JobResult::failed(ctx.nr, *errors, "scripted failure"),
            Behaviour::Inconsistent(errors) => {
                let mut result = JobResult::succeeded(ctx.nr);
                result.nr_errors = *errors;
                result
            }
            Behaviour::FailTimes(times) if invocation <= *times => {
                JobResult::failed(ctx.nr, 1, "not yet")
            }
            Behaviour::FailTimes(_) => JobResult::succeeded(ctx.nr),
            Behaviour::Panic => panic!("scripted panic"),
            Behaviour::PassThrough => ctx.previous.clone(),
            Behaviour::StopOn(n) => {
                if invocation >= *n {
                    ctx.run.stop();
                }
                JobResult::succeeded(ctx.nr)
            }
        };
        result.rows.extend(self.rows.iter().cloned());
        Ok(result)
    }

    fn evaluates(&self) -> bool {
        self.evaluates
    }

    fn resets_errors_before_execution(&self) -> bool {
        self.resets
    }

    fn required_variables(&self) -> Vec<String> {
        self.requires.clone()
    }

    fn bind_variables(&mut self, variables: &Variables) {
        self.bound = Some(variables.clone());
    }
}

/// Start marker used by the walker tests
pub fn start() -> Entry {
    Entry::new("START", Scripted::succeed().non_evaluating()).start()
}

/// `START -> names[0] -> names[1] -> ...` with unconditional hops
pub fn chain(name: &str, executors: Vec<(&str, Scripted)>) -> JobGraph {
    let mut graph = JobGraph::new(name);
    let mut previous = graph.add_entry(start());
    for (entry_name, executor) in executors {
        let next = graph.add_entry(Entry::new(entry_name, executor));
        graph
            .add_hop(previous, next, Hop::unconditional())
            .unwrap();
        previous = next;
    }
    graph
}
