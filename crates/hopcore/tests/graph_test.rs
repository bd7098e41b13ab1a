use async_trait::async_trait;
use hopcore::{
    Entry, EntryContext, EntryError, EntrySpec, GraphError, Hop, JobDefinition, JobGraph,
    JobResult, UnitExecutor,
};

#[derive(Clone)]
struct Noop {
    evaluates: bool,
}

#[async_trait]
impl UnitExecutor for Noop {
    fn entry_type(&self) -> &str {
        "test.noop"
    }

    async fn execute(&mut self, ctx: EntryContext) -> Result<JobResult, EntryError> {
        Ok(JobResult::succeeded(ctx.nr))
    }

    fn evaluates(&self) -> bool {
        self.evaluates
    }
}

fn noop() -> Noop {
    Noop { evaluates: true }
}

#[test]
fn unconditional_hop_always_fires() {
    let hop = Hop::unconditional();
    assert!(hop.fires(true, true));
    assert!(hop.fires(true, false));
    assert!(hop.fires(false, false));
}

#[test]
fn conditional_hops_follow_the_result() {
    assert!(Hop::on_success().fires(true, true));
    assert!(!Hop::on_success().fires(true, false));
    assert!(Hop::on_failure().fires(true, false));
    assert!(!Hop::on_failure().fires(true, true));
}

#[test]
fn conditional_hops_never_fire_from_non_evaluating_entries() {
    assert!(!Hop::on_success().fires(false, true));
    assert!(!Hop::on_failure().fires(false, false));
}

#[test]
fn disabled_hops_never_fire() {
    assert!(!Hop::unconditional().disabled().fires(true, true));
    assert!(!Hop::on_success().disabled().fires(true, true));
}

#[test]
fn entry_takes_flags_from_its_executor() {
    let entry = Entry::new("Start", Noop { evaluates: false }).start();
    assert!(entry.is_start);
    assert!(!entry.evaluates);
    assert!(entry.reset_errors_before_execution);
    assert_eq!(entry.entry_type, "test.noop");
    assert_eq!(entry.key.to_string(), "Start.0");
}

#[test]
fn outgoing_hops_keep_declared_order_and_skip_disabled() {
    let mut graph = JobGraph::new("order");
    let start = graph.add_entry(Entry::new("Start", noop()).start());
    let c = graph.add_entry(Entry::new("C", noop()));
    let a = graph.add_entry(Entry::new("A", noop()));
    let b = graph.add_entry(Entry::new("B", noop()));

    graph.add_hop(start, c, Hop::on_success()).unwrap();
    graph.add_hop(start, a, Hop::unconditional().disabled()).unwrap();
    graph.add_hop(start, b, Hop::on_failure()).unwrap();
    graph.add_hop(start, a, Hop::on_success()).unwrap();

    let targets: Vec<_> = graph
        .outgoing_hops(start)
        .iter()
        .map(|next| graph.entry(next.to).name().to_string())
        .collect();
    assert_eq!(targets, vec!["C", "B", "A"]);
}

#[test]
fn find_entry_uses_name_and_copy() {
    let mut graph = JobGraph::new("copies");
    graph.add_entry(Entry::new("Start", noop()).start());
    let first = graph.add_entry(Entry::new("Load", noop()));
    let second = graph.add_entry(Entry::new("Load", noop()).with_copy_nr(1));

    assert_eq!(graph.find_entry("Load", 0), Some(first));
    assert_eq!(graph.find_entry("Load", 1), Some(second));
    assert_eq!(graph.find_entry("Load", 2), None);
    assert!(graph.validate().is_ok());
}

#[test]
fn validate_requires_exactly_one_start() {
    let mut graph = JobGraph::new("no start");
    graph.add_entry(Entry::new("A", noop()));
    assert_eq!(
        graph.validate(),
        Err(GraphError::NoStartEntry("no start".to_string()))
    );

    graph.add_entry(Entry::new("S1", noop()).start());
    graph.add_entry(Entry::new("S2", noop()).start());
    assert!(matches!(
        graph.validate(),
        Err(GraphError::DuplicateStart { .. })
    ));
}

#[test]
fn validate_rejects_duplicate_keys() {
    let mut graph = JobGraph::new("dupes");
    graph.add_entry(Entry::new("Start", noop()).start());
    graph.add_entry(Entry::new("A", noop()));
    graph.add_entry(Entry::new("A", noop()));
    assert_eq!(
        graph.validate(),
        Err(GraphError::DuplicateEntry {
            name: "A".to_string(),
            copy_nr: 0
        })
    );
}

#[test]
fn cycles_are_reported_but_legal() {
    let mut graph = JobGraph::new("loop");
    let start = graph.add_entry(Entry::new("Start", noop()).start());
    let a = graph.add_entry(Entry::new("A", noop()));
    let b = graph.add_entry(Entry::new("B", noop()));
    graph.add_hop(start, a, Hop::unconditional()).unwrap();
    graph.add_hop(a, b, Hop::on_success()).unwrap();
    graph.add_hop(b, a, Hop::on_failure()).unwrap();

    assert!(graph.has_cycles());
    assert!(graph.validate().is_ok());
    assert_eq!(graph.hop_between(b, a), Some(&Hop::on_failure()));
}

#[test]
fn job_definition_parses_from_json() {
    let json = r#"{
        "name": "nightly",
        "entries": [
            { "name": "START", "entry_type": "special.start", "start": true },
            { "name": "Load", "entry_type": "time.delay", "config": { "delay_ms": 10 }, "checkpoint": true }
        ],
        "hops": [
            { "from": "START", "to": "Load", "unconditional": true }
        ],
        "settings": {
            "unique_connections": true,
            "checkpoints": { "namespace_parameter": "RUN_DATE", "max_attempts": 3 }
        }
    }"#;

    let job: JobDefinition = serde_json::from_str(json).unwrap();
    assert_eq!(job.entries.len(), 2);
    assert!(job.entries[1].checkpoint);
    assert!(job.hops[0].enabled);
    assert!(job.hops[0].hop().unconditional);

    let policy = job.settings.checkpoints.unwrap();
    assert_eq!(policy.max_attempts, Some(3));
    assert!(policy.save_parameters);
    assert!(!policy.save_result_rows);
}

#[test]
fn connect_records_hops_by_key() {
    let mut job = JobDefinition::new("builder");
    let start = job.add_entry(EntrySpec::new("START", "special.start").as_start());
    let load = job.add_entry(EntrySpec::new("Load", "data.rows").with_copy_nr(2));
    job.connect(&start, &load, Hop::on_failure());

    assert_eq!(job.hops[0].to_key(), load);
    assert!(!job.hops[0].on_success);
    assert!(job.find_entry(&load).is_some());
}
