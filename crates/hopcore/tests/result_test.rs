use hopcore::{JobResult, ResultFile, Row, Value};
use proptest::prelude::*;

fn arb_result() -> impl Strategy<Value = JobResult> {
    (
        any::<bool>(),
        0u64..5,
        prop::collection::vec(0i64..100, 0..3),
        prop::collection::vec("[a-z]{1,6}", 0..2),
        "[a-z ]{0,8}",
        any::<bool>(),
        0u64..50,
        0u64..50,
    )
        .prop_map(
            |(success, nr_errors, rows, files, log_text, stopped, lines_read, lines_written)| {
                let mut result = JobResult::new(0);
                result.success = success;
                result.nr_errors = nr_errors;
                result.rows = rows.into_iter().map(|n| Row::new().with("n", n)).collect();
                result.files = files.into_iter().map(ResultFile::new).collect();
                result.log_text = log_text.trim().to_string();
                result.stopped = stopped;
                result.lines_read = lines_read;
                result.lines_written = lines_written;
                result
            },
        )
}

fn folded(mut base: JobResult, others: &[&JobResult]) -> JobResult {
    for other in others {
        base.add(other);
    }
    base
}

proptest! {
    #[test]
    fn add_is_associative(a in arb_result(), b in arb_result(), c in arb_result()) {
        let left = folded(folded(a.clone(), &[&b]), &[&c]);
        let mut bc = b.clone();
        bc.add(&c);
        let right = folded(a, &[&bc]);
        prop_assert_eq!(left, right);
    }

    #[test]
    fn add_sums_counters_and_concatenates(a in arb_result(), b in arb_result()) {
        let sum = folded(a.clone(), &[&b]);
        prop_assert_eq!(sum.nr_errors, a.nr_errors + b.nr_errors);
        prop_assert_eq!(sum.lines_read, a.lines_read + b.lines_read);
        prop_assert_eq!(sum.lines_written, a.lines_written + b.lines_written);
        prop_assert_eq!(sum.rows.len(), a.rows.len() + b.rows.len());
        prop_assert_eq!(&sum.rows[..a.rows.len()], &a.rows[..]);
        prop_assert_eq!(&sum.files[a.files.len()..], &b.files[..]);
        prop_assert_eq!(sum.stopped, a.stopped || b.stopped);
        prop_assert_eq!(sum.success, a.success);
    }

    #[test]
    fn error_invariant_holds_after_enforcing(a in arb_result(), b in arb_result()) {
        let mut sum = folded(a, &[&b]);
        sum.enforce_error_invariant();
        prop_assert!(sum.nr_errors == 0 || !sum.success);
    }
}

#[test]
fn adding_an_empty_result_changes_nothing_but_the_flags_it_owns() {
    let base = JobResult::succeeded(1)
        .with_row(Row::new().with("id", 1i64))
        .with_file(ResultFile::new("/tmp/out.csv"));
    let mut sum = base.clone();
    sum.add(&JobResult::new(2));
    assert_eq!(sum, base);
}

#[test]
fn failed_result_carries_its_message() {
    let result = JobResult::failed(3, 2, "boom");
    assert!(!result.success);
    assert_eq!(result.nr_errors, 2);
    assert_eq!(result.entry_nr, 3);
    assert_eq!(result.log_text, "boom");
}

#[test]
fn log_text_is_joined_line_by_line() {
    let mut result = JobResult::succeeded(0);
    result.append_log("first");
    result.add(&JobResult::failed(1, 1, "second"));
    result.append_log("");
    assert_eq!(result.log_text, "first\nsecond");
}

#[test]
fn clone_is_a_deep_copy() {
    let original = JobResult::succeeded(0).with_row(Row::new().with("name", "a"));
    let mut copy = original.clone();
    copy.rows[0].set("name", "b");
    copy.nr_errors = 4;

    assert_eq!(original.rows[0].get("name"), Some(&Value::from("a")));
    assert_eq!(original.nr_errors, 0);
}

#[test]
fn summary_counts_rows_and_files() {
    let result = JobResult::succeeded(0)
        .with_row(Row::new())
        .with_row(Row::new())
        .with_file(ResultFile::new("a.txt").with_origin("Write file"));
    let summary = result.summary();
    assert_eq!(summary.nr_rows, 2);
    assert_eq!(summary.nr_files, 1);
    assert!(summary.success);
}

#[test]
fn result_survives_json_round_trip() {
    let result = JobResult::failed(2, 1, "bad input")
        .with_row(Row::new().with("id", 7i64).with("ok", false))
        .with_file(ResultFile::new("/data/in.csv"));
    let json = serde_json::to_string(&result).unwrap();
    let back: JobResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result);
}
