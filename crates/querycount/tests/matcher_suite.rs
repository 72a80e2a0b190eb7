//! Matcher verdicts and failure-report shape.

use std::sync::Arc;

use querycount::{FieldValue, Matchers, QueryBus};
use querycount_testkit::{FakeSession, init_test_tracing, mock_registry};

fn setup() -> (Matchers, FakeSession) {
    init_test_tracing();
    let bus = Arc::new(QueryBus::new());
    let matchers = Matchers::with_bus(mock_registry(), Arc::clone(&bus));
    (matchers, FakeSession::new(bus))
}

#[test]
fn only_creates_passes_on_exact_profile() {
    let (matchers, session) = setup();
    let result = matchers.only_creates(&[("MockUser", 2), ("MockPost", 1)], || {
        session.insert("mock_users");
        session.insert("mock_users");
        session.insert("mock_posts");
        session.select("mock_users"); // reads are invisible to the create matcher
    });
    assert!(result.is_ok());
}

#[test]
fn only_creates_fails_on_unexpected_entity() {
    let (matchers, session) = setup();
    let err = matchers
        .only_creates(&[("MockUser", 1)], || {
            session.insert("mock_users");
            session.insert("mock_posts");
        })
        .unwrap_err();
    let report = err.to_string();
    assert!(report.contains("Expected the block to create exactly"));
    assert!(report.contains("MockPost - expected: 0, got: 1"));
}

#[test]
fn zero_count_expectations_are_superfluous() {
    let (matchers, session) = setup();
    let result = matchers.only_creates(&[("MockUser", 1), ("MockPost", 0)], || {
        session.insert("mock_users");
    });
    assert!(result.is_ok());
}

#[test]
fn creates_none_detects_creation() {
    let (matchers, session) = setup();
    assert!(matchers.creates_none(|| session.select("mock_users")).is_ok());
    let err = matchers
        .creates_none(|| session.insert("mock_users"))
        .unwrap_err();
    assert!(err.to_string().contains("create no records"));
}

#[test]
fn loads_at_most_bounds_each_entity() {
    let (matchers, session) = setup();
    let result = matchers.loads_at_most(&[("MockUser", 2)], || {
        session.select("mock_users");
    });
    assert!(result.is_ok());

    let err = matchers
        .loads_at_most(&[("MockUser", 2)], || {
            session.select("mock_users");
            session.select("mock_posts"); // unmentioned entity
        })
        .unwrap_err();
    let report = err.to_string();
    assert!(report.contains("load at most"));
    // Only the offending entity is listed; MockUser stayed within bound.
    assert!(report.contains("MockPost - expected: 0, got: 1"));
    assert!(!report.contains("MockUser - expected"));
}

#[test]
fn loads_including_ignores_other_entities() {
    let (matchers, session) = setup();
    let result = matchers.loads_including(&[("MockUser", 1)], || {
        session.select("mock_users");
        session.select("mock_posts");
    });
    assert!(result.is_ok());

    let err = matchers
        .loads_including(&[("MockUser", 2)], || {
            session.select("mock_users");
        })
        .unwrap_err();
    assert!(err.to_string().contains("MockUser - expected: 2, got: 1"));
}

#[test]
fn only_updates_and_only_destroys() {
    let (matchers, session) = setup();
    let result = matchers.only_updates(&[("MockUser", 1)], || {
        session.update("mock_users", "name", "'renamed'");
    });
    assert!(result.is_ok());

    let result = matchers.only_destroys(&[("MockPost", 1)], || {
        session.named_destroy("MockPost", "mock_posts");
    });
    assert!(result.is_ok());

    assert!(matchers.destroys_none(|| session.select("mock_posts")).is_ok());
}

#[test]
fn field_values_exactly_is_order_insensitive() {
    let (matchers, session) = setup();
    let expected: &[(&str, &[FieldValue])] = &[(
        "MockUser",
        &[FieldValue::Text("b".into()), FieldValue::Text("a".into())],
    )];
    let result = matchers.field_values_exactly(expected, || {
        session.update("mock_users", "status", "'a'");
        session.update("mock_users", "status", "'b'");
    });
    assert!(result.is_ok());
}

#[test]
fn field_values_exactly_reports_difference() {
    let (matchers, session) = setup();
    let expected: &[(&str, &[FieldValue])] =
        &[("MockUser", &[FieldValue::Int(1), FieldValue::Int(2)])];
    let err = matchers
        .field_values_exactly(expected, || {
            session.update("mock_users", "id", "1");
        })
        .unwrap_err();
    let report = err.to_string();
    assert!(report.contains("Values that differed:"));
    assert!(report.contains("(difference: [2])"));
}

#[test]
fn field_values_at_least_allows_extras() {
    let (matchers, session) = setup();
    let expected: &[(&str, &[FieldValue])] = &[("MockUser", &[FieldValue::Int(1)])];
    let result = matchers.field_values_at_least(expected, || {
        session.update("mock_users", "id", "1");
        session.update("mock_users", "id", "2");
        session.update("mock_posts", "id", "3");
    });
    assert!(result.is_ok());
}

#[test]
fn field_values_at_least_fails_on_untouched_entity() {
    let (matchers, session) = setup();
    let expected: &[(&str, &[FieldValue])] = &[("MockPost", &[FieldValue::Int(7)])];
    let err = matchers
        .field_values_at_least(expected, || {
            session.update("mock_users", "id", "1");
        })
        .unwrap_err();
    assert!(err.to_string().contains("MockPost"));

    // The ignoring-missing variant tolerates exactly that case.
    let result = matchers.field_values_at_least_ignoring_missing(expected, || {
        session.update("mock_users", "id", "1");
    });
    assert!(result.is_ok());
}

#[test]
fn failure_report_lists_annotated_source_lines() {
    let (matchers, session) = setup();
    let err = matchers
        .creates_none(|| {
            session.annotated_insert("mock_users", "tests/app.rs:12");
            session.annotated_insert("mock_users", "tests/app.rs:12");
            session.annotated_insert("mock_users", "tests/app.rs:40");
        })
        .unwrap_err();
    let report = err.to_string();
    assert!(report.contains("Where the queries came from:"));
    assert!(report.contains("2 calls: tests/app.rs:12"));
    assert!(report.contains("1 call: tests/app.rs:40"));
    // Most frequent first.
    let first = report.find("tests/app.rs:12").unwrap();
    let second = report.find("tests/app.rs:40").unwrap();
    assert!(first < second);
}

#[test]
fn error_exposes_stats_for_custom_inspection() {
    let (matchers, session) = setup();
    let err = matchers
        .creates_none(|| session.insert("mock_users"))
        .unwrap_err();
    assert_eq!(err.stats().query_counts()["MockUser"], 1);
}

#[test]
fn work_result_flows_through_on_success() {
    use querycount::MatchResultExt;
    let (matchers, session) = setup();
    let value = matchers
        .only_creates(&[("MockUser", 1)], || {
            session.insert("mock_users");
            "done"
        })
        .or_fail();
    assert_eq!(value, "done");
}
