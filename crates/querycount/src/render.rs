//! Failure-message rendering.
//!
//! Builds the multi-line text an [`ExpectationError`](crate::ExpectationError)
//! carries: the expected/got header, one line per entity that differed, and
//! a most-frequent-first listing of the source locations the unexpected
//! queries were issued from (when statements carried line annotations).

use std::collections::{BTreeMap, BTreeSet};

use querycount_core::{FieldValue, QueryStats};

fn format_counts(counts: &BTreeMap<String, u64>) -> String {
    let body = counts
        .iter()
        .map(|(name, count)| format!("{name:?} => {count}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{body}}}")
}

fn format_values(values: &BTreeMap<String, Vec<FieldValue>>) -> String {
    let body = values
        .iter()
        .map(|(name, list)| {
            let items = list
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            format!("{name:?} => [{items}]")
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{body}}}")
}

fn format_value_list(list: &[FieldValue]) -> String {
    let items = list
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{items}]")
}

/// Per-entity annotated source lines, most frequent first. Empty when no
/// statement carried a line annotation.
fn source_lines_section(keys: &BTreeSet<String>, stats: &QueryStats) -> String {
    let by_frequency = stats.query_lines_by_frequency();
    let mut out = String::new();
    for key in keys {
        let Some(frequencies) = by_frequency.get(key) else {
            continue;
        };
        if frequencies.is_empty() {
            continue;
        }
        let mut lines: Vec<(&String, &u64)> = frequencies.iter().collect();
        lines.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        out.push_str(&format!("  {key}\n"));
        for (line, count) in lines {
            let noun = if *count == 1 { "call" } else { "calls" };
            out.push_str(&format!("    {count} {noun}: {line}\n"));
        }
    }
    if out.is_empty() {
        String::new()
    } else {
        format!("\nWhere the queries came from:\n\n{out}")
    }
}

/// Failure text for an exact count expectation. Every entity whose actual
/// count differs from its expected one is listed.
pub(crate) fn count_failure(
    operation: &str,
    expected: &BTreeMap<String, u64>,
    stats: &QueryStats,
) -> String {
    let actual = stats.query_counts();
    let differing: BTreeSet<String> = expected
        .keys()
        .chain(actual.keys())
        .filter(|key| expected.get(*key) != actual.get(*key))
        .cloned()
        .collect();
    count_failure_for(operation, expected, stats, &differing)
}

/// Failure text for a count expectation with a caller-chosen set of
/// offending entities. Bounded matchers pass only the entities that
/// actually broke the bound.
pub(crate) fn count_failure_for(
    operation: &str,
    expected: &BTreeMap<String, u64>,
    stats: &QueryStats,
    differing: &BTreeSet<String>,
) -> String {
    let actual = stats.query_counts();
    let width = differing.iter().map(String::len).max().unwrap_or(0);
    let mut message = format!(
        "Expected the block to {operation} {}, got {}\n",
        format_counts(expected),
        format_counts(&actual),
    );
    message.push_str("Counts that differed:\n");
    for key in differing {
        let left = expected.get(key).copied().unwrap_or(0);
        let right = actual.get(key).copied().unwrap_or(0);
        message.push_str(&format!(
            "  {key:>width$} - expected: {left}, got: {right}\n"
        ));
    }
    message.push_str(&source_lines_section(differing, stats));
    message
}

/// Failure text for a "no queries at all" expectation.
pub(crate) fn none_failure(operation: &str, stats: &QueryStats) -> String {
    let actual = stats.query_counts();
    let keys: BTreeSet<String> = actual.keys().cloned().collect();
    let mut message = format!(
        "Expected the block to {operation} no records, got {}\n",
        format_counts(&actual),
    );
    message.push_str(&source_lines_section(&keys, stats));
    message
}

/// Failure text for a field-value expectation. `differing` names the
/// entities whose value sets missed the expectation.
pub(crate) fn values_failure(
    expected: &BTreeMap<String, Vec<FieldValue>>,
    stats: &QueryStats,
    differing: &BTreeSet<String>,
) -> String {
    let actual = stats.query_values();
    let width = differing.iter().map(String::len).max().unwrap_or(0);
    let mut message = format!(
        "Expected the block to query values {}, got {}\n",
        format_values(expected),
        format_values(&actual),
    );
    message.push_str("Values that differed:\n");
    for key in differing {
        let left = expected.get(key).cloned().unwrap_or_default();
        let right = actual.get(key).cloned().unwrap_or_default();
        let missing: Vec<FieldValue> = left
            .iter()
            .filter(|value| !right.contains(value))
            .cloned()
            .collect();
        let difference = if missing.is_empty() {
            // Nothing expected is absent, so the surplus side differs.
            right
                .iter()
                .filter(|value| !left.contains(value))
                .cloned()
                .collect()
        } else {
            missing
        };
        message.push_str(&format!(
            "  {key:>width$} - expected: {}, got: {} (difference: {})\n",
            format_value_list(&left),
            format_value_list(&right),
            format_value_list(&difference),
        ));
    }
    message.push_str(&source_lines_section(differing, stats));
    message
}
