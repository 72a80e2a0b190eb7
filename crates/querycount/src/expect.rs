//! Expectation matchers over instrumented blocks.
//!
//! Each matcher instruments a closure with the appropriate counter and
//! compares the resulting aggregate against an expected profile. On
//! mismatch it returns an [`ExpectationError`] whose `Display` is the
//! full human-readable diff; chain [`MatchResultExt::or_fail`] to panic
//! inside a plain `#[test]`.
//!
//! ```rust,ignore
//! let matchers = Matchers::new(registry);
//! matchers
//!     .only_creates(&[("MockUser", 2)], || {
//!         create_user();
//!         create_user();
//!     })
//!     .or_fail();
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use querycount_core::{
    EntityRegistry, FieldValue, QueryBus, QueryCounter, QueryStats, global_bus,
};
use thiserror::Error;

use crate::render;

/// A failed query expectation. The display text is the complete failure
/// report, including per-entity diffs and source-line attribution.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ExpectationError {
    message: String,
    stats: QueryStats,
}

impl ExpectationError {
    fn new(message: String, stats: QueryStats) -> Self {
        Self { message, stats }
    }

    /// The aggregate that failed the expectation, for custom inspection.
    #[must_use]
    pub const fn stats(&self) -> &QueryStats {
        &self.stats
    }
}

/// Result of running one matcher.
pub type MatchResult<T> = Result<T, ExpectationError>;

/// Panicking adapter for use in tests.
pub trait MatchResultExt<T> {
    /// Unwrap the work result, panicking with the rendered failure report
    /// at the caller's location on mismatch.
    fn or_fail(self) -> T;
}

impl<T> MatchResultExt<T> for MatchResult<T> {
    #[track_caller]
    fn or_fail(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }
}

/// Expected counts with zero entries pruned: expecting zero of something
/// is the same as not mentioning it, since the aggregate is sparse.
fn effective_counts(expected: &[(&str, u64)]) -> BTreeMap<String, u64> {
    expected
        .iter()
        .filter(|(_, count)| *count > 0)
        .map(|(name, count)| ((*name).to_string(), *count))
        .collect()
}

fn expected_values(expected: &[(&str, &[FieldValue])]) -> BTreeMap<String, Vec<FieldValue>> {
    expected
        .iter()
        .map(|(name, values)| ((*name).to_string(), values.to_vec()))
        .collect()
}

/// Distinct-value sets compare order-insensitively; order only matters
/// for display.
fn same_value_set(left: &[FieldValue], right: &[FieldValue]) -> bool {
    let left: HashSet<&FieldValue> = left.iter().collect();
    let right: HashSet<&FieldValue> = right.iter().collect();
    left == right
}

fn value_subset(subset: &[FieldValue], superset: &[FieldValue]) -> bool {
    subset.iter().all(|value| superset.contains(value))
}

fn exact_counts<T>(
    operation: &str,
    stats: QueryStats,
    result: T,
    expected: &BTreeMap<String, u64>,
) -> MatchResult<T> {
    if *expected == stats.query_counts() {
        Ok(result)
    } else {
        let message = render::count_failure(operation, expected, &stats);
        Err(ExpectationError::new(message, stats))
    }
}

fn none_counts<T>(operation: &str, stats: QueryStats, result: T) -> MatchResult<T> {
    if stats.is_empty() {
        Ok(result)
    } else {
        let message = render::none_failure(operation, &stats);
        Err(ExpectationError::new(message, stats))
    }
}

/// Query matchers bound to one entity registry and one event bus.
#[derive(Debug, Clone)]
pub struct Matchers {
    registry: Arc<EntityRegistry>,
    bus: Arc<QueryBus>,
}

impl Matchers {
    /// Matchers over the process-wide bus.
    #[must_use]
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self::with_bus(registry, Arc::clone(global_bus()))
    }

    /// Matchers over an explicit bus.
    #[must_use]
    pub const fn with_bus(registry: Arc<EntityRegistry>, bus: Arc<QueryBus>) -> Self {
        Self { registry, bus }
    }

    // ── count matchers ──────────────────────────────────────────────────

    /// The block must create exactly these records and nothing else.
    pub fn only_creates<T>(
        &self,
        expected: &[(&str, u64)],
        work: impl FnOnce() -> T,
    ) -> MatchResult<T> {
        let counter = QueryCounter::creates_on(Arc::clone(&self.registry), Arc::clone(&self.bus));
        let (result, stats) = counter.instrument(work);
        exact_counts("create exactly", stats, result, &effective_counts(expected))
    }

    /// The block must not create any records.
    pub fn creates_none<T>(&self, work: impl FnOnce() -> T) -> MatchResult<T> {
        let counter = QueryCounter::creates_on(Arc::clone(&self.registry), Arc::clone(&self.bus));
        let (result, stats) = counter.instrument(work);
        none_counts("create", stats, result)
    }

    /// The block must load exactly these records and nothing else.
    pub fn only_loads<T>(
        &self,
        expected: &[(&str, u64)],
        work: impl FnOnce() -> T,
    ) -> MatchResult<T> {
        let counter = QueryCounter::loads_on(Arc::clone(&self.registry), Arc::clone(&self.bus));
        let (result, stats) = counter.instrument(work);
        exact_counts("load exactly", stats, result, &effective_counts(expected))
    }

    /// Every load must stay within the expected per-entity bound; loading
    /// an entity the expectation never mentions is a failure.
    pub fn loads_at_most<T>(
        &self,
        expected: &[(&str, u64)],
        work: impl FnOnce() -> T,
    ) -> MatchResult<T> {
        let counter = QueryCounter::loads_on(Arc::clone(&self.registry), Arc::clone(&self.bus));
        let (result, stats) = counter.instrument(work);
        let expected = effective_counts(expected);
        let over_bound: BTreeSet<String> = stats
            .query_counts()
            .iter()
            .filter(|&(ref entity, &count)| {
                !expected.get(*entity).is_some_and(|&bound| count <= bound)
            })
            .map(|(entity, _)| entity.clone())
            .collect();
        if over_bound.is_empty() {
            Ok(result)
        } else {
            let message = render::count_failure_for("load at most", &expected, &stats, &over_bound);
            Err(ExpectationError::new(message, stats))
        }
    }

    /// The named entities must load exactly this often; any other entity
    /// is unconstrained.
    pub fn loads_including<T>(
        &self,
        expected: &[(&str, u64)],
        work: impl FnOnce() -> T,
    ) -> MatchResult<T> {
        let counter = QueryCounter::loads_on(Arc::clone(&self.registry), Arc::clone(&self.bus));
        let (result, stats) = counter.instrument(work);
        let expected = effective_counts(expected);
        let actual = stats.query_counts();
        let missed: BTreeSet<String> = expected
            .iter()
            .filter(|&(ref entity, &count)| actual.get(*entity).copied().unwrap_or(0) != count)
            .map(|(entity, _)| entity.clone())
            .collect();
        if missed.is_empty() {
            Ok(result)
        } else {
            let message = render::count_failure_for("load", &expected, &stats, &missed);
            Err(ExpectationError::new(message, stats))
        }
    }

    /// The block must not load any records.
    pub fn loads_none<T>(&self, work: impl FnOnce() -> T) -> MatchResult<T> {
        let counter = QueryCounter::loads_on(Arc::clone(&self.registry), Arc::clone(&self.bus));
        let (result, stats) = counter.instrument(work);
        none_counts("load", stats, result)
    }

    /// The block must update exactly these records and nothing else.
    pub fn only_updates<T>(
        &self,
        expected: &[(&str, u64)],
        work: impl FnOnce() -> T,
    ) -> MatchResult<T> {
        let counter = QueryCounter::updates_on(Arc::clone(&self.registry), Arc::clone(&self.bus));
        let (result, stats) = counter.instrument(work);
        exact_counts("update exactly", stats, result, &effective_counts(expected))
    }

    /// The block must not update any records.
    pub fn updates_none<T>(&self, work: impl FnOnce() -> T) -> MatchResult<T> {
        let counter = QueryCounter::updates_on(Arc::clone(&self.registry), Arc::clone(&self.bus));
        let (result, stats) = counter.instrument(work);
        none_counts("update", stats, result)
    }

    /// The block must destroy exactly these records and nothing else.
    pub fn only_destroys<T>(
        &self,
        expected: &[(&str, u64)],
        work: impl FnOnce() -> T,
    ) -> MatchResult<T> {
        let counter = QueryCounter::destroys_on(Arc::clone(&self.registry), Arc::clone(&self.bus));
        let (result, stats) = counter.instrument(work);
        exact_counts("destroy exactly", stats, result, &effective_counts(expected))
    }

    /// The block must not destroy any records.
    pub fn destroys_none<T>(&self, work: impl FnOnce() -> T) -> MatchResult<T> {
        let counter = QueryCounter::destroys_on(Arc::clone(&self.registry), Arc::clone(&self.bus));
        let (result, stats) = counter.instrument(work);
        none_counts("destroy", stats, result)
    }

    // ── field-value matchers ────────────────────────────────────────────

    fn field_stats<T>(&self, work: impl FnOnce() -> T) -> (T, QueryStats) {
        let counter = QueryCounter::fields_on(Arc::clone(&self.registry), Arc::clone(&self.bus));
        counter.instrument(work)
    }

    /// The block's observed field values must match exactly, per entity.
    /// Value-set comparison ignores observation order.
    pub fn field_values_exactly<T>(
        &self,
        expected: &[(&str, &[FieldValue])],
        work: impl FnOnce() -> T,
    ) -> MatchResult<T> {
        let (result, stats) = self.field_stats(work);
        let expected = expected_values(expected);
        let actual = stats.query_values();
        let differing: BTreeSet<String> = expected
            .keys()
            .chain(actual.keys())
            .filter(|key| {
                let left = expected.get(*key).map_or(&[][..], Vec::as_slice);
                let right = actual.get(*key).map_or(&[][..], Vec::as_slice);
                !same_value_set(left, right)
            })
            .cloned()
            .collect();
        if differing.is_empty() {
            Ok(result)
        } else {
            let message = render::values_failure(&expected, &stats, &differing);
            Err(ExpectationError::new(message, stats))
        }
    }

    /// Every expected value must have been observed for its entity;
    /// additional observed values and entities are allowed.
    pub fn field_values_at_least<T>(
        &self,
        expected: &[(&str, &[FieldValue])],
        work: impl FnOnce() -> T,
    ) -> MatchResult<T> {
        self.field_values_subset(expected, false, work)
    }

    /// Like [`Self::field_values_at_least`], but entities with no observed
    /// values at all are skipped rather than failed — useful when a code
    /// path may legitimately not touch an entity.
    pub fn field_values_at_least_ignoring_missing<T>(
        &self,
        expected: &[(&str, &[FieldValue])],
        work: impl FnOnce() -> T,
    ) -> MatchResult<T> {
        self.field_values_subset(expected, true, work)
    }

    fn field_values_subset<T>(
        &self,
        expected: &[(&str, &[FieldValue])],
        ignore_missing: bool,
        work: impl FnOnce() -> T,
    ) -> MatchResult<T> {
        let (result, stats) = self.field_stats(work);
        let expected = expected_values(expected);
        let actual = stats.query_values();
        let differing: BTreeSet<String> = expected
            .iter()
            .filter(|(key, values)| match actual.get(*key) {
                Some(observed) => !value_subset(values, observed),
                None => !ignore_missing,
            })
            .map(|(key, _)| key.clone())
            .collect();
        if differing.is_empty() {
            Ok(result)
        } else {
            let message = render::values_failure(&expected, &stats, &differing);
            Err(ExpectationError::new(message, stats))
        }
    }
}
