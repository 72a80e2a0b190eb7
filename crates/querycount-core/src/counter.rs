//! The generic instrumentation engine: subscribe, classify, accumulate.
//!
//! [`QueryCounter`] pairs one classification strategy with a table
//! resolver. `instrument` scopes a bus subscription to exactly the
//! duration of the block under test and returns the frozen
//! [`QueryStats`] aggregate.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;

use crate::classify::{
    CreateClassifier, DestroyClassifier, EntityRef, FieldClassifier, FieldValue, LoadClassifier,
    QueryClassifier, RefTarget, UpdateClassifier,
};
use crate::events::{QueryBus, QueryEvent, global_bus};
use crate::registry::{EntityRegistry, TableResolver};

/// Marginalia-style inline annotation: the session layer appends a
/// `/*line:<location>*/` comment naming the call site that issued the
/// statement.
static SOURCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*line:(?P<line>[^*]*)\*/").expect("line comment pattern"));

/// Per-entity accumulation record.
///
/// `count` is the number of raw events attributed to the entity; `lines`
/// gets one push per matching annotated event (duplicates allowed);
/// `values` holds distinct observations in first-seen order; `time` sums
/// event wall time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityAggregate {
    pub count: u64,
    pub lines: Vec<String>,
    pub values: Vec<FieldValue>,
    pub time: Duration,
}

/// Read-only aggregate produced by one `instrument` call.
///
/// Entries exist only for entities that matched at least one event; an
/// absent entity means a zero count. The canonical map preserves
/// first-attribution order; the projection methods recompute cheap
/// derived views on every call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryStats {
    queries: IndexMap<String, EntityAggregate>,
}

impl QueryStats {
    /// The raw per-entity aggregate, for custom inspection.
    #[must_use]
    pub const fn queries(&self) -> &IndexMap<String, EntityAggregate> {
        &self.queries
    }

    /// Entity name to query count, name-sorted. Sparse: entities with no
    /// matched events are omitted, never padded with zeros.
    #[must_use]
    pub fn query_counts(&self) -> BTreeMap<String, u64> {
        self.queries
            .iter()
            .map(|(name, aggregate)| (name.clone(), aggregate.count))
            .collect()
    }

    /// Entity name to distinct observed field values, in first-seen order.
    /// Entities without any observed value are omitted.
    #[must_use]
    pub fn query_values(&self) -> BTreeMap<String, Vec<FieldValue>> {
        self.queries
            .iter()
            .filter(|(_, aggregate)| !aggregate.values.is_empty())
            .map(|(name, aggregate)| (name.clone(), aggregate.values.clone()))
            .collect()
    }

    /// Entity name to source-location occurrence counts, for "where did
    /// these queries come from" reporting.
    #[must_use]
    pub fn query_lines_by_frequency(&self) -> BTreeMap<String, IndexMap<String, u64>> {
        self.queries
            .iter()
            .map(|(name, aggregate)| {
                let mut frequencies: IndexMap<String, u64> = IndexMap::new();
                for line in &aggregate.lines {
                    *frequencies.entry(line.clone()).or_insert(0) += 1;
                }
                (name.clone(), frequencies)
            })
            .collect()
    }

    /// Total matched events across all entities.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.queries.values().map(|aggregate| aggregate.count).sum()
    }

    /// Total wall time attributed across all entities.
    #[must_use]
    pub fn total_time(&self) -> Duration {
        self.queries.values().map(|aggregate| aggregate.time).sum()
    }

    /// Whether no event matched at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

type Aggregate = IndexMap<String, EntityAggregate>;

/// Instruments a block of code and counts the query events one strategy
/// attributes to each entity.
///
/// A single counter runs one `instrument` at a time, but two counters
/// with different strategies may instrument the same block: the bus fans
/// events out and each subscription owns an independent accumulator.
#[derive(Debug)]
pub struct QueryCounter<C> {
    classifier: Arc<C>,
    resolver: TableResolver,
    bus: Arc<QueryBus>,
}

impl<C: QueryClassifier + Send + Sync + 'static> QueryCounter<C> {
    /// Pair a strategy with a registry, subscribing on `bus`.
    #[must_use]
    pub fn new(classifier: C, registry: Arc<EntityRegistry>, bus: Arc<QueryBus>) -> Self {
        Self {
            classifier: Arc::new(classifier),
            resolver: TableResolver::new(registry),
            bus,
        }
    }

    /// Run `work` with a scoped subscription and return its result along
    /// with the finalized stats.
    ///
    /// The subscription is torn down on every exit path: if `work` panics,
    /// the guard unsubscribes during unwinding and the panic propagates
    /// with no stats produced.
    pub fn instrument<T>(&self, work: impl FnOnce() -> T) -> (T, QueryStats) {
        let aggregate: Arc<Mutex<Aggregate>> = Arc::new(Mutex::new(IndexMap::new()));

        let classifier = Arc::clone(&self.classifier);
        let resolver = self.resolver.clone();
        let callback_aggregate = Arc::clone(&aggregate);
        let subscription = self.bus.subscribe(move |event| {
            record_event(&*classifier, &resolver, &callback_aggregate, event);
        });

        let result = work();
        drop(subscription);

        let queries = Arc::try_unwrap(aggregate).map_or_else(
            // Unreachable in practice: the only other holder was the
            // subscription callback, just dropped.
            |shared| shared.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            |owned| owned.into_inner().unwrap_or_else(|e| e.into_inner()),
        );
        (result, QueryStats { queries })
    }
}

/// Per-event accumulation. Runs synchronously on the thread that issued
/// the query, as part of `publish`.
fn record_event<C: QueryClassifier>(
    classifier: &C,
    resolver: &TableResolver,
    aggregate: &Mutex<Aggregate>,
    event: &QueryEvent,
) {
    if event.cached {
        return;
    }

    let refs = classifier
        .classify(&event.operation, &event.sql)
        .into_refs();
    if refs.is_empty() {
        return;
    }

    let line = SOURCE_LINE
        .captures(&event.sql)
        .map(|caps| caps["line"].to_string());
    let duration = event.duration();

    let mut queries = aggregate.lock().unwrap_or_else(|e| e.into_inner());
    // One raw event bumps each entity's count at most once, even when the
    // classification carries several references to it (an IN list yields
    // one reference per scalar). Every observed value is still collected.
    let mut counted: Vec<String> = Vec::new();
    for entity_ref in refs {
        let EntityRef { target, field } = entity_ref;
        let name = match target {
            RefTarget::Entity(name) => name,
            RefTarget::Table(table) => match resolver.resolve(&table) {
                Some(name) => name,
                None => {
                    tracing::debug!(%table, "no registered entity owns table, dropping event");
                    continue;
                }
            },
        };

        let entry = queries.entry(name.clone()).or_default();
        if !counted.contains(&name) {
            counted.push(name);
            entry.count += 1;
            if let Some(line) = &line {
                entry.lines.push(line.clone());
            }
            entry.time += duration;
        }
        if let Some(observation) = field {
            if !entry.values.contains(&observation.value) {
                entry.values.push(observation.value);
            }
        }
    }
}

// ── Specialized constructors, one per strategy ──────────────────────────

macro_rules! specialized_counter {
    ($strategy:ty, $default:ident, $on:ident, $doc:literal) => {
        impl QueryCounter<$strategy> {
            #[doc = $doc]
            #[must_use]
            pub fn $default(registry: Arc<EntityRegistry>) -> Self {
                Self::$on(registry, Arc::clone(global_bus()))
            }

            #[doc = $doc]
            #[doc = "Subscribes on an explicit bus instead of the global one."]
            #[must_use]
            pub fn $on(registry: Arc<EntityRegistry>, bus: Arc<QueryBus>) -> Self {
                Self::new(<$strategy>::default(), registry, bus)
            }
        }
    };
}

specialized_counter!(
    CreateClassifier,
    creates,
    creates_on,
    "Counter for insert statements."
);
specialized_counter!(
    LoadClassifier,
    loads,
    loads_on,
    "Counter for read statements."
);
specialized_counter!(
    UpdateClassifier,
    updates,
    updates_on,
    "Counter for update statements."
);
specialized_counter!(
    DestroyClassifier,
    destroys,
    destroys_on,
    "Counter for delete statements."
);
specialized_counter!(
    FieldClassifier,
    fields,
    fields_on,
    "Counter for observed field values."
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn registry() -> Arc<EntityRegistry> {
        let reg = Arc::new(EntityRegistry::new());
        reg.register(crate::registry::EntityDescriptor::new("MockUser", "mock_users"))
            .unwrap();
        reg
    }

    fn publish(bus: &Arc<QueryBus>, sql: &str) {
        let now = Instant::now();
        bus.publish(&QueryEvent::new("SQL", sql, now, now));
    }

    #[test]
    fn source_line_annotation_is_captured() {
        let bus = Arc::new(QueryBus::new());
        let counter = QueryCounter::creates_on(registry(), Arc::clone(&bus));
        let ((), stats) = counter.instrument(|| {
            publish(
                &bus,
                "INSERT INTO `mock_users` (`name`) VALUES ('x') /*line:tests/app.rs:42*/",
            );
            publish(&bus, "INSERT INTO `mock_users` (`name`) VALUES ('y')");
        });
        let lines = &stats.queries()["MockUser"].lines;
        assert_eq!(lines, &vec!["tests/app.rs:42".to_string()]);
    }

    #[test]
    fn lines_by_frequency_counts_duplicates() {
        let bus = Arc::new(QueryBus::new());
        let counter = QueryCounter::creates_on(registry(), Arc::clone(&bus));
        let ((), stats) = counter.instrument(|| {
            for _ in 0..3 {
                publish(
                    &bus,
                    "INSERT INTO `mock_users` (`name`) VALUES ('x') /*line:tests/app.rs:7*/",
                );
            }
        });
        let by_freq = stats.query_lines_by_frequency();
        assert_eq!(by_freq["MockUser"]["tests/app.rs:7"], 3);
    }

    #[test]
    fn time_accumulates_per_entity() {
        let bus = Arc::new(QueryBus::new());
        let counter = QueryCounter::creates_on(registry(), Arc::clone(&bus));
        let ((), stats) = counter.instrument(|| {
            let start = Instant::now();
            let end = start + Duration::from_millis(2);
            bus.publish(&QueryEvent::new(
                "SQL",
                "INSERT INTO `mock_users` (`name`) VALUES ('x')",
                start,
                end,
            ));
        });
        assert_eq!(stats.queries()["MockUser"].time, Duration::from_millis(2));
        assert_eq!(stats.total_time(), Duration::from_millis(2));
    }

    #[test]
    fn stats_snapshot_serializes() {
        let bus = Arc::new(QueryBus::new());
        let counter = QueryCounter::creates_on(registry(), Arc::clone(&bus));
        let ((), stats) = counter.instrument(|| {
            publish(&bus, "INSERT INTO `mock_users` (`name`) VALUES ('x')");
        });
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["queries"]["MockUser"]["count"], 1);
    }
}
