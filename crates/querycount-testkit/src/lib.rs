//! Test fixtures for the querycount crates.
//!
//! Provides the canonical mock entity registry shared across test suites
//! and a [`FakeSession`] that fabricates realistic query events — the
//! statement shapes a typical ORM emits — and publishes them through a
//! bus, so the engine can be exercised without a real database.

#![forbid(unsafe_code)]

use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use querycount_core::{EntityDescriptor, EntityRegistry, QueryBus, QueryEvent};

/// Synthetic wall time for every fabricated event, so `time` accumulation
/// is deterministic in tests.
pub const FAKE_EVENT_DURATION: Duration = Duration::from_millis(1);

/// The canonical fixture registry: an abstract base plus `MockUser` on
/// `mock_users` and `MockPost` on `mock_posts`.
#[must_use]
pub fn mock_registry() -> Arc<EntityRegistry> {
    let registry = Arc::new(EntityRegistry::new());
    let base = EntityDescriptor::abstract_base("ModelBase");
    let user = EntityDescriptor::new("MockUser", "mock_users").child_of("ModelBase");
    let post = EntityDescriptor::new("MockPost", "mock_posts").child_of("ModelBase");
    for descriptor in [base, user, post] {
        registry
            .register(descriptor)
            .unwrap_or_else(|err| panic!("fixture registration failed: {err}"));
    }
    registry
}

/// Install an env-filtered tracing subscriber once per process. Set
/// `RUST_LOG=querycount_core=debug` to see classification drop decisions
/// while a test runs.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Fabricates query events with realistic statement text and publishes
/// them on a bus.
///
/// Every statement-emitting method has the shape the engine's patterns
/// target; `annotated` appends the marginalia-style `/*line:…*/` comment
/// and `cached_select` replays a read with the cached flag set.
#[derive(Debug, Clone)]
pub struct FakeSession {
    bus: Arc<QueryBus>,
}

impl FakeSession {
    /// A session publishing on `bus`.
    #[must_use]
    pub fn new(bus: Arc<QueryBus>) -> Self {
        Self { bus }
    }

    /// The bus this session publishes to.
    #[must_use]
    pub fn bus(&self) -> &Arc<QueryBus> {
        &self.bus
    }

    fn publish(&self, operation: &str, sql: String, cached: bool) {
        let started_at = Instant::now();
        let mut event = QueryEvent::new(operation, sql, started_at, started_at + FAKE_EVENT_DURATION);
        if cached {
            event = event.cached();
        }
        self.bus.publish(&event);
    }

    /// `INSERT INTO `table` (…) VALUES (…)`, unnamed.
    pub fn insert(&self, table: &str) {
        self.publish(
            "SQL",
            format!("INSERT INTO `{table}` (`name`) VALUES ('fixture')"),
            false,
        );
    }

    /// Unnamed `SELECT … FROM `table``.
    pub fn select(&self, table: &str) {
        self.publish("SQL", format!("SELECT `{table}`.* FROM `{table}`"), false);
    }

    /// A select the runtime named for us: operation `"<Entity> Load"`.
    pub fn named_load(&self, entity: &str, table: &str) {
        self.publish(
            &format!("{entity} Load"),
            format!("SELECT `{table}`.* FROM `{table}` LIMIT 1"),
            false,
        );
    }

    /// A joined read. Only `table` appears in a `FROM` clause, so read
    /// classification attributes the statement to `table` alone.
    pub fn select_join(&self, table: &str, joined: &str) {
        self.publish(
            "SQL",
            format!(
                "SELECT `{table}`.* FROM `{table}` INNER JOIN `{joined}` \
                 ON `{joined}`.`{table}_id` = `{table}`.`id`"
            ),
            false,
        );
    }

    /// A union read with one `FROM` clause per branch; read classification
    /// yields one reference per table.
    pub fn select_union(&self, table: &str, other: &str) {
        self.publish(
            "SQL",
            format!(
                "SELECT `{table}`.`id` FROM `{table}` UNION \
                 SELECT `{other}`.`id` FROM `{other}`"
            ),
            false,
        );
    }

    /// A cached replay of a read; counters must ignore it.
    pub fn cached_select(&self, table: &str) {
        self.publish("SQL", format!("SELECT `{table}`.* FROM `{table}`"), true);
    }

    /// `UPDATE` setting one field, with a qualified predicate on the same
    /// field so the field strategy can observe the written value.
    pub fn update(&self, table: &str, field: &str, value: &str) {
        self.publish(
            "SQL",
            format!("UPDATE `{table}` SET `{field}` = {value} WHERE `{table}`.`{field}` = {value}"),
            false,
        );
    }

    /// A read filtered by `field IN (…)`.
    pub fn select_where_in(&self, table: &str, field: &str, values: &[&str]) {
        let list = values.join(", ");
        self.publish(
            "SQL",
            format!("SELECT `{table}`.* FROM `{table}` WHERE `{table}`.`{field}` IN ({list})"),
            false,
        );
    }

    /// Unnamed `DELETE FROM `table``.
    pub fn delete(&self, table: &str) {
        self.publish("SQL", format!("DELETE FROM `{table}` WHERE `id` = 1"), false);
    }

    /// A delete the runtime named: operation `"<Entity> Destroy"`.
    pub fn named_destroy(&self, entity: &str, table: &str) {
        self.publish(
            &format!("{entity} Destroy"),
            format!("DELETE FROM `{table}` WHERE `id` = 1"),
            false,
        );
    }

    /// Publish an insert with a source-line annotation comment appended.
    pub fn annotated_insert(&self, table: &str, line: &str) {
        self.publish(
            "SQL",
            format!("INSERT INTO `{table}` (`name`) VALUES ('fixture') /*line:{line}*/"),
            false,
        );
    }

    /// Publish an arbitrary statement, for shapes the helpers don't cover.
    pub fn raw(&self, operation: &str, sql: &str) {
        self.publish(operation, sql.to_string(), false);
    }
}
