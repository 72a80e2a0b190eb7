//! Statement classification strategies.
//!
//! Each strategy inspects one query event — the runtime's operation label
//! plus the raw statement text — and maps it to zero, one, or several
//! [`EntityRef`]s. The fast path reads the operation label (the runtime
//! names simple reads like `"User Load"`); inserts, updates, and deletes
//! are always labelled with a generic `"SQL"`, so those fall back to a
//! small bank of anchored patterns over the statement text.
//!
//! This is deliberately not a SQL parser: the patterns extract only the
//! quoted table identifier (and, for field extraction, one `field = value`
//! equality) and ignore everything else.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A scalar observed in a statement's field predicate.
///
/// Values that parse fully as integers are carried as [`Self::Int`];
/// everything else stays text with quoting stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Text(String),
}

impl FieldValue {
    /// Normalize a raw captured token: strip surrounding backtick/quote
    /// delimiters, then try a full integer parse. Quote characters inside
    /// the token (escaped literals) are kept as written.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let cleaned = raw.trim_matches(|c| matches!(c, '`' | '"' | '\''));
        cleaned
            .parse::<i64>()
            .map_or_else(|_| Self::Text(cleaned.to_owned()), Self::Int)
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(t) => write!(f, "{t:?}"),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// What a classification points at: an entity by name, or a physical
/// table still needing resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    /// Entity name taken verbatim from the operation label.
    Entity(String),
    /// Table name extracted from statement text; the counter resolves it
    /// through the registry.
    Table(String),
}

/// One field/value pair observed in a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldObservation {
    pub name: String,
    pub value: FieldValue,
}

/// The immutable product of classifying one statement: which entity (or
/// table) it touched, optionally with one observed field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub target: RefTarget,
    pub field: Option<FieldObservation>,
}

impl EntityRef {
    /// Reference an entity by name.
    #[must_use]
    pub fn entity(name: impl Into<String>) -> Self {
        Self {
            target: RefTarget::Entity(name.into()),
            field: None,
        }
    }

    /// Reference a table pending resolution.
    #[must_use]
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            target: RefTarget::Table(name.into()),
            field: None,
        }
    }

    /// Attach an observed field value.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.field = Some(FieldObservation {
            name: name.into(),
            value,
        });
        self
    }
}

/// Result of classifying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Not of interest; the event is dropped.
    None,
    One(EntityRef),
    /// A single statement touching several entities (unions, subselects).
    Many(Vec<EntityRef>),
}

impl Classification {
    /// Flatten into a list of references (empty when [`Self::None`]).
    #[must_use]
    pub fn into_refs(self) -> Vec<EntityRef> {
        match self {
            Self::None => Vec::new(),
            Self::One(entity_ref) => vec![entity_ref],
            Self::Many(refs) => refs,
        }
    }

    /// Whether the event was dropped.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// A pluggable classification strategy.
///
/// Implementations must be pure functions of the two inputs and must not
/// panic on well-formed but unmatched text — unmatched means
/// [`Classification::None`], never an error. A panicking implementation is
/// a defect and aborts the in-flight instrumentation.
pub trait QueryClassifier {
    fn classify(&self, operation: &str, sql: &str) -> Classification;
}

// ── Pattern bank (compiled once) ────────────────────────────────────────

static INSERT_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"INSERT INTO [`"](?P<table>[^`"]+)[`"]"#).expect("insert pattern")
});

static UPDATE_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"UPDATE [`"](?P<table>[^`"]+)[`"]"#).expect("update pattern"));

static FROM_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"FROM [`"](?P<table>[^`"]+)[`"]"#).expect("from pattern"));

static DELETE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"DELETE (?:DELETE )*FROM [`"](?P<table>[^`"]+)[`"]"#).expect("delete pattern")
});

static NAMED_LOAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A(?P<entity>[\w:]+) (Load|Exists)\z").expect("load name"));

static NAMED_DESTROY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A(?P<entity>[\w:]+) (Delete|Destroy)\z").expect("destroy name"));

static FIELD_EQ: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\.[`"](?P<field>\w+)[`"] = (?P<value>[\w`"']+)"#).expect("field eq pattern")
});

static FIELD_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\.[`"](?P<field>\w+)[`"] IN \((?P<values>[^)]*)\)"#).expect("field in pattern")
});

// ── Concrete strategies ─────────────────────────────────────────────────

/// Classifies `INSERT` statements. The runtime labels every insert with a
/// generic `"SQL"`, so only the text pattern applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateClassifier;

impl QueryClassifier for CreateClassifier {
    fn classify(&self, _operation: &str, sql: &str) -> Classification {
        match INSERT_TABLE.captures(sql) {
            Some(caps) => Classification::One(EntityRef::table(&caps["table"])),
            None => Classification::None,
        }
    }
}

/// Classifies reads: named `<Entity> Load`/`Exists` operations first, then
/// every `FROM <table>` occurrence in the text. Unions and subselects carry
/// one `FROM` per branch and yield one reference per table; a `JOIN` has a
/// single `FROM`, so only that table is referenced.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadClassifier;

impl QueryClassifier for LoadClassifier {
    fn classify(&self, operation: &str, sql: &str) -> Classification {
        if let Some(caps) = NAMED_LOAD.captures(operation) {
            return Classification::One(EntityRef::entity(&caps["entity"]));
        }
        let mut refs: Vec<EntityRef> = FROM_TABLE
            .captures_iter(sql)
            .map(|caps| EntityRef::table(&caps["table"]))
            .collect();
        match refs.len() {
            0 => Classification::None,
            1 => Classification::One(refs.remove(0)),
            _ => Classification::Many(refs),
        }
    }
}

/// Classifies `UPDATE` statements by table. Always unnamed, text only.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateClassifier;

impl QueryClassifier for UpdateClassifier {
    fn classify(&self, _operation: &str, sql: &str) -> Classification {
        match UPDATE_TABLE.captures(sql) {
            Some(caps) => Classification::One(EntityRef::table(&caps["table"])),
            None => Classification::None,
        }
    }
}

/// Classifies deletes: named `<Entity> Delete`/`Destroy` operations first,
/// then `DELETE [DELETE ]* FROM <table>` text (the chained phrasing shows
/// up in batched dependent-destroy statements).
#[derive(Debug, Clone, Copy, Default)]
pub struct DestroyClassifier;

impl QueryClassifier for DestroyClassifier {
    fn classify(&self, operation: &str, sql: &str) -> Classification {
        if let Some(caps) = NAMED_DESTROY.captures(operation) {
            return Classification::One(EntityRef::entity(&caps["entity"]));
        }
        match DELETE_TABLE.captures(sql) {
            Some(caps) => Classification::One(EntityRef::table(&caps["table"])),
            None => Classification::None,
        }
    }
}

/// Extracts observed field values, attributed to the statement's entity.
///
/// The statement's table comes from the first of `INSERT INTO` / `UPDATE`
/// / `FROM` that matches; the predicate comes from a qualified
/// `` `table`.`field` = value `` equality or a `` .`field` IN (…) `` list
/// (one reference per listed scalar).
///
/// Multi-row `INSERT … VALUES` lists are not extracted: such statements
/// carry no usable `field = value` shape without positional column/value
/// pairing, so they count against their entity but contribute no values.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldClassifier;

impl FieldClassifier {
    fn statement_table(sql: &str) -> Option<String> {
        [&*INSERT_TABLE, &*UPDATE_TABLE, &*FROM_TABLE]
            .iter()
            .find_map(|pattern| pattern.captures(sql).map(|caps| caps["table"].to_string()))
    }
}

impl QueryClassifier for FieldClassifier {
    fn classify(&self, _operation: &str, sql: &str) -> Classification {
        let Some(table) = Self::statement_table(sql) else {
            return Classification::None;
        };

        if let Some(caps) = FIELD_EQ.captures(sql) {
            let value = FieldValue::parse(&caps["value"]);
            return Classification::One(
                EntityRef::table(table).with_field(&caps["field"], value),
            );
        }

        if let Some(caps) = FIELD_IN.captures(sql) {
            let field = &caps["field"];
            let mut refs: Vec<EntityRef> = caps["values"]
                .split(',')
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(|token| {
                    EntityRef::table(table.clone()).with_field(field, FieldValue::parse(token))
                })
                .collect();
            return match refs.len() {
                0 => Classification::None,
                1 => Classification::One(refs.remove(0)),
                _ => Classification::Many(refs),
            };
        }

        Classification::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_matches_backtick_and_double_quote() {
        let c = CreateClassifier;
        assert_eq!(
            c.classify("SQL", "INSERT INTO `mock_users` (`name`) VALUES ('x')"),
            Classification::One(EntityRef::table("mock_users"))
        );
        assert_eq!(
            c.classify("SQL", r#"INSERT INTO "mock_posts" ("id") VALUES (1)"#),
            Classification::One(EntityRef::table("mock_posts"))
        );
    }

    #[test]
    fn create_ignores_reads() {
        assert!(
            CreateClassifier
                .classify("MockUser Load", "SELECT * FROM `mock_users`")
                .is_none()
        );
    }

    #[test]
    fn load_prefers_operation_label() {
        assert_eq!(
            LoadClassifier.classify("MockUser Load", "SELECT `mock_users`.* FROM `mock_users`"),
            Classification::One(EntityRef::entity("MockUser"))
        );
        assert_eq!(
            LoadClassifier.classify("MockUser Exists", "SELECT 1 FROM `mock_users`"),
            Classification::One(EntityRef::entity("MockUser"))
        );
        // Namespaced entity labels resolve too.
        assert_eq!(
            LoadClassifier.classify("Billing::Invoice Load", "SELECT * FROM `invoices`"),
            Classification::One(EntityRef::entity("Billing::Invoice"))
        );
    }

    #[test]
    fn load_label_must_span_whole_operation() {
        // A label with trailing text is not a named load.
        let result =
            LoadClassifier.classify("MockUser Load All", "SELECT COUNT(*) FROM `mock_users`");
        assert_eq!(result, Classification::One(EntityRef::table("mock_users")));
    }

    #[test]
    fn load_falls_back_to_every_from_clause() {
        let sql = "SELECT * FROM `mock_users` UNION \
                   SELECT `mock_posts`.`mock_user_id` FROM `mock_posts`";
        assert_eq!(
            LoadClassifier.classify("SQL", sql),
            Classification::Many(vec![
                EntityRef::table("mock_users"),
                EntityRef::table("mock_posts"),
            ])
        );
    }

    #[test]
    fn load_join_references_only_the_from_table() {
        // A JOIN carries a single FROM clause; the joined table is not a
        // separate reference.
        let sql = "SELECT * FROM `mock_users` INNER JOIN `mock_posts` ON \
                   `mock_posts`.`mock_user_id` = `mock_users`.`id`";
        assert_eq!(
            LoadClassifier.classify("SQL", sql),
            Classification::One(EntityRef::table("mock_users"))
        );
    }

    #[test]
    fn update_matches_table() {
        assert_eq!(
            UpdateClassifier.classify("SQL", "UPDATE `widgets` SET `status` = 'a'"),
            Classification::One(EntityRef::table("widgets"))
        );
        assert!(
            UpdateClassifier
                .classify("SQL", "SELECT * FROM `widgets`")
                .is_none()
        );
    }

    #[test]
    fn destroy_label_and_chained_text() {
        assert_eq!(
            DestroyClassifier.classify("MockUser Destroy", "DELETE FROM `mock_users` WHERE 1"),
            Classification::One(EntityRef::entity("MockUser"))
        );
        assert_eq!(
            DestroyClassifier.classify("SQL", "DELETE FROM `mock_posts` WHERE `id` = 3"),
            Classification::One(EntityRef::table("mock_posts"))
        );
        assert_eq!(
            DestroyClassifier.classify("SQL", "DELETE DELETE FROM `mock_posts` WHERE 1"),
            Classification::One(EntityRef::table("mock_posts"))
        );
    }

    #[test]
    fn field_equality_extraction() {
        let sql = "UPDATE `widgets` SET `name` = 'z' WHERE `widgets`.`status` = 'a'";
        let Classification::One(entity_ref) = FieldClassifier.classify("SQL", sql) else {
            panic!("expected one ref");
        };
        assert_eq!(entity_ref.target, RefTarget::Table("widgets".into()));
        let field = entity_ref.field.expect("field observation");
        assert_eq!(field.name, "status");
        assert_eq!(field.value, FieldValue::Text("a".into()));
    }

    #[test]
    fn field_integer_values_are_typed() {
        let sql = "SELECT * FROM `widgets` WHERE `widgets`.`id` = 9999";
        let Classification::One(entity_ref) = FieldClassifier.classify("SQL", sql) else {
            panic!("expected one ref");
        };
        assert_eq!(
            entity_ref.field.expect("field").value,
            FieldValue::Int(9999)
        );
    }

    #[test]
    fn field_in_list_yields_one_ref_per_scalar() {
        let sql = "SELECT * FROM `widgets` WHERE `widgets`.`id` IN (1, 2, 3)";
        let Classification::Many(refs) = FieldClassifier.classify("SQL", sql) else {
            panic!("expected many refs");
        };
        let values: Vec<FieldValue> = refs
            .into_iter()
            .map(|r| r.field.expect("field").value)
            .collect();
        assert_eq!(
            values,
            vec![FieldValue::Int(1), FieldValue::Int(2), FieldValue::Int(3)]
        );
    }

    #[test]
    fn field_without_predicate_is_dropped() {
        assert!(
            FieldClassifier
                .classify("SQL", "SELECT * FROM `widgets`")
                .is_none()
        );
        // Multi-row insert: counted elsewhere, no values here.
        assert!(
            FieldClassifier
                .classify(
                    "SQL",
                    "INSERT INTO `widgets` (`a`, `b`) VALUES (1, 2), (3, 4)"
                )
                .is_none()
        );
    }

    #[test]
    fn value_normalization() {
        assert_eq!(FieldValue::parse("`42`"), FieldValue::Int(42));
        assert_eq!(FieldValue::parse("'abc'"), FieldValue::Text("abc".into()));
        assert_eq!(FieldValue::parse("\"7a\""), FieldValue::Text("7a".into()));
        assert_eq!(FieldValue::parse("-3"), FieldValue::Int(-3));
    }

    #[test]
    fn value_normalization_keeps_embedded_quotes() {
        // Only surrounding delimiters come off; escaped quotes inside the
        // literal survive verbatim.
        assert_eq!(
            FieldValue::parse("'O''Brien'"),
            FieldValue::Text("O''Brien".into())
        );
        assert_eq!(
            FieldValue::parse("\"say \"\"hi\"\"\""),
            FieldValue::Text("say \"\"hi".into())
        );
    }

    #[test]
    fn unmatched_input_never_panics() {
        for strategy in [
            &CreateClassifier as &dyn QueryClassifier,
            &LoadClassifier,
            &UpdateClassifier,
            &DestroyClassifier,
            &FieldClassifier,
        ] {
            assert!(strategy.classify("", "").is_none());
            assert!(strategy.classify("SQL", "PRAGMA wal_checkpoint").is_none());
        }
    }
}
