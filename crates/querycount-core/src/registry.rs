//! Entity registry and table-to-entity resolution.
//!
//! The registry is an explicit, caller-populated mapping of entity names to
//! their physical tables and parent links — no runtime type introspection.
//! Test suites register fixture entities as they define them, so the set
//! may grow between instrumented blocks; [`TableResolver`] therefore
//! recomputes its view on every call and caches nothing.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// One registered entity type: its name, its physical table, and an
/// optional parent link forming the ancestry chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Entity (model) name, e.g. `"MockUser"`.
    pub name: String,
    /// Physical table the entity persists to, e.g. `"mock_users"`.
    pub table: String,
    /// Parent entity name, if any. Must already be registered.
    pub parent: Option<String>,
    /// Abstract entities anchor ancestry chains but never own a table for
    /// resolution purposes.
    pub abstract_entity: bool,
}

impl EntityDescriptor {
    /// A concrete entity persisting to `table`.
    #[must_use]
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            parent: None,
            abstract_entity: false,
        }
    }

    /// An abstract base entity. Its table is never resolved against.
    #[must_use]
    pub fn abstract_base(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: String::new(),
            parent: None,
            abstract_entity: true,
        }
    }

    /// Set the parent entity.
    #[must_use]
    pub fn child_of(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

/// Registration-ordered set of live entity descriptors.
///
/// Interior-mutable and shared as `Arc<EntityRegistry>`: the surrounding
/// test framework may register further entities between instrumented
/// blocks. Readers never hold a long-lived borrow.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: RwLock<Vec<EntityDescriptor>>,
}

impl EntityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor.
    ///
    /// Fails on a duplicate name or a parent that has not been registered
    /// yet — parents must be registered before their children.
    pub fn register(&self, descriptor: EntityDescriptor) -> CoreResult<()> {
        let mut entities = self.entities.write().unwrap_or_else(|e| e.into_inner());
        if entities.iter().any(|d| d.name == descriptor.name) {
            return Err(CoreError::duplicate(descriptor.name));
        }
        if let Some(parent) = &descriptor.parent {
            if !entities.iter().any(|d| &d.name == parent) {
                return Err(CoreError::unknown_parent(descriptor.name, parent.clone()));
            }
        }
        tracing::debug!(entity = %descriptor.name, table = %descriptor.table, "register entity");
        entities.push(descriptor);
        Ok(())
    }

    /// Ancestry chain for `name`, self first, root last. Empty if the
    /// entity is unknown.
    #[must_use]
    pub fn ancestry(&self, name: &str) -> Vec<String> {
        let entities = self.entities.read().unwrap_or_else(|e| e.into_inner());
        let mut chain = Vec::new();
        let mut current = Some(name.to_string());
        while let Some(cur) = current {
            let Some(descriptor) = entities.iter().find(|d| d.name == cur) else {
                break;
            };
            // A malformed cycle would loop forever; bail once seen.
            if chain.contains(&descriptor.name) {
                break;
            }
            chain.push(descriptor.name.clone());
            current = descriptor.parent.clone();
        }
        chain
    }

    /// Whether `candidate` has `ancestor` somewhere in its parent chain
    /// (strictly above itself).
    #[must_use]
    pub fn is_descendant_of(&self, candidate: &str, ancestor: &str) -> bool {
        self.ancestry(candidate)
            .iter()
            .skip(1)
            .any(|name| name == ancestor)
    }

    /// Snapshot of the concrete (non-abstract) descriptors, in
    /// registration order.
    #[must_use]
    pub fn concrete_entities(&self) -> Vec<EntityDescriptor> {
        let entities = self.entities.read().unwrap_or_else(|e| e.into_inner());
        entities
            .iter()
            .filter(|d| !d.abstract_entity)
            .cloned()
            .collect()
    }
}

/// Resolves a physical table name to the entity that owns it.
///
/// Several entities may persist to one table (inheritance, aliasing). The
/// owner reported is the most-derived candidate, since call sites query
/// through the most specific in-use type even when a shared base table
/// exists. Resolution is recomputed per call — the registry can grow
/// between queries.
#[derive(Debug, Clone)]
pub struct TableResolver {
    registry: Arc<EntityRegistry>,
}

impl TableResolver {
    /// Create a resolver over a shared registry.
    #[must_use]
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self { registry }
    }

    /// The entity name owning `table`, or `None` if no registered concrete
    /// entity uses it.
    ///
    /// Of all candidates sharing the table, those that are an ancestor of
    /// another candidate are discarded; of the remainder, the first
    /// registered wins. With a base and a derived entity on one table this
    /// always reports the derived one, regardless of registration order.
    #[must_use]
    pub fn resolve(&self, table: &str) -> Option<String> {
        let candidates: Vec<EntityDescriptor> = self
            .registry
            .concrete_entities()
            .into_iter()
            .filter(|d| d.table == table)
            .collect();

        let leaves: Vec<&EntityDescriptor> = candidates
            .iter()
            .filter(|candidate| {
                !candidates
                    .iter()
                    .any(|other| self.registry.is_descendant_of(&other.name, &candidate.name))
            })
            .collect();

        // Co-equal leaves tie-break on registration order.
        leaves.first().map(|d| d.name.clone())
    }
}
