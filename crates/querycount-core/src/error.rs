//! Error types for the querycount engine

use thiserror::Error;

/// Errors raised while populating the entity registry.
///
/// Classification and resolution never error: statements that match no
/// pattern and tables no registered entity owns are dropped silently.
#[derive(Error, Debug)]
pub enum CoreError {
    /// An entity with this name is already registered
    #[error("entity already registered: {name}")]
    DuplicateEntity { name: String },

    /// A descriptor names a parent that has not been registered
    #[error("unknown parent entity {parent} for {entity}")]
    UnknownParent { entity: String, parent: String },
}

/// Result type alias for registry operations
pub type CoreResult<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create a duplicate-entity error
    pub fn duplicate(name: impl Into<String>) -> Self {
        Self::DuplicateEntity { name: name.into() }
    }

    /// Create an unknown-parent error
    pub fn unknown_parent(entity: impl Into<String>, parent: impl Into<String>) -> Self {
        Self::UnknownParent {
            entity: entity.into(),
            parent: parent.into(),
        }
    }
}
