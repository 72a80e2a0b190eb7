//! Assert exactly which database queries a block of test code performs.
//!
//! querycount instruments a closure, classifies every query event the
//! data-access layer publishes while it runs, and compares the per-entity
//! aggregate against an expected profile:
//!
//! ```rust,ignore
//! use querycount::{Matchers, MatchResultExt};
//!
//! let matchers = Matchers::new(registry);
//! matchers
//!     .only_creates(&[("User", 2)], || {
//!         seed_two_users();
//!     })
//!     .or_fail();
//! ```
//!
//! On mismatch the failure text reports the per-entity diff and, when
//! statements carry `/*line:…*/` annotations, the source locations the
//! unexpected queries were issued from.
//!
//! The underlying engine — event bus, entity registry, classification
//! strategies, counter — lives in `querycount-core` and is re-exported
//! here.

#![forbid(unsafe_code)]

pub mod expect;
mod render;

pub use expect::{ExpectationError, MatchResult, MatchResultExt, Matchers};

// Re-export the engine so callers need only one dependency.
pub use querycount_core::{
    Classification, CoreError, CoreResult, CreateClassifier, DestroyClassifier, EntityAggregate,
    EntityDescriptor, EntityRef, EntityRegistry, FieldClassifier, FieldObservation, FieldValue,
    LoadClassifier, QueryBus, QueryClassifier, QueryCounter, QueryEvent, QueryStats, RefTarget,
    Subscription, TableResolver, UpdateClassifier, global_bus,
};
