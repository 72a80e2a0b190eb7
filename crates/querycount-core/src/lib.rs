//! Query classification and counting engine for querycount
//!
//! This crate provides:
//! - A query-event notification bus with scoped, drop-safe subscriptions
//! - An explicit entity registry with ancestry-aware table resolution
//! - Pattern-based classification strategies for create/load/update/destroy
//!   statements plus field-value extraction
//! - A generic counter that instruments a block of code and aggregates
//!   per-entity counts, source lines, observed values, and wall time
//!
//! The assertion layer lives in the `querycount` crate; this crate never
//! formats user-facing failure messages.

#![forbid(unsafe_code)]

pub mod classify;
pub mod counter;
pub mod error;
pub mod events;
pub mod registry;

// Re-export key types for convenience
pub use classify::{
    Classification, CreateClassifier, DestroyClassifier, EntityRef, FieldClassifier,
    FieldObservation, FieldValue, LoadClassifier, QueryClassifier, RefTarget, UpdateClassifier,
};
pub use counter::{EntityAggregate, QueryCounter, QueryStats};
pub use error::{CoreError, CoreResult};
pub use events::{QueryBus, QueryEvent, Subscription, global_bus};
pub use registry::{EntityDescriptor, EntityRegistry, TableResolver};
