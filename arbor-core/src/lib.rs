//! Arbor Core
//!
//! The two halves of the engine core:
//! - request-context resolution: URI strings become typed, validated
//!   [`RequestContext`] values via the [`TypeRegistry`] capability table
//! - the subscription engine: [`SubscriptionCollection`] fans replication
//!   events out to subscribers, topic subscribers, and downstream trees

pub mod request_context;
pub mod subscriptions;
pub mod type_registry;

mod query;

// Re-exports
pub use request_context::{ParseError, RequestContext};
pub use subscriptions::{SubscriptionCollection, SubscriptionError};
pub use type_registry::{TypeHandle, TypeKind, TypeRegistry, UnknownType};
