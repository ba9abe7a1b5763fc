//! Arbor Model
//!
//! Pure data types and traits for the Arbor engine, decoupled from
//! storage engines, network stacks, and the resolution layer.

pub mod clock;
pub mod event;
pub mod store;
pub mod subscriber;
pub mod wire;

// Re-exports
pub use clock::{Clock, MockClock, SystemClock};
pub use event::ReplicationEvent;
pub use store::{KeyValueStore, MutationListener, StoreError};
pub use subscriber::{InvalidSubscriber, Subscriber, TopicSubscriber};
pub use wire::WireFormat;
