//! Subscriber traits
//!
//! Subscribers receive replication events from the collection that owns
//! them. A subscriber ends its own delivery by returning [`InvalidSubscriber`];
//! the collection isolates the failure and carries on with the rest.

use crate::event::ReplicationEvent;

/// Signal raised by a subscriber or enumeration consumer to say
/// "stop delivering to me". Fatal to the subscriber, not to the stream.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("invalid subscriber")]
pub struct InvalidSubscriber;

/// Receives replication events for a single store.
pub trait Subscriber: Send + Sync {
    fn on_event(&self, event: &ReplicationEvent) -> Result<(), InvalidSubscriber>;
}

/// Receives (topic, event) pairs, where the topic is the mutated key.
pub trait TopicSubscriber: Send + Sync {
    fn on_topic(&self, topic: &[u8], event: &ReplicationEvent) -> Result<(), InvalidSubscriber>;
}
