//! SubscriptionCollection - per-store event fan-out
//!
//! Each store owns one collection. An event delivered to a collection goes
//! to its local subscribers (filtered by expected value type), then its
//! topic subscribers, then recursively to downstream collections in
//! registration order. One visited set per delivery guarantees at-most-once
//! delivery even when the downstream graph is diamond-shaped; cycles are
//! rejected at registration time.
//!
//! A subscriber that signals invalid is fatal to itself only: the failure is
//! logged, the subscriber is unregistered, and delivery to everyone else
//! proceeds.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tracing::warn;
use uuid::Uuid;

use arbor_model::{ReplicationEvent, Subscriber, TopicSubscriber};

use crate::request_context::RequestContext;
use crate::type_registry::TypeHandle;

/// Error type for subscription graph operations.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("downstream registration would create a cycle")]
    DownstreamCycle,
}

struct SubscriberEntry {
    subscriber: Arc<dyn Subscriber>,
    filter: Option<TypeHandle>,
}

/// Per-store registry of subscribers and downstream collections.
pub struct SubscriptionCollection {
    id: Uuid,
    value_type: Option<TypeHandle>,
    subscribers: RwLock<Vec<SubscriberEntry>>,
    topic_subscribers: RwLock<Vec<Arc<dyn TopicSubscriber>>>,
    downstream: RwLock<Vec<Arc<SubscriptionCollection>>>,
}

impl SubscriptionCollection {
    /// Create a collection for a store holding values of the given type.
    /// `None` disables type filtering entirely.
    pub fn new(value_type: Option<TypeHandle>) -> Self {
        Self {
            id: Uuid::new_v4(),
            value_type,
            subscribers: RwLock::new(Vec::new()),
            topic_subscribers: RwLock::new(Vec::new()),
            downstream: RwLock::new(Vec::new()),
        }
    }

    /// Create a collection typed from a request context's value type.
    pub fn for_spec(spec: &RequestContext) -> Self {
        Self::new(spec.value_type().cloned())
    }

    /// Register a subscriber keyed by the value type the spec asks for.
    /// Registering the same subscriber again is a no-op.
    pub fn register_subscriber(&self, spec: &RequestContext, subscriber: Arc<dyn Subscriber>) {
        let Ok(mut subs) = self.subscribers.write() else { return };
        if subs.iter().any(|e| same_subscriber(&e.subscriber, &subscriber)) {
            return;
        }
        subs.push(SubscriberEntry { subscriber, filter: spec.value_type().cloned() });
    }

    /// Register a subscriber for (topic, event) pairs.
    pub fn register_topic_subscriber(
        &self,
        _spec: &RequestContext,
        subscriber: Arc<dyn TopicSubscriber>,
    ) {
        let Ok(mut subs) = self.topic_subscribers.write() else { return };
        if subs.iter().any(|s| same_topic_subscriber(s, &subscriber)) {
            return;
        }
        subs.push(subscriber);
    }

    /// Remove a subscriber. Removing one that is not registered is not an
    /// error. Takes effect no later than the next `notify_event` call.
    pub fn unregister_subscriber(&self, subscriber: &Arc<dyn Subscriber>) {
        if let Ok(mut subs) = self.subscribers.write() {
            subs.retain(|e| !same_subscriber(&e.subscriber, subscriber));
        }
    }

    /// Remove a topic subscriber; idempotent like `unregister_subscriber`.
    pub fn unregister_topic_subscriber(&self, subscriber: &Arc<dyn TopicSubscriber>) {
        if let Ok(mut subs) = self.topic_subscribers.write() {
            subs.retain(|s| !same_topic_subscriber(s, subscriber));
        }
    }

    /// Append a downstream collection that must mirror every event this one
    /// receives. An edge that would make this collection reachable from
    /// itself is rejected.
    pub fn register_downstream(
        &self,
        collection: Arc<SubscriptionCollection>,
    ) -> Result<(), SubscriptionError> {
        let mut visited = HashSet::new();
        if collection.id == self.id || collection.reaches(self.id, &mut visited) {
            return Err(SubscriptionError::DownstreamCycle);
        }
        if let Ok(mut downstream) = self.downstream.write() {
            downstream.push(collection);
        }
        Ok(())
    }

    /// Deliver an event to every subscriber reachable from this collection,
    /// at most once each per call.
    pub fn notify_event(&self, event: &ReplicationEvent) {
        let mut visited = HashSet::new();
        self.deliver(event, &mut visited);
    }

    /// Number of directly registered subscribers (topic subscribers excluded).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }

    fn deliver(&self, event: &ReplicationEvent, visited: &mut HashSet<Uuid>) {
        if !visited.insert(self.id) {
            return;
        }

        // Snapshot under the read lock, deliver outside it, so subscribers
        // may (un)register from inside their callbacks.
        let entries: Vec<(Arc<dyn Subscriber>, bool)> = match self.subscribers.read() {
            Ok(subs) => subs
                .iter()
                .map(|e| (Arc::clone(&e.subscriber), self.filter_matches(e.filter.as_ref())))
                .collect(),
            Err(_) => Vec::new(),
        };
        let mut failed: Vec<Arc<dyn Subscriber>> = Vec::new();
        for (subscriber, matches) in entries {
            if matches && subscriber.on_event(event).is_err() {
                warn!(collection = %self.id, "subscriber signaled invalid, unregistering");
                failed.push(subscriber);
            }
        }
        for subscriber in &failed {
            self.unregister_subscriber(subscriber);
        }

        let topics: Vec<Arc<dyn TopicSubscriber>> = match self.topic_subscribers.read() {
            Ok(subs) => subs.iter().map(Arc::clone).collect(),
            Err(_) => Vec::new(),
        };
        let mut failed_topics: Vec<Arc<dyn TopicSubscriber>> = Vec::new();
        for subscriber in topics {
            if subscriber.on_topic(event.key(), event).is_err() {
                warn!(collection = %self.id, "topic subscriber signaled invalid, unregistering");
                failed_topics.push(subscriber);
            }
        }
        for subscriber in &failed_topics {
            self.unregister_topic_subscriber(subscriber);
        }

        let downstream: Vec<Arc<SubscriptionCollection>> = match self.downstream.read() {
            Ok(d) => d.iter().map(Arc::clone).collect(),
            Err(_) => Vec::new(),
        };
        for collection in downstream {
            collection.deliver(event, visited);
        }
    }

    /// A subscriber matches when either side leaves its type undeclared, or
    /// the declared types agree.
    fn filter_matches(&self, filter: Option<&TypeHandle>) -> bool {
        match (filter, &self.value_type) {
            (None, _) | (_, None) => true,
            (Some(f), Some(v)) => f == v,
        }
    }

    fn reaches(&self, target: Uuid, visited: &mut HashSet<Uuid>) -> bool {
        if self.id == target {
            return true;
        }
        if !visited.insert(self.id) {
            return false;
        }
        let downstream: Vec<Arc<SubscriptionCollection>> = match self.downstream.read() {
            Ok(d) => d.iter().map(Arc::clone).collect(),
            Err(_) => Vec::new(),
        };
        downstream.iter().any(|c| c.reaches(target, visited))
    }
}

fn same_subscriber(a: &Arc<dyn Subscriber>, b: &Arc<dyn Subscriber>) -> bool {
    // Compare allocation addresses, not vtable pointers.
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn same_topic_subscriber(a: &Arc<dyn TopicSubscriber>, b: &Arc<dyn TopicSubscriber>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
