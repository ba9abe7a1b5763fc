//! SubscribingKvStore - store wrapper that publishes replication events
//!
//! Wraps a backing store chosen from the request context, installs itself as
//! the backing store's mutation listener, and translates every mutation into
//! a replication event routed through the owned subscription collection: a
//! put over a previous value becomes `Updated`, a put on a fresh key becomes
//! `Inserted`, a remove becomes `Removed`.
//!
//! A mutation gate serializes mutations with subscriber registration, so a
//! new subscriber's bootstrap snapshot is atomic with its registration - no
//! event is missed between the two.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use arbor_core::{RequestContext, SubscriptionCollection, SubscriptionError};
use arbor_model::{
    Clock, InvalidSubscriber, KeyValueStore, ReplicationEvent, StoreError, Subscriber,
    SystemClock, TopicSubscriber,
};

use crate::memory::MemoryKvStore;
use crate::persistent::RedbKvStore;

const BROADCAST_CAPACITY: usize = 1024;

/// Key-value store that publishes a replication event for every mutation.
pub struct SubscribingKvStore {
    name: String,
    backing: Arc<dyn KeyValueStore>,
    subscriptions: Arc<SubscriptionCollection>,
    clock: Arc<dyn Clock>,
    origin: u64,
    put_returns_null: bool,
    remove_returns_null: bool,
    broadcast_tx: broadcast::Sender<ReplicationEvent>,
    mutation_gate: Mutex<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SubscribingKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribingKvStore")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("put_returns_null", &self.put_returns_null)
            .field("remove_returns_null", &self.remove_returns_null)
            .finish_non_exhaustive()
    }
}

/// Subscriber adapter feeding the async broadcast bridge.
struct BroadcastBridge {
    tx: broadcast::Sender<ReplicationEvent>,
}

impl Subscriber for BroadcastBridge {
    fn on_event(&self, event: &ReplicationEvent) -> Result<(), InvalidSubscriber> {
        // No receivers is not a failure.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

impl SubscribingKvStore {
    /// Construct the store a context describes, with the system clock and a
    /// local origin id.
    pub fn new(ctx: &RequestContext) -> Result<Self, StoreError> {
        Self::with_clock(ctx, Arc::new(SystemClock), 0)
    }

    /// Construct with an explicit clock and origin identifier. Both are
    /// stamped onto every event this store emits.
    ///
    /// `base_path` set selects a redb backend persisted at
    /// `base_path/name`; unset selects a memory backend. Sizing hints are
    /// forwarded only when non-zero. `put_returns_null` and
    /// `remove_returns_null` default to `true` unless explicitly `false`.
    pub fn with_clock(
        ctx: &RequestContext,
        clock: Arc<dyn Clock>,
        origin: u64,
    ) -> Result<Self, StoreError> {
        let backing: Arc<dyn KeyValueStore> = match ctx.base_path() {
            Some(base) => Arc::new(RedbKvStore::open(
                base.join(ctx.name()),
                ctx.entries(),
                ctx.average_value_size(),
            )?),
            None => Arc::new(MemoryKvStore::with_capacity(ctx.entries() as usize)),
        };

        let subscriptions = Arc::new(SubscriptionCollection::for_spec(ctx));

        let listener_subs = Arc::clone(&subscriptions);
        let listener_clock = Arc::clone(&clock);
        backing.set_mutation_listener(Arc::new(
            move |key: &[u8], new: Option<&[u8]>, old: Option<&[u8]>| {
                let timestamp_ms = listener_clock.now_ms();
                let event = match (new, old) {
                    (Some(new), Some(old)) => {
                        ReplicationEvent::updated(key, old, new, origin, timestamp_ms)
                    }
                    (Some(new), None) => {
                        ReplicationEvent::inserted(key, new, origin, timestamp_ms)
                    }
                    (None, Some(old)) => ReplicationEvent::removed(key, old, origin, timestamp_ms),
                    (None, None) => return,
                };
                listener_subs.notify_event(&event);
            },
        ));

        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let bridge: Arc<dyn Subscriber> =
            Arc::new(BroadcastBridge { tx: broadcast_tx.clone() });
        subscriptions.register_subscriber(&RequestContext::default(), bridge);

        debug!(name = ctx.name(), "opened subscribing store");
        Ok(Self {
            name: ctx.name().to_string(),
            backing,
            subscriptions,
            clock,
            origin,
            put_returns_null: !matches!(ctx.put_returns_null(), Some(false)),
            remove_returns_null: !matches!(ctx.remove_returns_null(), Some(false)),
            broadcast_tx,
            mutation_gate: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The subscription collection owned by this store.
    pub fn subscriptions(&self) -> &Arc<SubscriptionCollection> {
        &self.subscriptions
    }

    // ==================== Map operations ====================

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        self.backing.get(key)
    }

    /// Read into a caller-supplied mutable destination.
    ///
    /// This backend has no value reuse: a `Some` destination is an explicit
    /// unsupported-operation error, never silently ignored.
    pub fn get_using(
        &self,
        key: &[u8],
        using: Option<&mut Vec<u8>>,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        if using.is_some() {
            return Err(StoreError::Unsupported("mutable value reuse"));
        }
        self.backing.get(key)
    }

    /// Insert or replace, returning the prior value only when the
    /// put-returns-null policy is off.
    pub fn get_and_put(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        let _gate = self.gate()?;
        let old = self.backing.put(key, value)?;
        Ok(if self.put_returns_null { None } else { old })
    }

    /// Remove, returning the removed value only when the
    /// remove-returns-null policy is off.
    pub fn get_and_remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        let _gate = self.gate()?;
        let old = self.backing.remove(key)?;
        Ok(if self.remove_returns_null { None } else { old })
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.get_and_put(key, value).map(|_| ())
    }

    pub fn remove(&self, key: &[u8]) -> Result<(), StoreError> {
        self.get_and_remove(key).map(|_| ())
    }

    pub fn len(&self) -> Result<u64, StoreError> {
        self.check_open()?;
        self.backing.len()
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Remove every entry, publishing a `Removed` event per entry.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.check_open()?;
        let _gate = self.gate()?;
        self.backing.clear()
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.check_open()?;
        let mut out = Vec::new();
        self.backing.for_each_entry(&mut |key, value| {
            out.push((key.to_vec(), value.to_vec()));
            true
        })?;
        Ok(out)
    }

    // ==================== Bulk enumeration ====================

    /// Stream every key to the consumer. This backend has no native
    /// segmentation, so the segment is ignored and the whole key set is
    /// streamed. A consumer signaling invalid stops the stream; that is not
    /// a fault.
    pub fn keys_for(
        &self,
        _segment: usize,
        mut consumer: impl FnMut(&[u8]) -> Result<(), InvalidSubscriber>,
    ) -> Result<(), StoreError> {
        self.check_open()?;
        self.backing.for_each_key(&mut |key| consumer(key).is_ok())
    }

    /// Stream every entry to the consumer as an `Inserted` event stamped
    /// with this store's origin and the snapshot time. Segment handling as
    /// in [`keys_for`](Self::keys_for).
    pub fn entries_for(
        &self,
        _segment: usize,
        mut consumer: impl FnMut(&ReplicationEvent) -> Result<(), InvalidSubscriber>,
    ) -> Result<(), StoreError> {
        self.check_open()?;
        let timestamp_ms = self.clock.now_ms();
        self.backing.for_each_entry(&mut |key, value| {
            let event = ReplicationEvent::inserted(key, value, self.origin, timestamp_ms);
            consumer(&event).is_ok()
        })
    }

    // ==================== Subscription surface ====================

    /// Register a subscriber for this store's events.
    ///
    /// Unless the registration spec says `bootstrap=false`, the current
    /// entries are streamed to the subscriber first, atomically with
    /// registration, so it observes the snapshot strictly before any live
    /// event. A subscriber that signals invalid during the snapshot is
    /// dropped without being registered.
    pub fn register_subscriber(
        &self,
        spec: &RequestContext,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<(), StoreError> {
        self.check_open()?;
        let _gate = self.gate()?;
        if !matches!(spec.bootstrap(), Some(false)) {
            let timestamp_ms = self.clock.now_ms();
            let mut valid = true;
            self.backing.for_each_entry(&mut |key, value| {
                let event = ReplicationEvent::inserted(key, value, self.origin, timestamp_ms);
                if subscriber.on_event(&event).is_err() {
                    valid = false;
                }
                valid
            })?;
            if !valid {
                warn!(name = %self.name, "subscriber signaled invalid during bootstrap");
                return Ok(());
            }
        }
        self.subscriptions.register_subscriber(spec, subscriber);
        Ok(())
    }

    /// Register a topic subscriber; bootstrap semantics as in
    /// [`register_subscriber`](Self::register_subscriber).
    pub fn register_topic_subscriber(
        &self,
        spec: &RequestContext,
        subscriber: Arc<dyn TopicSubscriber>,
    ) -> Result<(), StoreError> {
        self.check_open()?;
        let _gate = self.gate()?;
        if !matches!(spec.bootstrap(), Some(false)) {
            let timestamp_ms = self.clock.now_ms();
            let mut valid = true;
            self.backing.for_each_entry(&mut |key, value| {
                let event = ReplicationEvent::inserted(key, value, self.origin, timestamp_ms);
                if subscriber.on_topic(key, &event).is_err() {
                    valid = false;
                }
                valid
            })?;
            if !valid {
                warn!(name = %self.name, "topic subscriber signaled invalid during bootstrap");
                return Ok(());
            }
        }
        self.subscriptions.register_topic_subscriber(spec, subscriber);
        Ok(())
    }

    pub fn unregister_subscriber(&self, subscriber: &Arc<dyn Subscriber>) {
        self.subscriptions.unregister_subscriber(subscriber);
    }

    pub fn unregister_topic_subscriber(&self, subscriber: &Arc<dyn TopicSubscriber>) {
        self.subscriptions.unregister_topic_subscriber(subscriber);
    }

    /// Mirror every event of this store into another collection.
    pub fn register_downstream(
        &self,
        collection: Arc<SubscriptionCollection>,
    ) -> Result<(), SubscriptionError> {
        self.subscriptions.register_downstream(collection)
    }

    /// Receive cloned events over an async channel. Lagging receivers drop
    /// the oldest events, per broadcast-channel semantics.
    pub fn subscribe(&self) -> broadcast::Receiver<ReplicationEvent> {
        self.broadcast_tx.subscribe()
    }

    // ==================== Lifecycle ====================

    /// Release the backing store. Later operations fail with a closed error.
    pub fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        debug!(name = %self.name, "closed subscribing store");
        self.backing.close()
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn gate(&self) -> Result<std::sync::MutexGuard<'_, ()>, StoreError> {
        self.mutation_gate.lock().map_err(|_| StoreError::Backend("gate poisoned".into()))
    }
}
