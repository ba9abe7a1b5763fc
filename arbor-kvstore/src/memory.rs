//! In-memory backing store
//!
//! A RwLock'd map honoring the [`KeyValueStore`] mutation-listener contract:
//! a mutation mutex is held across the map update and the listener call, so
//! listeners observe mutations in the order they were applied. The map lock
//! itself is released before the listener runs, so a listener may read the
//! store; it must not mutate it from the same thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use arbor_model::{KeyValueStore, MutationListener, StoreError};

/// Memory-only key-value backend.
pub struct MemoryKvStore {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    listener: RwLock<Option<MutationListener>>,
    mutation_gate: Mutex<()>,
    closed: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create with a pre-sized table. `0` means no hint.
    pub fn with_capacity(entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(entries)),
            listener: RwLock::new(None),
            mutation_gate: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn notify(&self, key: &[u8], new: Option<&[u8]>, old: Option<&[u8]>) {
        let listener = match self.listener.read() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        if let Some(listener) = listener {
            listener(key, new, old);
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        let entries = self.entries.read().map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        let _gate = self.mutation_gate.lock().map_err(|_| StoreError::Backend("gate poisoned".into()))?;
        let old = {
            let mut entries =
                self.entries.write().map_err(|_| StoreError::Backend("lock poisoned".into()))?;
            entries.insert(key.to_vec(), value.to_vec())
        };
        self.notify(key, Some(value), old.as_deref());
        Ok(old)
    }

    fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        let _gate = self.mutation_gate.lock().map_err(|_| StoreError::Backend("gate poisoned".into()))?;
        let old = {
            let mut entries =
                self.entries.write().map_err(|_| StoreError::Backend("lock poisoned".into()))?;
            entries.remove(key)
        };
        if let Some(old) = &old {
            self.notify(key, None, Some(old));
        }
        Ok(old)
    }

    fn len(&self) -> Result<u64, StoreError> {
        self.check_open()?;
        let entries = self.entries.read().map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        Ok(entries.len() as u64)
    }

    fn for_each_key(&self, visitor: &mut dyn FnMut(&[u8]) -> bool) -> Result<(), StoreError> {
        self.check_open()?;
        let entries = self.entries.read().map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        for key in entries.keys() {
            if !visitor(key) {
                break;
            }
        }
        Ok(())
    }

    fn for_each_entry(
        &self,
        visitor: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), StoreError> {
        self.check_open()?;
        let entries = self.entries.read().map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        for (key, value) in entries.iter() {
            if !visitor(key, value) {
                break;
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.check_open()?;
        let _gate = self.mutation_gate.lock().map_err(|_| StoreError::Backend("gate poisoned".into()))?;
        let drained: Vec<(Vec<u8>, Vec<u8>)> = {
            let mut entries =
                self.entries.write().map_err(|_| StoreError::Backend("lock poisoned".into()))?;
            entries.drain().collect()
        };
        for (key, value) in &drained {
            self.notify(key, None, Some(value));
        }
        Ok(())
    }

    fn set_mutation_listener(&self, listener: MutationListener) {
        if let Ok(mut slot) = self.listener.write() {
            *slot = Some(listener);
        }
    }

    fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
