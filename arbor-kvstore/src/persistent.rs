//! Persisted backing store
//!
//! redb-backed implementation of [`KeyValueStore`], one database file per
//! store. The parent directory must already exist and be writable;
//! construction fails with a storage error carrying the attempted path
//! otherwise. A mutation mutex extends the write-transaction serialization
//! through the listener hand-off.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::debug;

use arbor_model::{KeyValueStore, MutationListener, StoreError};

const DATA_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("data");

/// redb-backed key-value store persisted at a single file path.
pub struct RedbKvStore {
    db: Database,
    path: PathBuf,
    listener: RwLock<Option<MutationListener>>,
    mutation_gate: Mutex<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for RedbKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbKvStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbKvStore {
    /// Open or create a database at `path`.
    ///
    /// Sizing hints are applied only when non-zero: together they bound the
    /// database cache at roughly `entries * average_value_size` bytes.
    pub fn open(path: impl Into<PathBuf>, entries: u64, average_value_size: f64) -> Result<Self, StoreError> {
        let path = path.into();
        let mut builder = Database::builder();
        if entries != 0 && average_value_size != 0.0 {
            builder.set_cache_size((entries as f64 * average_value_size) as usize);
        }
        let db = builder
            .create(&path)
            .map_err(|e| StoreError::io(&path, std::io::Error::other(e.to_string())))?;

        // Ensure the table exists so reads never race its creation.
        let txn = db.begin_write().map_err(backend_err)?;
        txn.open_table(DATA_TABLE).map_err(backend_err)?;
        txn.commit().map_err(backend_err)?;

        debug!(path = %path.display(), "opened persisted store");
        Ok(Self {
            db,
            path,
            listener: RwLock::new(None),
            mutation_gate: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// The database file path.
    pub fn path(&self) -> &Path {
        &self.path
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

fn backend_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl KeyValueStore for RedbKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        let txn = self.db.begin_read().map_err(backend_err)?;
        let table = txn.open_table(DATA_TABLE).map_err(backend_err)?;
        Ok(table.get(key).map_err(backend_err)?.map(|v| v.value().to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        let _gate =
            self.mutation_gate.lock().map_err(|_| StoreError::Backend("gate poisoned".into()))?;
        let txn = self.db.begin_write().map_err(backend_err)?;
        let old = {
            let mut table = txn.open_table(DATA_TABLE).map_err(backend_err)?;
            let prev = table.insert(key, value).map_err(backend_err)?;
            prev.map(|g| g.value().to_vec())
        };
        txn.commit().map_err(backend_err)?;
        self.notify(key, Some(value), old.as_deref());
        Ok(old)
    }

    fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        let _gate =
            self.mutation_gate.lock().map_err(|_| StoreError::Backend("gate poisoned".into()))?;
        let txn = self.db.begin_write().map_err(backend_err)?;
        let old = {
            let mut table = txn.open_table(DATA_TABLE).map_err(backend_err)?;
            let prev = table.remove(key).map_err(backend_err)?;
            prev.map(|g| g.value().to_vec())
        };
        txn.commit().map_err(backend_err)?;
        if let Some(old) = &old {
            self.notify(key, None, Some(old));
        }
        Ok(old)
    }

    fn len(&self) -> Result<u64, StoreError> {
        self.check_open()?;
        let txn = self.db.begin_read().map_err(backend_err)?;
        let table = txn.open_table(DATA_TABLE).map_err(backend_err)?;
        table.len().map_err(backend_err)
    }

    fn for_each_key(&self, visitor: &mut dyn FnMut(&[u8]) -> bool) -> Result<(), StoreError> {
        self.check_open()?;
        let txn = self.db.begin_read().map_err(backend_err)?;
        let table = txn.open_table(DATA_TABLE).map_err(backend_err)?;
        for item in table.iter().map_err(backend_err)? {
            let (key, _) = item.map_err(backend_err)?;
            if !visitor(key.value()) {
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
        let txn = self.db.begin_read().map_err(backend_err)?;
        let table = txn.open_table(DATA_TABLE).map_err(backend_err)?;
        for item in table.iter().map_err(backend_err)? {
            let (key, value) = item.map_err(backend_err)?;
            if !visitor(key.value(), value.value()) {
                break;
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.check_open()?;
        let _gate =
            self.mutation_gate.lock().map_err(|_| StoreError::Backend("gate poisoned".into()))?;
        let txn = self.db.begin_write().map_err(backend_err)?;
        let drained = {
            let mut table = txn.open_table(DATA_TABLE).map_err(backend_err)?;
            let pairs: Vec<(Vec<u8>, Vec<u8>)> = table
                .iter()
                .map_err(backend_err)?
                .map(|item| {
                    item.map(|(k, v)| (k.value().to_vec(), v.value().to_vec()))
                        .map_err(backend_err)
                })
                .collect::<Result<_, _>>()?;
            for (key, _) in &pairs {
                table.remove(key.as_slice()).map_err(backend_err)?;
            }
            pairs
        };
        txn.commit().map_err(backend_err)?;
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
        debug!(path = %self.path.display(), "closed persisted store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_put_get_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let store = RedbKvStore::open(&path, 0, 0.0).unwrap();
            store.put(b"k", b"v").unwrap();
            store.close().unwrap();
        }
        let store = RedbKvStore::open(&path, 0, 0.0).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_inaccessible_path_fails_with_io_error() {
        let dir = tempfile::tempdir().unwrap();
        // A file where a directory is expected makes the path inaccessible.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let path = blocker.join("store.db");

        let err = RedbKvStore::open(&path, 0, 0.0).unwrap_err();
        match err {
            StoreError::Io { path: p, .. } => assert_eq!(p, path),
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn test_listener_callbacks() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbKvStore::open(dir.path().join("s.db"), 0, 0.0).unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        store.set_mutation_listener(Arc::new(
            move |key: &[u8], new: Option<&[u8]>, old: Option<&[u8]>| {
                sink.lock().unwrap().push((
                    key.to_vec(),
                    new.map(<[u8]>::to_vec),
                    old.map(<[u8]>::to_vec),
                ));
            },
        ));

        store.put(b"k", b"v1").unwrap();
        store.put(b"k", b"v2").unwrap();
        store.remove(b"k").unwrap();
        store.remove(b"k").unwrap(); // absent: no callback

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], (b"k".to_vec(), Some(b"v1".to_vec()), None));
        assert_eq!(calls[1], (b"k".to_vec(), Some(b"v2".to_vec()), Some(b"v1".to_vec())));
        assert_eq!(calls[2], (b"k".to_vec(), None, Some(b"v2".to_vec())));
    }

    #[test]
    fn test_iteration_and_early_stop() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbKvStore::open(dir.path().join("s.db"), 0, 0.0).unwrap();
        for i in 0..5u8 {
            store.put(&[i], &[i]).unwrap();
        }
        let mut seen = Vec::new();
        store
            .for_each_entry(&mut |k, v| {
                seen.push((k.to_vec(), v.to_vec()));
                seen.len() < 2
            })
            .unwrap();
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_clear_and_closed() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbKvStore::open(dir.path().join("s.db"), 0, 0.0).unwrap();
        store.put(b"a", b"1").unwrap();
        store.put(b"b", b"2").unwrap();
        store.clear().unwrap();
        assert_eq!(store.len().unwrap(), 0);

        store.close().unwrap();
        assert!(matches!(store.get(b"a"), Err(StoreError::Closed)));
    }
}
