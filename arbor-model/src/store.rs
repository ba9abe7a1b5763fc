//! Backing-store interface
//!
//! The engine consumes any key-value backend through this trait. The one
//! non-obvious obligation is the mutation listener: the backend must invoke
//! it synchronously on every put/remove, while the mutation is still inside
//! the backend's own serialization, so that per-key event order equals
//! mutation order for every observer downstream.

use std::path::PathBuf;
use std::sync::Arc;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Storage I/O failure, carrying the path that was being accessed.
    #[error("could not access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backend error: {0}")]
    Backend(String),

    /// Operation this backend cannot perform. Distinct from I/O failures.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Wrap an I/O error with the path that was being accessed.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Callback invoked on every mutation with `(key, new_value, old_value)`.
/// `new_value` is `None` for removals, `old_value` is `None` for inserts.
pub type MutationListener = Arc<dyn Fn(&[u8], Option<&[u8]>, Option<&[u8]>) + Send + Sync>;

/// A thread-safe key-value backend.
///
/// Iteration visitors return `true` to continue and `false` to stop early;
/// an early stop is not an error.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or replace, returning the previous value if any.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Remove, returning the removed value if any.
    fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn len(&self) -> Result<u64, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn for_each_key(&self, visitor: &mut dyn FnMut(&[u8]) -> bool) -> Result<(), StoreError>;

    fn for_each_entry(
        &self,
        visitor: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), StoreError>;

    /// Remove every entry, reporting each removal to the mutation listener.
    fn clear(&self) -> Result<(), StoreError>;

    /// Install the mutation listener. At most one listener is active;
    /// installing again replaces the previous one.
    fn set_mutation_listener(&self, listener: MutationListener);

    /// Release the backend. Operations after close fail with [`StoreError::Closed`].
    fn close(&self) -> Result<(), StoreError>;
}
