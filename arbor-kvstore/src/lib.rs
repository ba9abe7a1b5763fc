//! Arbor KvStore
//!
//! The subscribing key-value store layer: two backing-store implementations
//! (in-memory and redb-persisted) and the [`SubscribingKvStore`] wrapper
//! that turns their mutation callbacks into replication events.

pub mod memory;
pub mod persistent;
pub mod subscribing;

pub use memory::MemoryKvStore;
pub use persistent::RedbKvStore;
pub use subscribing::SubscribingKvStore;

use arbor_core::{ParseError, RequestContext};
use arbor_model::StoreError;

/// Error type for the URI bootstrap surface.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Parse a URI and construct the store it describes.
///
/// `basePath` in the query selects a persisted backend; otherwise the store
/// is memory-only.
pub fn acquire_store(uri: &str) -> Result<SubscribingKvStore, AcquireError> {
    let ctx = RequestContext::parse(uri)?;
    Ok(SubscribingKvStore::new(&ctx)?)
}
