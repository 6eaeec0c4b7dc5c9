//! Store handles the driver runs against
//!
//! A store speaks in namespaced byte keys and flagged byte payloads; it knows
//! nothing about serialization. Every call is a single round-trip that the
//! store applies atomically.

mod memcached;
mod memory;
mod value;

pub use memcached::MemcachedStore;
pub use memory::MemoryStore;
pub use value::{
    Clock, Expiry, FLAG_COMPRESSED, MAX_RELATIVE_TTL, ManualClock, RawItem, StoredItem,
    SystemClock, TYPE_BOOLEAN, TYPE_BYTES, TYPE_FLOAT, TYPE_INTEGER, TYPE_MASK, TYPE_SERIALIZED,
    ValueKind, current_timestamp,
};

use crate::StoreError;
use async_trait::async_trait;

/// Outcome of a `cas` write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Token matched, new payload stored
    Stored,
    /// Item was modified since the token was issued
    Exists,
    /// Item is gone
    NotFound,
}

/// Connected store handle
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch an item
    async fn get(&self, key: &[u8]) -> Result<Option<RawItem>, StoreError>;

    /// Unconditional write. Returns `false` if the server refused the item.
    async fn set(&self, key: &[u8], item: RawItem, expiry: Expiry) -> Result<bool, StoreError>;

    /// Write only if absent. Returns `false` if the key exists.
    async fn add(&self, key: &[u8], item: RawItem, expiry: Expiry) -> Result<bool, StoreError>;

    /// Remove an item. Returns `false` if there was nothing to remove.
    async fn delete(&self, key: &[u8]) -> Result<bool, StoreError>;

    /// Drop every item on the store, whoever wrote it
    async fn flush_all(&self) -> Result<(), StoreError>;

    /// Whether `gets`/`cas` are available
    fn supports_cas(&self) -> bool {
        false
    }

    /// Fetch an item together with its version token
    async fn gets(&self, _key: &[u8]) -> Result<Option<(RawItem, u64)>, StoreError> {
        Err(StoreError::Unsupported("gets"))
    }

    /// Write only if the item still carries `token`
    async fn cas(
        &self,
        _key: &[u8],
        _item: RawItem,
        _expiry: Expiry,
        _token: u64,
    ) -> Result<CasOutcome, StoreError> {
        Err(StoreError::Unsupported("cas"))
    }
}
