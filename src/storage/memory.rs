//! In-process store with memcached semantics
//!
//! Mirrors what a memcached server does for the commands the driver uses,
//! including lazy expiration against an injectable clock and CAS tokens.
//! Tests drive it with a [`ManualClock`](crate::storage::ManualClock) to
//! exercise TTL behaviour without sleeping.

use crate::StoreError;
use crate::protocol::validate_key;
use crate::storage::value::{Clock, Expiry, RawItem, StoredItem, SystemClock};
use crate::storage::{CasOutcome, Store};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Memory-backed store
#[derive(Debug)]
pub struct MemoryStore {
    items: Mutex<HashMap<Vec<u8>, StoredItem>>,
    clock: Arc<dyn Clock>,
    next_cas: AtomicU64,
    cas_enabled: bool,
    expired_removed: AtomicU64,
}

impl MemoryStore {
    /// Empty store on the wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty store reading time from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            clock,
            next_cas: AtomicU64::new(1),
            cas_enabled: true,
            expired_removed: AtomicU64::new(0),
        }
    }

    /// Behave like a backend without `gets`/`cas`
    #[must_use]
    pub fn without_cas(mut self) -> Self {
        self.cas_enabled = false;
        self
    }

    /// Number of live (unexpired) items
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.items
            .lock()
            .values()
            .filter(|item| !item.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live item exists under the raw (already namespaced) key
    pub fn contains_key(&self, key: &[u8]) -> bool {
        let now = self.clock.now();
        self.items
            .lock()
            .get(key)
            .is_some_and(|item| !item.is_expired(now))
    }

    /// Items removed by lazy expiration so far
    pub fn expired_removed(&self) -> u64 {
        self.expired_removed.load(Ordering::Relaxed)
    }

    fn next_token(&self) -> u64 {
        self.next_cas.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up a live item, dropping it if it has expired
    fn live<'a>(
        &self,
        items: &'a mut HashMap<Vec<u8>, StoredItem>,
        key: &[u8],
        now: u64,
    ) -> Option<&'a StoredItem> {
        if items.get(key).is_some_and(|item| item.is_expired(now)) {
            items.remove(key);
            self.expired_removed.fetch_add(1, Ordering::Relaxed);
            trace!(
                key = %String::from_utf8_lossy(key),
                "Lazy expiration: removed expired key"
            );
            return None;
        }
        items.get(key)
    }

    /// Store `item`, or drop the key when the expiry is already in the past
    fn put(
        &self,
        items: &mut HashMap<Vec<u8>, StoredItem>,
        key: &[u8],
        item: RawItem,
        expiry: Expiry,
        now: u64,
    ) {
        let expire_at = match expiry {
            Expiry::Never => 0,
            Expiry::At(ts) if ts > now => ts,
            Expiry::At(_) | Expiry::Immediately => {
                items.remove(key);
                return;
            }
        };

        items.insert(
            key.to_vec(),
            StoredItem {
                expire_at,
                flags: item.flags,
                cas: self.next_token(),
                data: item.data,
            },
        );
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<RawItem>, StoreError> {
        validate_key(key)?;
        let now = self.clock.now();
        let mut items = self.items.lock();
        Ok(self.live(&mut items, key, now).map(StoredItem::to_raw))
    }

    async fn set(&self, key: &[u8], item: RawItem, expiry: Expiry) -> Result<bool, StoreError> {
        validate_key(key)?;
        let now = self.clock.now();
        let mut items = self.items.lock();
        self.put(&mut items, key, item, expiry, now);
        Ok(true)
    }

    async fn add(&self, key: &[u8], item: RawItem, expiry: Expiry) -> Result<bool, StoreError> {
        validate_key(key)?;
        let now = self.clock.now();
        let mut items = self.items.lock();
        if self.live(&mut items, key, now).is_some() {
            return Ok(false);
        }
        self.put(&mut items, key, item, expiry, now);
        Ok(true)
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        validate_key(key)?;
        let now = self.clock.now();
        let mut items = self.items.lock();
        let existed = self.live(&mut items, key, now).is_some();
        items.remove(key);
        Ok(existed)
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        self.items.lock().clear();
        Ok(())
    }

    fn supports_cas(&self) -> bool {
        self.cas_enabled
    }

    async fn gets(&self, key: &[u8]) -> Result<Option<(RawItem, u64)>, StoreError> {
        if !self.cas_enabled {
            return Err(StoreError::Unsupported("gets"));
        }
        validate_key(key)?;
        let now = self.clock.now();
        let mut items = self.items.lock();
        Ok(self
            .live(&mut items, key, now)
            .map(|item| (item.to_raw(), item.cas)))
    }

    async fn cas(
        &self,
        key: &[u8],
        item: RawItem,
        expiry: Expiry,
        token: u64,
    ) -> Result<CasOutcome, StoreError> {
        if !self.cas_enabled {
            return Err(StoreError::Unsupported("cas"));
        }
        validate_key(key)?;
        let now = self.clock.now();
        let mut items = self.items.lock();
        let current = self.live(&mut items, key, now).map(|item| item.cas);
        match current {
            None => Ok(CasOutcome::NotFound),
            Some(cas) if cas != token => Ok(CasOutcome::Exists),
            Some(_) => {
                self.put(&mut items, key, item, expiry, now);
                Ok(CasOutcome::Stored)
            }
        }
    }
}
