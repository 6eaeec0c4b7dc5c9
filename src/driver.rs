//! Cache driver
//!
//! Maps application keys and values onto a [`Store`]:
//!
//! - keys are namespaced as `<instance_id>:<key>` so applications sharing a
//!   server never see each other's entries
//! - values go through [`Codec`] (JSON, optionally compressed)
//! - TTLs become absolute expiry timestamps
//! - every failure folds into a miss or `false`; a cache outage slows the
//!   caller down but never breaks it
//!
//! With [`ClearScope::Namespace`] keys carry one more segment,
//! `<instance_id>:<generation>:<key>`, and `clear()` moves the instance to a
//! new generation instead of flushing the server.

use crate::codec::Codec;
use crate::config::{ClearScope, Config, DriverConfig};
use crate::metrics::Metrics;
use crate::protocol::validate_key;
use crate::storage::{
    Clock, Expiry, MemcachedStore, RawItem, Store, SystemClock, TYPE_BYTES, ValueKind,
};
use crate::{StoreError, compare};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Key suffix holding the namespace generation
const GENERATION_KEY: &str = "__generation";

/// Result of a cache read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }
}

impl<T> From<Lookup<T>> for Option<T> {
    fn from(lookup: Lookup<T>) -> Self {
        lookup.into_option()
    }
}

/// Entry lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Kept until evicted or deleted
    Forever,
    /// Expires this many seconds after the write
    Seconds(u64),
}

impl Ttl {
    /// Zero and negative durations mean "never expire"
    pub fn from_secs(secs: i64) -> Self {
        match u64::try_from(secs) {
            Ok(secs) if secs > 0 => Ttl::Seconds(secs),
            _ => Ttl::Forever,
        }
    }

    /// Absolute expiry for a write happening at `now`
    pub fn expiry(self, now: u64) -> Expiry {
        match self {
            Ttl::Forever => Expiry::Never,
            Ttl::Seconds(secs) => Expiry::At(now.saturating_add(secs)),
        }
    }
}

impl From<i64> for Ttl {
    fn from(secs: i64) -> Self {
        Ttl::from_secs(secs)
    }
}

impl From<i32> for Ttl {
    fn from(secs: i32) -> Self {
        Ttl::from_secs(i64::from(secs))
    }
}

impl From<u64> for Ttl {
    fn from(secs: u64) -> Self {
        Ttl::from_secs(i64::try_from(secs).unwrap_or(i64::MAX))
    }
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        Ttl::from(duration.as_secs())
    }
}

/// Namespaced, fail-open cache over a store handle
pub struct CacheDriver<S: ?Sized> {
    store: Arc<S>,
    config: DriverConfig,
    codec: Codec,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl CacheDriver<MemcachedStore> {
    /// Connect to the configured memcached server.
    ///
    /// Fails immediately if the configuration is invalid or the server is
    /// unreachable; later operations never return errors.
    pub async fn connect(config: &Config) -> crate::Result<Self> {
        config.validate()?;
        let store = MemcachedStore::connect(config.store.clone()).await?;
        Ok(Self::new(Arc::new(store), config.driver.clone()))
    }
}

impl<S: Store + ?Sized> CacheDriver<S> {
    /// Wrap an already connected store
    pub fn new(store: Arc<S>, config: DriverConfig) -> Self {
        let codec =
            Codec::new(config.compress_threshold).with_max_decoded_size(config.max_decoded_size);
        Self {
            store,
            config,
            codec,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Read "now" from `clock` when computing expiry timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record into shared metrics instead of a private registry
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    /// TTL used by `set_default` and `add_default`
    pub fn default_ttl(&self) -> Ttl {
        Ttl::from_secs(self.config.default_ttl_secs)
    }

    pub(crate) fn codec(&self) -> &Codec {
        &self.codec
    }

    pub(crate) fn expiry(&self, ttl: Ttl) -> Expiry {
        ttl.expiry(self.clock.now())
    }

    /// Fetch a value.
    ///
    /// Misses, expired entries, undecodable payloads, raw scalars written by
    /// other clients and store failures all come back as `NotFound`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
        self.metrics.cmd_get.inc();
        let timer = self.metrics.cmd_latency.start_timer();

        let lookup = match self.fetch(key).await {
            Ok(Some(item)) => self.decode_item(key, &item),
            Ok(None) => Lookup::NotFound,
            Err(e) => {
                self.store_failed("get", key, &e);
                Lookup::NotFound
            }
        };

        timer.observe_duration();
        if lookup.is_found() {
            self.metrics.get_hits.inc();
        } else {
            self.metrics.get_misses.inc();
        }
        lookup
    }

    /// Store a value, replacing any existing entry and its TTL
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: impl Into<Ttl>,
    ) -> bool {
        self.metrics.cmd_set.inc();
        let timer = self.metrics.cmd_latency.start_timer();

        let Some(item) = self.encode(key, value) else {
            return false;
        };
        let expiry = self.expiry(ttl.into());

        let result = match self.resolve_key(key).await {
            Ok(nkey) => self.store.set(&nkey, item, expiry).await,
            Err(e) => Err(e),
        };

        timer.observe_duration();
        self.outcome("set", key, result)
    }

    /// [`set`](Self::set) with the configured default TTL
    pub async fn set_default<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        self.set(key, value, self.default_ttl()).await
    }

    /// Store a value only if the key is absent.
    ///
    /// Encoded exactly like [`set`](Self::set). Returns `false` if the key
    /// already holds a live entry.
    pub async fn add<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: impl Into<Ttl>,
    ) -> bool {
        self.metrics.cmd_add.inc();
        let timer = self.metrics.cmd_latency.start_timer();

        let Some(item) = self.encode(key, value) else {
            return false;
        };
        let expiry = self.expiry(ttl.into());

        let result = match self.resolve_key(key).await {
            Ok(nkey) => self.store.add(&nkey, item, expiry).await,
            Err(e) => Err(e),
        };

        timer.observe_duration();
        let added = self.outcome("add", key, result);
        if !added {
            debug!(key = %key, "add skipped, key present or store unavailable");
        }
        added
    }

    /// [`add`](Self::add) with the configured default TTL
    pub async fn add_default<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        self.add(key, value, self.default_ttl()).await
    }

    /// Remove an entry. Removing a missing key succeeds.
    pub async fn delete(&self, key: &str) -> bool {
        self.metrics.cmd_delete.inc();
        let timer = self.metrics.cmd_latency.start_timer();

        let result = match self.resolve_key(key).await {
            Ok(nkey) => self.store.delete(&nkey).await.map(|_| true),
            Err(e) => Err(e),
        };

        timer.observe_duration();
        self.outcome("delete", key, result)
    }

    /// Drop cached entries.
    ///
    /// With the default [`ClearScope::Global`] this flushes the **whole
    /// server**: every application sharing it loses all of its entries, not
    /// just this instance. [`ClearScope::Namespace`] only invalidates keys of
    /// this instance.
    pub async fn clear(&self) -> bool {
        self.metrics.cmd_clear.inc();
        let timer = self.metrics.cmd_latency.start_timer();

        let result = match self.config.clear_scope {
            ClearScope::Global => {
                warn!(
                    instance = %self.config.instance_id,
                    "Flushing all entries on the store, across every namespace"
                );
                self.store.flush_all().await.map(|()| true)
            }
            ClearScope::Namespace => self.bump_generation().await,
        };

        timer.observe_duration();
        self.outcome("clear", "*", result)
    }

    /// Replace the value only if it currently equals `expected`.
    ///
    /// See [`compare::compare_set`].
    pub async fn compare_set<T>(
        &self,
        key: &str,
        expected: Option<&T>,
        new: &T,
        ttl: impl Into<Ttl>,
    ) -> bool
    where
        T: Serialize + DeserializeOwned + PartialEq,
    {
        compare::compare_set(self, key, expected, new, ttl).await
    }

    /// Delete the entry only if it currently equals `expected`.
    ///
    /// See [`compare::compare_delete`].
    pub async fn compare_delete<T>(&self, key: &str, expected: &T) -> bool
    where
        T: Serialize + DeserializeOwned + PartialEq,
    {
        compare::compare_delete(self, key, expected).await
    }

    /// Store key for a logical key, validated for the wire
    pub(crate) async fn resolve_key(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut nkey = self.prefix().await?.into_bytes();
        nkey.extend_from_slice(key.as_bytes());
        validate_key(&nkey)?;
        Ok(nkey)
    }

    pub(crate) fn decode_item<T: DeserializeOwned>(&self, key: &str, item: &RawItem) -> Lookup<T> {
        match self.codec.decode(item) {
            Ok(value) => Lookup::Found(value),
            Err(e) => {
                self.metrics.decode_errors.inc();
                debug!(key = %key, error = %e, "Undecodable entry read as a miss");
                Lookup::NotFound
            }
        }
    }

    pub(crate) fn encode<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Option<RawItem> {
        match self.codec.encode(value) {
            Ok(item) => Some(item),
            Err(e) => {
                self.metrics.encode_errors.inc();
                warn!(key = %key, error = %e, "Failed to encode value");
                None
            }
        }
    }

    pub(crate) fn store_failed(&self, op: &str, key: &str, error: &StoreError) {
        self.metrics.store_errors.inc();
        warn!(op = op, key = %key, error = %error, "Cache store operation failed");
    }

    fn outcome(&self, op: &str, key: &str, result: Result<bool, StoreError>) -> bool {
        match result {
            Ok(done) => done,
            Err(e) => {
                self.store_failed(op, key, &e);
                false
            }
        }
    }

    async fn fetch(&self, key: &str) -> Result<Option<RawItem>, StoreError> {
        let nkey = self.resolve_key(key).await?;
        self.store.get(&nkey).await
    }

    async fn prefix(&self) -> Result<String, StoreError> {
        match self.config.clear_scope {
            ClearScope::Global => Ok(format!("{}:", self.config.instance_id)),
            ClearScope::Namespace => {
                let generation = self.generation().await?;
                Ok(format!("{}:{generation}:", self.config.instance_id))
            }
        }
    }

    fn generation_key(&self) -> String {
        format!("{}:{GENERATION_KEY}", self.config.instance_id)
    }

    /// Current namespace generation, created on first use.
    ///
    /// A fresh counter starts at the current clock value so it lands above
    /// any generation that was evicted along with the old counter.
    async fn generation(&self) -> Result<u64, StoreError> {
        let key = self.generation_key();

        let current = self.store.get(key.as_bytes()).await?;
        if let Some(generation) = current.as_ref().and_then(parse_generation) {
            return Ok(generation);
        }

        let seed = self.clock.now();
        let item = generation_item(seed);
        let created = if current.is_some() {
            // Unreadable counter: overwrite it
            self.store.set(key.as_bytes(), item, Expiry::Never).await?
        } else {
            self.store.add(key.as_bytes(), item, Expiry::Never).await?
        };
        if created {
            debug!(instance = %self.config.instance_id, generation = seed, "Started namespace generation");
            return Ok(seed);
        }

        // Another instance created it first
        self.store
            .get(key.as_bytes())
            .await?
            .as_ref()
            .and_then(parse_generation)
            .ok_or_else(|| StoreError::Server("namespace generation unavailable".to_string()))
    }

    async fn bump_generation(&self) -> Result<bool, StoreError> {
        let next = self.generation().await?.saturating_add(1);
        let stored = self
            .store
            .set(self.generation_key().as_bytes(), generation_item(next), Expiry::Never)
            .await?;
        if stored {
            info!(instance = %self.config.instance_id, generation = next, "Namespace cleared");
        }
        Ok(stored)
    }
}

fn generation_item(generation: u64) -> RawItem {
    RawItem::new(TYPE_BYTES, generation.to_string())
}

fn parse_generation(item: &RawItem) -> Option<u64> {
    if item.kind() != ValueKind::Bytes {
        return None;
    }
    std::str::from_utf8(&item.data).ok()?.trim().parse().ok()
}

impl<S: ?Sized> std::fmt::Debug for CacheDriver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDriver")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
