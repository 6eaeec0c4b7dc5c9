//! Raw items, item flags, expiry and clocks
//!
//! Flag layout (low byte of the memcached flags word):
//!
//! ```text
//!   bits 0-3  value type: 0 bytes, 1 integer, 2 float, 3 boolean, 4 serialized
//!   bit  4    payload is zlib compressed
//! ```
//!
//! Types 1-3 are scalars written natively by other memcache clients; the
//! driver never produces them and reads them as a miss.
//!
//! Expiry rules (memcached-compatible):
//! - 0 = never expire
//! - <= 2592000 (30 days) = relative seconds from now
//! - > 2592000 = absolute Unix timestamp
//! - negative = already expired

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum relative TTL value (30 days in seconds)
pub const MAX_RELATIVE_TTL: u64 = 2_592_000;

pub const TYPE_MASK: u32 = 0x0f;
pub const TYPE_BYTES: u32 = 0;
pub const TYPE_INTEGER: u32 = 1;
pub const TYPE_FLOAT: u32 = 2;
pub const TYPE_BOOLEAN: u32 = 3;
pub const TYPE_SERIALIZED: u32 = 4;
pub const FLAG_COMPRESSED: u32 = 0x10;

/// Interpretation of an item's payload, derived from its flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bytes,
    Integer,
    Float,
    Boolean,
    Serialized,
    Unknown(u32),
}

impl ValueKind {
    pub fn from_flags(flags: u32) -> Self {
        match flags & TYPE_MASK {
            TYPE_BYTES => ValueKind::Bytes,
            TYPE_INTEGER => ValueKind::Integer,
            TYPE_FLOAT => ValueKind::Float,
            TYPE_BOOLEAN => ValueKind::Boolean,
            TYPE_SERIALIZED => ValueKind::Serialized,
            other => ValueKind::Unknown(other),
        }
    }

    /// Integer, float and boolean items carry a bare scalar, not a payload
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            ValueKind::Integer | ValueKind::Float | ValueKind::Boolean
        )
    }
}

/// Item payload as exchanged with a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub flags: u32,
    pub data: Bytes,
}

impl RawItem {
    pub fn new(flags: u32, data: impl Into<Bytes>) -> Self {
        Self {
            flags,
            data: data.into(),
        }
    }

    pub fn kind(&self) -> ValueKind {
        ValueKind::from_flags(self.flags)
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }
}

/// When a stored item stops being visible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Lives until evicted or deleted
    Never,
    /// Absolute Unix timestamp (seconds)
    At(u64),
    /// Expired on arrival; used to drop an item through `cas`
    Immediately,
}

impl Expiry {
    /// Memcached `exptime` field for this expiry
    pub fn exptime(self) -> i64 {
        match self {
            Expiry::Never => 0,
            Expiry::At(ts) => i64::try_from(ts).unwrap_or(i64::MAX),
            Expiry::Immediately => -1,
        }
    }

    /// Interpret a memcached `exptime` field relative to `now`
    pub fn from_exptime(exptime: i64, now: u64) -> Self {
        match u64::try_from(exptime) {
            Err(_) => Expiry::Immediately,
            Ok(0) => Expiry::Never,
            Ok(secs) if secs <= MAX_RELATIVE_TTL => Expiry::At(now + secs),
            Ok(ts) => Expiry::At(ts),
        }
    }
}

/// An item as held by [`MemoryStore`](crate::storage::MemoryStore)
#[derive(Debug, Clone)]
pub struct StoredItem {
    /// Expiration timestamp (0 = never expire)
    pub expire_at: u64,
    /// Memcached flags
    pub flags: u32,
    /// Version token, bumped on every write
    pub cas: u64,
    /// Actual data
    pub data: Bytes,
}

impl StoredItem {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expire_at != 0 && now >= self.expire_at
    }

    pub fn to_raw(&self) -> RawItem {
        RawItem {
            flags: self.flags,
            data: self.data.clone(),
        }
    }
}

/// Source of "now" in Unix seconds
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        current_timestamp()
    }
}

/// Virtual clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Get the current Unix timestamp
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
