//! Prelude module for common imports.
//!
//! This module re-exports commonly used types and traits for convenience.
//!
//! # Usage
//!
//! ```ignore
//! use mcdriver::prelude::*;
//! ```

// Error types
pub use crate::error::{CodecError, DriverError, ProtocolError, Result, StoreError};

// Configuration
pub use crate::config::{ClearScope, Config, DriverConfig, StoreConfig};

// Driver
pub use crate::compare::{compare_delete, compare_set};
pub use crate::driver::{CacheDriver, Lookup, Ttl};

// Storage
pub use crate::storage::{
    CasOutcome, Clock, Expiry, ManualClock, MemcachedStore, MemoryStore, RawItem, Store,
    SystemClock,
};

// Metrics
pub use crate::metrics::Metrics;

// Common external crates
pub use std::sync::Arc;
pub use tracing::{debug, error, info, trace, warn};
