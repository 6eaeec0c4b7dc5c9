//! # mcdriver
//!
//! Namespaced, fail-open cache driver for memcached.
//!
//! ## Features
//!
//! - `get` / `set` / `add` / `delete` / `clear` over any serde value
//! - Keys namespaced per instance, so applications can share one server
//! - Reads tell "no entry" apart from "entry holding `false`"
//! - TTLs translated to absolute expiry, zero or negative = never expire
//! - `compare_set` / `compare_delete` on memcached CAS tokens, with a
//!   read-compare-write fallback for stores without CAS
//! - Every failure is a miss or `false`, never an error
//! - Prometheus metrics per driver
//!
//! ## Example
//!
//! ```ignore
//! use mcdriver::prelude::*;
//!
//! let config = Config::from_env();
//! let cache = CacheDriver::connect(&config).await?;
//!
//! cache.set("session:42", &session, 300).await;
//! if let Lookup::Found(session) = cache.get::<Session>("session:42").await {
//!     // ...
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────────┐     ┌──────────────────┐
//! │ application  │────▶│ CacheDriver          │────▶│ Store            │
//! │              │     │  ├─ namespacing      │     │  ├─ Memcached    │
//! │              │     │  ├─ JSON codec       │     │  │  (ASCII/TCP)  │
//! │              │     │  ├─ TTL → expiry     │     │  └─ Memory       │
//! │              │     │  └─ compare_set/del  │     │                  │
//! └──────────────┘     └──────────────────────┘     └──────────────────┘
//! ```

// Modules
pub mod codec;
pub mod compare;
pub mod config;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod prelude;
pub mod protocol;
pub mod storage;

// Re-exports for convenience
pub use driver::{CacheDriver, Lookup, Ttl};
pub use error::{CodecError, DriverError, ProtocolError, Result, StoreError};
