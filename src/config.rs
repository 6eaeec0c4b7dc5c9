//! Configuration for mcdriver

use crate::codec::DEFAULT_MAX_DECODED_SIZE;
use serde::Deserialize;
use std::time::Duration;

/// Default TTL applied when the caller does not pass one (five minutes)
pub const DEFAULT_TTL_SECS: i64 = 300;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub driver: DriverConfig,
    pub store: StoreConfig,
}

/// What `clear()` removes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearScope {
    /// `flush_all`: every entry on the server, across all namespaces
    #[default]
    Global,
    /// Only this instance's keys, by bumping the namespace generation
    Namespace,
}

/// Cache driver configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Namespace prefix for every key (usually the hostname)
    pub instance_id: String,

    /// TTL used by `set_default`/`add_default` (seconds, <= 0 = never expire)
    pub default_ttl_secs: i64,

    /// Scope of `clear()`
    pub clear_scope: ClearScope,

    /// Compress encoded payloads at least this large (bytes, 0 = never)
    pub compress_threshold: usize,

    /// Compressed entries inflating past this many bytes read as a miss
    pub max_decoded_size: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            instance_id: instance_id_from_host(),
            default_ttl_secs: DEFAULT_TTL_SECS,
            clear_scope: ClearScope::Global,
            compress_threshold: 0,
            max_decoded_size: DEFAULT_MAX_DECODED_SIZE,
        }
    }
}

/// Memcached connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Server address (host:port)
    pub addr: String,

    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Per-operation timeout in milliseconds
    pub operation_timeout_ms: u64,

    /// Read buffer size per connection (bytes)
    pub read_buffer_size: usize,

    /// Write buffer size per connection (bytes)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:11211".to_string(),
            connect_timeout_ms: 1000,
            operation_timeout_ms: 500,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Instance id derived from the host name, falling back to `localhost`
pub fn instance_id_from_host() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            crate::DriverError::Config(format!("Failed to read config file: {e}"))
        })?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| crate::DriverError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables or use defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("MCDRIVER_INSTANCE_ID")
            && !id.is_empty()
        {
            config.driver.instance_id = id;
        }

        if let Ok(ttl) = std::env::var("MCDRIVER_DEFAULT_TTL")
            && let Ok(n) = ttl.parse()
        {
            config.driver.default_ttl_secs = n;
        }

        if let Ok(scope) = std::env::var("MCDRIVER_CLEAR_SCOPE") {
            config.driver.clear_scope = match scope.to_lowercase().as_str() {
                "namespace" => ClearScope::Namespace,
                _ => ClearScope::Global,
            };
        }

        if let Ok(threshold) = std::env::var("MCDRIVER_COMPRESS_THRESHOLD")
            && let Ok(n) = threshold.parse()
        {
            config.driver.compress_threshold = n;
        }

        if let Ok(addr) = std::env::var("MCDRIVER_ADDR") {
            config.store.addr = addr;
        }

        if let Ok(timeout) = std::env::var("MCDRIVER_TIMEOUT_MS")
            && let Ok(n) = timeout.parse()
        {
            config.store.operation_timeout_ms = n;
        }

        config
    }

    /// Reject configurations the driver cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.driver.instance_id.is_empty() {
            return Err(crate::DriverError::Config(
                "driver.instance_id must not be empty".to_string(),
            ));
        }
        if self.driver.instance_id.bytes().any(|b| b <= 32 || b >= 127) {
            return Err(crate::DriverError::Config(format!(
                "driver.instance_id contains whitespace or control characters: {:?}",
                self.driver.instance_id
            )));
        }
        if self.store.operation_timeout_ms == 0 {
            return Err(crate::DriverError::Config(
                "store.operation_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
