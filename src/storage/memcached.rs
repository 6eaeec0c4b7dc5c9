//! Memcached TCP client
//!
//! One connection per handle, guarded by an async mutex so requests never
//! interleave on the wire. Every round-trip is bounded by the configured
//! operation timeout. A connection only goes back into the slot after a
//! complete reply; one that failed, timed out or was abandoned mid-request
//! is dropped and re-opened on the next call.

use crate::config::StoreConfig;
use crate::protocol::{Command, ParseResult, Reply, parse_reply};
use crate::storage::value::{Expiry, RawItem};
use crate::storage::{CasOutcome, Store};
use crate::{DriverError, ProtocolError, StoreError};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Memcached server handle
#[derive(Debug)]
pub struct MemcachedStore {
    config: StoreConfig,
    conn: Mutex<Option<Connection>>,
}

#[derive(Debug)]
struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl Connection {
    async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let stream = match timeout(config.connect_timeout(), TcpStream::connect(&config.addr)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(StoreError::Timeout(config.connect_timeout_ms)),
        };

        // Disable Nagle's algorithm for lower latency
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        debug!(addr = %config.addr, "Connected to memcached");

        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(config.read_buffer_size),
            write_buf: BytesMut::with_capacity(config.write_buffer_size),
        })
    }

    /// Send one command and read its complete reply
    async fn round_trip(&mut self, cmd: &Command<'_>) -> Result<Reply, StoreError> {
        self.write_buf.clear();
        cmd.encode(&mut self.write_buf)?;
        self.stream.write_all(&self.write_buf).await?;

        loop {
            match parse_reply(&self.read_buf) {
                ParseResult::Complete(reply, consumed) => {
                    self.read_buf.advance(consumed);
                    return Ok(reply);
                }
                ParseResult::NeedMoreData => {
                    if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                        return Err(StoreError::Closed);
                    }
                }
                ParseResult::Error(e) => return Err(e.into()),
            }
        }
    }
}

impl MemcachedStore {
    /// Connect and probe the server with `version`.
    ///
    /// Fails with [`DriverError::Connect`] when the server is unreachable or
    /// does not speak the memcached protocol.
    pub async fn connect(config: StoreConfig) -> crate::Result<Self> {
        let store = Self {
            conn: Mutex::new(None),
            config,
        };

        match store.version().await {
            Ok(version) => {
                info!(addr = %store.config.addr, version = %version, "Memcached store ready");
                Ok(store)
            }
            Err(e) => Err(DriverError::Connect {
                addr: store.config.addr.clone(),
                reason: e.to_string(),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Server version string
    pub async fn version(&self) -> Result<String, StoreError> {
        match self.request(&Command::Version).await? {
            Reply::Version(version) => Ok(version),
            other => Err(unexpected("version", &other)),
        }
    }

    async fn request(&self, cmd: &Command<'_>) -> Result<Reply, StoreError> {
        let mut guard = self.conn.lock().await;

        // Out of the slot while in flight: if the caller drops this future
        // mid round-trip the half-read connection goes with it.
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => Connection::open(&self.config).await?,
        };

        let reply = match timeout(self.config.operation_timeout(), conn.round_trip(cmd)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                debug!(command = cmd.name(), error = %e, "Dropping memcached connection");
                return Err(e);
            }
            Err(_) => {
                debug!(command = cmd.name(), "Memcached request timed out");
                return Err(StoreError::Timeout(self.config.operation_timeout_ms));
            }
        };
        *guard = Some(conn);

        // Error replies leave the connection in a clean state
        match reply {
            Reply::Error => Err(StoreError::Client(format!(
                "server rejected {} command",
                cmd.name()
            ))),
            Reply::ClientError(msg) => Err(StoreError::Client(msg)),
            Reply::ServerError(msg) => Err(StoreError::Server(msg)),
            reply => Ok(reply),
        }
    }

    /// Storage command reply: STORED / NOT_STORED
    async fn store(&self, cmd: Command<'_>) -> Result<bool, StoreError> {
        let name = cmd.name();
        match self.request(&cmd).await? {
            Reply::Stored => Ok(true),
            Reply::NotStored => Ok(false),
            other => Err(unexpected(name, &other)),
        }
    }

    /// Retrieval reply for a single key
    async fn retrieve(&self, cmd: Command<'_>) -> Result<Option<(RawItem, Option<u64>)>, StoreError> {
        let name = cmd.name();
        let key = cmd.key().unwrap_or_default();
        match self.request(&cmd).await? {
            Reply::Values(items) => Ok(items
                .into_iter()
                .find(|item| item.key == key)
                .map(|item| (RawItem::new(item.flags, item.data), item.cas))),
            other => Err(unexpected(name, &other)),
        }
    }
}

fn unexpected(command: &'static str, reply: &Reply) -> StoreError {
    StoreError::Protocol(ProtocolError::UnexpectedReply {
        command,
        got: reply.label(),
    })
}

#[async_trait]
impl Store for MemcachedStore {
    async fn get(&self, key: &[u8]) -> Result<Option<RawItem>, StoreError> {
        Ok(self
            .retrieve(Command::Get { key })
            .await?
            .map(|(item, _)| item))
    }

    async fn set(&self, key: &[u8], item: RawItem, expiry: Expiry) -> Result<bool, StoreError> {
        self.store(Command::Set {
            key,
            flags: item.flags,
            exptime: expiry.exptime(),
            data: &item.data,
        })
        .await
    }

    async fn add(&self, key: &[u8], item: RawItem, expiry: Expiry) -> Result<bool, StoreError> {
        self.store(Command::Add {
            key,
            flags: item.flags,
            exptime: expiry.exptime(),
            data: &item.data,
        })
        .await
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        match self.request(&Command::Delete { key }).await? {
            Reply::Deleted => Ok(true),
            Reply::NotFound => Ok(false),
            other => Err(unexpected("delete", &other)),
        }
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        match self.request(&Command::FlushAll).await? {
            Reply::Ok => Ok(()),
            other => Err(unexpected("flush_all", &other)),
        }
    }

    fn supports_cas(&self) -> bool {
        true
    }

    async fn gets(&self, key: &[u8]) -> Result<Option<(RawItem, u64)>, StoreError> {
        match self.retrieve(Command::Gets { key }).await? {
            Some((item, Some(token))) => Ok(Some((item, token))),
            Some((_, None)) => Err(StoreError::Protocol(ProtocolError::InvalidCas)),
            None => Ok(None),
        }
    }

    async fn cas(
        &self,
        key: &[u8],
        item: RawItem,
        expiry: Expiry,
        token: u64,
    ) -> Result<CasOutcome, StoreError> {
        let cmd = Command::Cas {
            key,
            flags: item.flags,
            exptime: expiry.exptime(),
            data: &item.data,
            cas: token,
        };
        match self.request(&cmd).await? {
            Reply::Stored => Ok(CasOutcome::Stored),
            Reply::Exists => Ok(CasOutcome::Exists),
            Reply::NotFound => Ok(CasOutcome::NotFound),
            other => Err(unexpected("cas", &other)),
        }
    }
}
