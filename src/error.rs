//! Error types for mcdriver
//!
//! Only construction and configuration surface as `DriverError` to callers.
//! Per-operation failures stay inside the store layer as `StoreError` and are
//! folded into `false` / `Lookup::NotFound` by the driver.

use thiserror::Error;

/// Main error type for mcdriver
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Cannot connect to memcached at {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Wire protocol errors (memcached ASCII replies)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key too long (max 250 bytes)")]
    KeyTooLong,

    #[error("Unknown reply: {0}")]
    UnknownReply(String),

    #[error("Malformed VALUE line: {0}")]
    MalformedValue(String),

    #[error("Invalid flags")]
    InvalidFlags,

    #[error("Invalid bytes length")]
    InvalidBytesLength,

    #[error("Invalid cas token")]
    InvalidCas,

    #[error("Unexpected data")]
    UnexpectedData,

    #[error("Unexpected reply {got} to {command}")]
    UnexpectedReply { command: &'static str, got: String },
}

/// Errors raised by a store handle for a single operation
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Connection closed by server")]
    Closed,

    #[error("Operation not supported by this store: {0}")]
    Unsupported(&'static str),
}

/// Value encoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Value encoding error: {0}")]
    Encode(String),

    #[error("Value decoding error: {0}")]
    Decode(String),

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Raw scalar item (flags {0:#x}) is not a serialized payload")]
    Scalar(u32),
}

pub type Result<T> = std::result::Result<T, DriverError>;
