//! Memcached ASCII protocol reply types

use bytes::Bytes;

/// One `VALUE` block from a retrieval reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueItem {
    pub key: Vec<u8>,
    pub flags: u32,
    /// Present only in `gets` replies
    pub cas: Option<u64>,
    pub data: Bytes,
}

/// Parsed server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Zero or more VALUE blocks terminated by END
    Values(Vec<ValueItem>),
    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
    Ok,
    Version(String),
    /// Bare ERROR (unknown command)
    Error,
    ClientError(String),
    ServerError(String),
}

impl Reply {
    /// Short label for logs and error messages
    pub fn label(&self) -> String {
        match self {
            Reply::Values(items) => format!("VALUES({})", items.len()),
            Reply::Stored => "STORED".to_string(),
            Reply::NotStored => "NOT_STORED".to_string(),
            Reply::Exists => "EXISTS".to_string(),
            Reply::NotFound => "NOT_FOUND".to_string(),
            Reply::Deleted => "DELETED".to_string(),
            Reply::Ok => "OK".to_string(),
            Reply::Version(v) => format!("VERSION {v}"),
            Reply::Error => "ERROR".to_string(),
            Reply::ClientError(msg) => format!("CLIENT_ERROR {msg}"),
            Reply::ServerError(msg) => format!("SERVER_ERROR {msg}"),
        }
    }
}
