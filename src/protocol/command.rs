//! Memcached ASCII protocol request types

use crate::ProtocolError;
use bytes::BytesMut;
use itoa::Buffer;

/// Maximum key length (memcached protocol limit)
pub const MAX_KEY_LENGTH: usize = 250;

/// Request sent to a memcached server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// get <key>
    Get { key: &'a [u8] },

    /// gets <key>
    Gets { key: &'a [u8] },

    /// set <key> <flags> <exptime> <bytes>
    Set {
        key: &'a [u8],
        flags: u32,
        exptime: i64,
        data: &'a [u8],
    },

    /// add <key> <flags> <exptime> <bytes>
    Add {
        key: &'a [u8],
        flags: u32,
        exptime: i64,
        data: &'a [u8],
    },

    /// cas <key> <flags> <exptime> <bytes> <cas unique>
    Cas {
        key: &'a [u8],
        flags: u32,
        exptime: i64,
        data: &'a [u8],
        cas: u64,
    },

    /// delete <key>
    Delete { key: &'a [u8] },

    /// flush_all
    FlushAll,

    /// version
    Version,
}

impl Command<'_> {
    /// Command name as sent on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "get",
            Command::Gets { .. } => "gets",
            Command::Set { .. } => "set",
            Command::Add { .. } => "add",
            Command::Cas { .. } => "cas",
            Command::Delete { .. } => "delete",
            Command::FlushAll => "flush_all",
            Command::Version => "version",
        }
    }

    /// Key addressed by this command, if any
    pub fn key(&self) -> Option<&[u8]> {
        match self {
            Command::Get { key }
            | Command::Gets { key }
            | Command::Set { key, .. }
            | Command::Add { key, .. }
            | Command::Cas { key, .. }
            | Command::Delete { key } => Some(key),
            Command::FlushAll | Command::Version => None,
        }
    }

    /// Append the wire form of this command to `buf`
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        if let Some(key) = self.key() {
            validate_key(key)?;
        }

        let mut itoa_buf = Buffer::new();
        buf.extend_from_slice(self.name().as_bytes());

        match *self {
            Command::Get { key } | Command::Gets { key } | Command::Delete { key } => {
                buf.extend_from_slice(b" ");
                buf.extend_from_slice(key);
                buf.extend_from_slice(b"\r\n");
            }
            Command::Set {
                key,
                flags,
                exptime,
                data,
            }
            | Command::Add {
                key,
                flags,
                exptime,
                data,
            } => {
                storage_line(buf, &mut itoa_buf, key, flags, exptime, data.len());
                buf.extend_from_slice(b"\r\n");
                data_block(buf, data);
            }
            Command::Cas {
                key,
                flags,
                exptime,
                data,
                cas,
            } => {
                storage_line(buf, &mut itoa_buf, key, flags, exptime, data.len());
                buf.extend_from_slice(b" ");
                buf.extend_from_slice(itoa_buf.format(cas).as_bytes());
                buf.extend_from_slice(b"\r\n");
                data_block(buf, data);
            }
            Command::FlushAll | Command::Version => {
                buf.extend_from_slice(b"\r\n");
            }
        }

        Ok(())
    }
}

/// Write ` <key> <flags> <exptime> <bytes>` (no line terminator)
fn storage_line(
    buf: &mut BytesMut,
    itoa_buf: &mut Buffer,
    key: &[u8],
    flags: u32,
    exptime: i64,
    len: usize,
) {
    buf.extend_from_slice(b" ");
    buf.extend_from_slice(key);
    buf.extend_from_slice(b" ");
    buf.extend_from_slice(itoa_buf.format(flags).as_bytes());
    buf.extend_from_slice(b" ");
    buf.extend_from_slice(itoa_buf.format(exptime).as_bytes());
    buf.extend_from_slice(b" ");
    buf.extend_from_slice(itoa_buf.format(len).as_bytes());
}

fn data_block(buf: &mut BytesMut, data: &[u8]) {
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

/// Check if a key is valid
pub fn is_valid_key(key: &[u8]) -> bool {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return false;
    }
    // Keys cannot contain control characters or whitespace
    key.iter().all(|&b| b > 32 && b < 127)
}

/// Like [`is_valid_key`], reporting why the key was rejected
pub fn validate_key(key: &[u8]) -> Result<(), ProtocolError> {
    if is_valid_key(key) {
        Ok(())
    } else if key.len() > MAX_KEY_LENGTH {
        Err(ProtocolError::KeyTooLong)
    } else {
        Err(ProtocolError::InvalidKey(
            String::from_utf8_lossy(key).to_string(),
        ))
    }
}
