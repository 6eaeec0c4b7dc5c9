//! Hand-written memcached ASCII reply parser
//!
//! Replies are parsed from the front of a read buffer. A retrieval reply is
//! only complete once its END line has arrived, so a partially received
//! VALUE block yields `NeedMoreData` and nothing is consumed.

use crate::ProtocolError;
use crate::protocol::response::{Reply, ValueItem};
use bytes::Bytes;

/// Result of parsing
#[derive(Debug)]
pub enum ParseResult {
    /// Reply fully parsed, with the number of bytes consumed
    Complete(Reply, usize),
    /// Need more data to complete parsing
    NeedMoreData,
    /// Parse error
    Error(ProtocolError),
}

/// Parse one server reply from the start of `buf`
pub fn parse_reply(buf: &[u8]) -> ParseResult {
    let line_end = match find_crlf(buf) {
        Some(pos) => pos,
        None => return ParseResult::NeedMoreData,
    };

    let line = &buf[..line_end];
    let consumed = line_end + 2;

    if line.starts_with(b"VALUE ") || line == b"END" {
        return parse_values(buf);
    }

    let reply = match line {
        b"STORED" => Reply::Stored,
        b"NOT_STORED" => Reply::NotStored,
        b"EXISTS" => Reply::Exists,
        b"NOT_FOUND" => Reply::NotFound,
        b"DELETED" => Reply::Deleted,
        b"OK" => Reply::Ok,
        b"ERROR" => Reply::Error,
        _ => {
            if let Some(rest) = line.strip_prefix(b"VERSION ") {
                Reply::Version(String::from_utf8_lossy(rest).to_string())
            } else if let Some(rest) = line.strip_prefix(b"CLIENT_ERROR ") {
                Reply::ClientError(String::from_utf8_lossy(rest).to_string())
            } else if let Some(rest) = line.strip_prefix(b"SERVER_ERROR ") {
                Reply::ServerError(String::from_utf8_lossy(rest).to_string())
            } else {
                return ParseResult::Error(ProtocolError::UnknownReply(
                    String::from_utf8_lossy(line).to_string(),
                ));
            }
        }
    };

    ParseResult::Complete(reply, consumed)
}

/// Parse `VALUE <key> <flags> <bytes> [<cas>]\r\n<data>\r\n` blocks up to END
fn parse_values(buf: &[u8]) -> ParseResult {
    let mut items = Vec::new();
    let mut pos = 0;

    loop {
        let rest = &buf[pos..];
        let line_end = match find_crlf(rest) {
            Some(end) => end,
            None => return ParseResult::NeedMoreData,
        };
        let line = &rest[..line_end];

        if line == b"END" {
            return ParseResult::Complete(Reply::Values(items), pos + line_end + 2);
        }

        let header = match line.strip_prefix(b"VALUE ") {
            Some(header) => header,
            None => {
                return ParseResult::Error(ProtocolError::MalformedValue(
                    String::from_utf8_lossy(line).to_string(),
                ));
            }
        };

        let mut parts = header.split(|&b| b == b' ').filter(|p| !p.is_empty());

        let key = match parts.next() {
            Some(k) => k,
            None => {
                return ParseResult::Error(ProtocolError::MalformedValue(
                    "missing key".to_string(),
                ));
            }
        };

        let flags = match parts.next().and_then(parse_u32) {
            Some(f) => f,
            None => return ParseResult::Error(ProtocolError::InvalidFlags),
        };

        let bytes = match parts.next().and_then(parse_usize) {
            Some(b) => b,
            None => return ParseResult::Error(ProtocolError::InvalidBytesLength),
        };

        let cas = match parts.next() {
            Some(raw) => match parse_u64(raw) {
                Some(c) => Some(c),
                None => return ParseResult::Error(ProtocolError::InvalidCas),
            },
            None => None,
        };

        // Need: header line + data + \r\n
        let data_start = line_end + 2;
        let Some((data_end, block_end)) = data_start
            .checked_add(bytes)
            .and_then(|end| Some((end, end.checked_add(2)?)))
        else {
            return ParseResult::Error(ProtocolError::InvalidBytesLength);
        };
        if rest.len() < block_end {
            return ParseResult::NeedMoreData;
        }

        // Verify trailing \r\n
        if rest[data_end] != b'\r' || rest[data_end + 1] != b'\n' {
            return ParseResult::Error(ProtocolError::UnexpectedData);
        }

        items.push(ValueItem {
            key: key.to_vec(),
            flags,
            cas,
            data: Bytes::copy_from_slice(&rest[data_start..data_end]),
        });

        pos += block_end;
    }
}

/// Find \r\n in buffer using SIMD-accelerated search
#[inline]
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    let mut offset = 0;
    while let Some(i) = memchr::memchr(b'\r', &buf[offset..]) {
        let at = offset + i;
        if buf.get(at + 1) == Some(&b'\n') {
            return Some(at);
        }
        offset = at + 1;
    }
    None
}

/// Parse bytes as u32
fn parse_u32(bytes: &[u8]) -> Option<u32> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Parse bytes as u64
fn parse_u64(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Parse bytes as usize
fn parse_usize(bytes: &[u8]) -> Option<usize> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
