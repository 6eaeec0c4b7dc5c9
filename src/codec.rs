//! Value encoding
//!
//! Values are stored as JSON tagged with the serialized type flag, and
//! zlib-compressed once the JSON reaches the configured threshold. Only
//! items carrying the serialized flag decode; anything else on the server
//! (plain bytes, native scalars from other clients) is refused.
//!
//! JSON keeps "no entry" and "entry holding `false`" apart: a miss never
//! produces a payload, while `false` is the five bytes `false`.

use crate::CodecError;
use crate::storage::{FLAG_COMPRESSED, RawItem, TYPE_SERIALIZED, ValueKind};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};

/// Canonical encoding of boolean `false`
pub const FALSE_PAYLOAD: &[u8] = b"false";

/// Largest payload a compressed item may inflate to (16 MiB)
pub const DEFAULT_MAX_DECODED_SIZE: usize = 16 * 1024 * 1024;

/// Encoder/decoder for cached values
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    compress_threshold: usize,
    max_decoded_size: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Codec {
    /// `compress_threshold` of 0 disables compression
    pub fn new(compress_threshold: usize) -> Self {
        Self {
            compress_threshold,
            max_decoded_size: DEFAULT_MAX_DECODED_SIZE,
        }
    }

    /// Refuse compressed items that inflate past `limit` bytes
    #[must_use]
    pub fn with_max_decoded_size(mut self, limit: usize) -> Self {
        self.max_decoded_size = limit;
        self
    }

    /// Serialize `value` into a flagged item
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<RawItem, CodecError> {
        let json = serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))?;

        if self.compress_threshold > 0 && json.len() >= self.compress_threshold {
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(json.len() / 2), Compression::fast());
            encoder.write_all(&json)?;
            let compressed = encoder.finish()?;
            return Ok(RawItem::new(TYPE_SERIALIZED | FLAG_COMPRESSED, compressed));
        }

        Ok(RawItem::new(TYPE_SERIALIZED, json))
    }

    /// Deserialize a flagged item
    pub fn decode<T: DeserializeOwned>(&self, item: &RawItem) -> Result<T, CodecError> {
        match item.kind() {
            ValueKind::Serialized => {}
            kind if kind.is_scalar() => return Err(CodecError::Scalar(item.flags)),
            _ => {
                return Err(CodecError::Decode(format!(
                    "item flags {:#x} do not mark a serialized value",
                    item.flags
                )));
            }
        }

        if item.is_compressed() {
            let limit = self.max_decoded_size;
            let mut json = Vec::with_capacity(item.data.len().saturating_mul(2).min(limit));
            // One byte past the limit tells "exactly at" from "over"
            let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
            ZlibDecoder::new(item.data.as_ref())
                .take(cap)
                .read_to_end(&mut json)?;
            if json.len() > limit {
                return Err(CodecError::Decode(format!(
                    "compressed payload inflates past {limit} bytes"
                )));
            }
            decode_json(&json)
        } else {
            decode_json(&item.data)
        }
    }
}

fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    if payload == FALSE_PAYLOAD {
        // Stored `false` is a hit; route it through the value form so the
        // target type alone decides whether it accepts a boolean.
        return serde_json::from_value(serde_json::Value::Bool(false))
            .map_err(|e| CodecError::Decode(e.to_string()));
    }
    serde_json::from_slice(payload).map_err(|e| CodecError::Decode(e.to_string()))
}
