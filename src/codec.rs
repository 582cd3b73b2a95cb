//! Value codec: the tag-prefixed native encoding for a fixed set of
//! primitive shapes (§4.A), the opaque `bincode` fallback for everything
//! else, and the gzip compression policy shared by both.

use crate::error::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::convert::TryInto;

/// Flags bit: payload was gzip-compressed before being written.
pub const FLAG_COMPRESSED: u16 = 0x02;
/// Flags bit: payload was produced by the opaque (bincode) serializer,
/// rather than the native tag encoding.
pub const FLAG_OPAQUE: u16 = 0x08;

const TAG_BYTE: u8 = 1;
const TAG_BOOL: u8 = 2;
const TAG_I32: u8 = 3;
const TAG_I64: u8 = 4;
const TAG_CHAR: u8 = 5;
const TAG_STRING: u8 = 6;
const TAG_STRING_BUILDER: u8 = 7;
const TAG_F32: u8 = 8;
const TAG_I16: u8 = 9;
const TAG_F64: u8 = 10;
const TAG_DATE: u8 = 11;

/// The fixed set of primitive shapes the native tag encoding understands.
/// `StringBuilder` is kept distinct from `Str` only so the marker byte
/// round-trips — both carry a UTF-8 string.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Bool(bool),
    I32(i32),
    I64(i64),
    /// A single UTF-16 code unit, per the original protocol's `char`.
    Char(u16),
    Str(String),
    StringBuilder(String),
    F32(f32),
    I16(i16),
    F64(f64),
    /// Ticks (100ns units) since the epoch.
    Date(i64),
}

/// Encode a [`Value`] as `[marker_byte | payload]`. Fixed-width integers
/// use big-endian; `f32`/`f64` use little-endian, matching the
/// `BitConverter` convention the original protocol documents for those
/// two tags. The asymmetry is kept rather than "fixed" so bytes already
/// on the wire from other clients keep decoding correctly.
pub fn encode_native(value: &Value) -> Vec<u8> {
    match value {
        Value::Byte(b) => vec![TAG_BYTE, *b],
        Value::Bool(b) => vec![TAG_BOOL, if *b { 1 } else { 0 }],
        Value::I32(n) => {
            let mut out = vec![TAG_I32];
            out.extend_from_slice(&n.to_be_bytes());
            out
        }
        Value::I64(n) => {
            let mut out = vec![TAG_I64];
            out.extend_from_slice(&n.to_be_bytes());
            out
        }
        Value::Char(c) => {
            let mut out = vec![TAG_CHAR];
            out.extend_from_slice(&(*c as i32).to_be_bytes());
            out
        }
        Value::Str(s) => {
            let mut out = vec![TAG_STRING];
            out.extend_from_slice(s.as_bytes());
            out
        }
        Value::StringBuilder(s) => {
            let mut out = vec![TAG_STRING_BUILDER];
            out.extend_from_slice(s.as_bytes());
            out
        }
        Value::F32(f) => {
            let mut out = vec![TAG_F32];
            out.extend_from_slice(&f.to_le_bytes());
            out
        }
        Value::I16(n) => {
            let mut out = vec![TAG_I16];
            out.extend_from_slice(&(*n as i32).to_be_bytes());
            out
        }
        Value::F64(f) => {
            let mut out = vec![TAG_F64];
            out.extend_from_slice(&f.to_le_bytes());
            out
        }
        Value::Date(ticks) => {
            let mut out = vec![TAG_DATE];
            out.extend_from_slice(&ticks.to_be_bytes());
            out
        }
    }
}

/// Decode a `[marker_byte | payload]` buffer produced by [`encode_native`].
pub fn decode_native(bytes: &[u8]) -> Result<Value> {
    let (&marker, payload) = bytes
        .split_first()
        .ok_or_else(|| Error::Codec("empty native payload".into()))?;

    let need = |n: usize| -> Result<&[u8]> {
        if payload.len() < n {
            return Err(Error::Codec(format!(
                "native tag {} needs {} bytes, got {}",
                marker,
                n,
                payload.len()
            )));
        }
        Ok(&payload[..n])
    };

    Ok(match marker {
        TAG_BYTE => Value::Byte(*need(1)?.first().unwrap()),
        TAG_BOOL => Value::Bool(*need(1)?.first().unwrap() != 0),
        TAG_I32 => Value::I32(i32::from_be_bytes(need(4)?.try_into().unwrap())),
        TAG_I64 => Value::I64(i64::from_be_bytes(need(8)?.try_into().unwrap())),
        TAG_CHAR => {
            let v = i32::from_be_bytes(need(4)?.try_into().unwrap());
            Value::Char(v as u16)
        }
        TAG_STRING => Value::Str(
            String::from_utf8(payload.to_vec())
                .map_err(|e| Error::Codec(format!("invalid utf-8 string: {}", e)))?,
        ),
        TAG_STRING_BUILDER => Value::StringBuilder(
            String::from_utf8(payload.to_vec())
                .map_err(|e| Error::Codec(format!("invalid utf-8 string: {}", e)))?,
        ),
        TAG_F32 => Value::F32(f32::from_le_bytes(need(4)?.try_into().unwrap())),
        TAG_I16 => {
            let v = i32::from_be_bytes(need(4)?.try_into().unwrap());
            Value::I16(v as i16)
        }
        TAG_F64 => Value::F64(f64::from_le_bytes(need(8)?.try_into().unwrap())),
        TAG_DATE => Value::Date(i64::from_be_bytes(need(8)?.try_into().unwrap())),
        other => return Err(Error::Codec(format!("unknown native tag {}", other))),
    })
}

/// Serialize an arbitrary Rust value through the opaque binary formatter
/// (`bincode`), used for anything outside the native tag set.
pub fn encode_opaque<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub fn decode_opaque<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(feature = "compression")]
fn gzip(raw: &[u8]) -> Result<Vec<u8>> {
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(raw)
        .map_err(|e| Error::Codec(format!("gzip compress: {}", e)))?;
    enc.finish()
        .map_err(|e| Error::Codec(format!("gzip compress: {}", e)))
}

#[cfg(feature = "compression")]
fn gunzip(raw: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let mut out = Vec::new();
    GzDecoder::new(raw)
        .read_to_end(&mut out)
        .map_err(|e| Error::Codec(format!("gzip decompress: {}", e)))?;
    Ok(out)
}

#[cfg(not(feature = "compression"))]
fn gzip(_raw: &[u8]) -> Result<Vec<u8>> {
    Err(Error::Codec(
        "compression feature is disabled but a write required it".into(),
    ))
}

#[cfg(not(feature = "compression"))]
fn gunzip(_raw: &[u8]) -> Result<Vec<u8>> {
    Err(Error::Codec(
        "compression feature is disabled but a compressed value was read".into(),
    ))
}

/// Compress `raw` and set the compressed flag iff `compress_enable` and
/// `raw.len() >= threshold`. Returns the (possibly unchanged) payload and
/// the flag bits to OR into the stored flags word.
pub fn maybe_compress(raw: Vec<u8>, compress_enable: bool, threshold: usize) -> Result<(Vec<u8>, u16)> {
    if compress_enable && raw.len() >= threshold {
        Ok((gzip(&raw)?, FLAG_COMPRESSED))
    } else {
        Ok((raw, 0))
    }
}

/// A payload read off the wire, decompressed if necessary but not yet
/// interpreted as native/opaque/string.
pub struct DecodedPayload {
    pub bytes: Vec<u8>,
    pub flags: u16,
}

impl DecodedPayload {
    pub fn is_opaque(&self) -> bool {
        self.flags & FLAG_OPAQUE != 0
    }

    pub fn as_native(&self) -> Result<Value> {
        decode_native(&self.bytes)
    }

    pub fn as_string(&self) -> Result<String> {
        String::from_utf8(self.bytes.clone())
            .map_err(|e| Error::Codec(format!("invalid utf-8 string: {}", e)))
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        decode_opaque(&self.bytes)
    }
}

/// Decompress `raw` if the compressed flag is set — unconditionally, even
/// if the local config has compression disabled for writes (§4.A:
/// "compressEnable=false suppresses compression on writes but never on
/// reads").
pub fn decode_payload(raw: &[u8], flags: u16) -> Result<DecodedPayload> {
    let bytes = if flags & FLAG_COMPRESSED != 0 {
        gunzip(raw)?
    } else {
        raw.to_vec()
    };
    Ok(DecodedPayload { bytes, flags })
}
