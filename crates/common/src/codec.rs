//! Deterministic wire codecs
//!
//! Everything exchanged with a remote party travels as base64 text:
//! raw public keys, signatures, envelope fields and fixed-width integers.
//! Integers are always encoded big-endian at a fixed width so both sides
//! agree on the exact byte layout.
//!
//! All functions here are pure and stateless.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Width of an encoded `u64` in bytes
pub const U64_SIZE: usize = 8;
/// Width of an encoded `u32` in bytes
pub const U32_SIZE: usize = 4;
/// Largest integer that survives a round trip through an IEEE-754 double
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Errors that can occur while encoding or decoding wire values
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    /// A value fell outside the numeric domain of the encoding
    #[error("range error: {0}")]
    Range(String),
    #[error("base64 decode error: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("invalid length, expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
    /// A buffered copy would write outside the destination
    #[error("out of bounds: offset {offset}, length {len}, capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
}

/// Encode bytes as standard, padded base64
pub fn encode_base64(bytes: impl AsRef<[u8]>) -> String {
    BASE64.encode(bytes)
}

/// Decode standard, padded base64 into bytes
pub fn decode_base64(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(BASE64.decode(text)?)
}

fn decode_fixed<const N: usize>(text: &str) -> Result<[u8; N], CodecError> {
    if text.is_empty() {
        return Err(CodecError::InvalidLength {
            expected: N,
            got: 0,
        });
    }
    let bytes = decode_base64(text)?;
    fixed_bytes(&bytes)
}

fn fixed_bytes<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CodecError> {
    bytes.try_into().map_err(|_| CodecError::InvalidLength {
        expected: N,
        got: bytes.len(),
    })
}

/// Encode an unsigned 64-bit value as 8 big-endian bytes.
///
/// The input is taken as an `i128` so callers holding arbitrary
/// integers get a range error instead of a silent wrap.
pub fn u64_to_bytes(value: i128) -> Result<[u8; U64_SIZE], CodecError> {
    let value = u64::try_from(value)
        .map_err(|_| CodecError::Range(format!("{value} is outside [0, 2^64-1]")))?;
    Ok(value.to_be_bytes())
}

/// Decode exactly 8 big-endian bytes into a `u64`
pub fn u64_from_bytes(bytes: &[u8]) -> Result<u64, CodecError> {
    Ok(u64::from_be_bytes(fixed_bytes(bytes)?))
}

/// Encode an unsigned 64-bit value as base64 of its 8 big-endian bytes
///
/// ```
/// # use common::codec::{u64_to_base64, CodecError};
/// # fn main() -> Result<(), CodecError> {
/// assert_eq!(u64_to_base64(1)?, "AAAAAAAAAAE=");
/// # Ok(())
/// # }
/// ```
pub fn u64_to_base64(value: i128) -> Result<String, CodecError> {
    Ok(encode_base64(u64_to_bytes(value)?))
}

/// Decode base64 text holding exactly 8 big-endian bytes
pub fn u64_from_base64(text: &str) -> Result<u64, CodecError> {
    Ok(u64::from_be_bytes(decode_fixed(text)?))
}

/// Encode a safe integer (`[0, 2^53-1]`) using the `u64` wire layout.
///
/// Rejects negative, fractional, non-finite and over-range values.
pub fn safe_integer_to_base64(value: f64) -> Result<String, CodecError> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(CodecError::Range(format!("{value} is not an integer")));
    }
    if value < 0.0 || value > MAX_SAFE_INTEGER as f64 {
        return Err(CodecError::Range(format!(
            "{value} is outside [0, {MAX_SAFE_INTEGER}]"
        )));
    }
    u64_to_base64(value as i128)
}

/// Decode a safe integer, failing if the value exceeds `MAX_SAFE_INTEGER`
pub fn safe_integer_from_base64(text: &str) -> Result<u64, CodecError> {
    let value = u64_from_base64(text)?;
    if value > MAX_SAFE_INTEGER {
        return Err(CodecError::Range(format!(
            "{value} exceeds {MAX_SAFE_INTEGER}"
        )));
    }
    Ok(value)
}

/// Encode an unsigned 32-bit value as 4 big-endian bytes
pub fn u32_to_bytes(value: i64) -> Result<[u8; U32_SIZE], CodecError> {
    let value = u32::try_from(value)
        .map_err(|_| CodecError::Range(format!("{value} is outside [0, 2^32-1]")))?;
    Ok(value.to_be_bytes())
}

/// Decode exactly 4 big-endian bytes into a `u32`
pub fn u32_from_bytes(bytes: &[u8]) -> Result<u32, CodecError> {
    Ok(u32::from_be_bytes(fixed_bytes(bytes)?))
}

pub fn u32_to_base64(value: i64) -> Result<String, CodecError> {
    Ok(encode_base64(u32_to_bytes(value)?))
}

pub fn u32_from_base64(text: &str) -> Result<u32, CodecError> {
    Ok(u32::from_be_bytes(decode_fixed(text)?))
}

fn check_capacity(dst: &[u8], offset: usize, len: usize) -> Result<(), CodecError> {
    let fits = offset <= dst.len() && dst.len() - offset >= len;
    if !fits {
        return Err(CodecError::OutOfBounds {
            offset,
            len,
            capacity: dst.len(),
        });
    }
    Ok(())
}

/// Copy a string into `dst` starting at `offset`, one byte per UTF-16
/// code unit (the low byte of each unit is kept).
///
/// Returns the offset just past the last written byte.
pub fn copy_str_into(dst: &mut [u8], offset: usize, text: &str) -> Result<usize, CodecError> {
    let len = text.encode_utf16().count();
    check_capacity(dst, offset, len)?;
    for (slot, unit) in dst[offset..offset + len].iter_mut().zip(text.encode_utf16()) {
        *slot = unit as u8;
    }
    Ok(offset + len)
}

/// Copy bytes into `dst` starting at `offset`, returning the new offset
pub fn copy_bytes_into(dst: &mut [u8], offset: usize, src: &[u8]) -> Result<usize, CodecError> {
    check_capacity(dst, offset, src.len())?;
    dst[offset..offset + src.len()].copy_from_slice(src);
    Ok(offset + src.len())
}
