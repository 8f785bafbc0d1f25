//! SSH primitive data types (RFC 4251 Section 5).
//!
//! Every message in the protocol is built from a handful of primitives:
//!
//! ```text
//! byte        arbitrary 8-bit value
//! boolean     0 = FALSE, anything else = TRUE (encoded as 1)
//! uint32      big-endian, 4 bytes
//! uint64      big-endian, 8 bytes
//! string      uint32 length + raw bytes, no terminator
//! mpint       string holding a two's-complement, MSB-first, minimal integer
//! name-list   string holding comma-separated ASCII names
//! ```
//!
//! Readers take the full buffer and a cursor (`offset`) that is advanced past
//! the consumed bytes. Any read past the end of the buffer is a
//! [`CsshError::Decode`] error; nothing in this module panics on peer input.
//!
//! # Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use cssh_proto::ssh::wire;
//! use num_bigint::BigInt;
//!
//! let mut buf = BytesMut::new();
//! wire::write_string(&mut buf, "ssh-userauth");
//! wire::write_mpint(&mut buf, &BigInt::from(0x80));
//!
//! let mut offset = 0;
//! assert_eq!(wire::read_string(&buf, &mut offset).unwrap(), "ssh-userauth");
//! assert_eq!(wire::read_mpint(&buf, &mut offset).unwrap(), BigInt::from(0x80));
//! assert_eq!(offset, buf.len());
//! ```

use bytes::{BufMut, BytesMut};
use cssh_platform::{CsshError, CsshResult};
use num_bigint::{BigInt, BigUint, Sign};

fn take<'a>(data: &'a [u8], offset: &mut usize, len: usize, what: &str) -> CsshResult<&'a [u8]> {
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| {
            CsshError::Decode(format!(
                "Cannot read {} ({} bytes) at offset {}: buffer has {} bytes",
                what,
                len,
                offset,
                data.len()
            ))
        })?;
    let slice = &data[*offset..end];
    *offset = end;
    Ok(slice)
}

/// Reads a single byte.
pub fn read_u8(data: &[u8], offset: &mut usize) -> CsshResult<u8> {
    Ok(take(data, offset, 1, "byte")?[0])
}

/// Reads a boolean. Any non-zero byte is TRUE.
pub fn read_bool(data: &[u8], offset: &mut usize) -> CsshResult<bool> {
    Ok(read_u8(data, offset)? != 0)
}

/// Reads a big-endian uint32.
pub fn read_u32(data: &[u8], offset: &mut usize) -> CsshResult<u32> {
    let b = take(data, offset, 4, "uint32")?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Reads a big-endian uint64.
pub fn read_u64(data: &[u8], offset: &mut usize) -> CsshResult<u64> {
    let b = take(data, offset, 8, "uint64")?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(b);
    Ok(u64::from_be_bytes(raw))
}

/// Reads `len` raw bytes with no length prefix.
pub fn read_raw(data: &[u8], offset: &mut usize, len: usize) -> CsshResult<Vec<u8>> {
    Ok(take(data, offset, len, "raw bytes")?.to_vec())
}

/// Reads a length-prefixed byte string.
pub fn read_bytes(data: &[u8], offset: &mut usize) -> CsshResult<Vec<u8>> {
    let len = read_u32(data, offset)? as usize;
    Ok(take(data, offset, len, "string body")?.to_vec())
}

/// Reads a length-prefixed UTF-8 string.
pub fn read_string(data: &[u8], offset: &mut usize) -> CsshResult<String> {
    let bytes = read_bytes(data, offset)?;
    String::from_utf8(bytes)
        .map_err(|_| CsshError::Decode("String contains invalid UTF-8".to_string()))
}

/// Reads an mpint as a signed big integer.
///
/// A zero-length string decodes to zero.
pub fn read_mpint(data: &[u8], offset: &mut usize) -> CsshResult<BigInt> {
    let bytes = read_bytes(data, offset)?;
    Ok(BigInt::from_signed_bytes_be(&bytes))
}

/// Reads an mpint that must not be negative.
pub fn read_mpint_unsigned(data: &[u8], offset: &mut usize) -> CsshResult<BigUint> {
    read_mpint(data, offset)?
        .to_biguint()
        .ok_or_else(|| CsshError::Decode("Negative mpint where unsigned expected".to_string()))
}

/// Reads a name-list. An empty string yields an empty list.
pub fn read_name_list(data: &[u8], offset: &mut usize) -> CsshResult<Vec<String>> {
    let list = read_string(data, offset)?;
    if list.is_empty() {
        return Ok(Vec::new());
    }
    if !list.is_ascii() {
        return Err(CsshError::Decode(
            "Name-list contains non-ASCII characters".to_string(),
        ));
    }
    Ok(list.split(',').map(str::to_string).collect())
}

/// Writes a single byte.
pub fn write_u8(buf: &mut BytesMut, value: u8) {
    buf.put_u8(value);
}

/// Writes a boolean as 0 or 1.
pub fn write_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(u8::from(value));
}

/// Writes a big-endian uint32.
pub fn write_u32(buf: &mut BytesMut, value: u32) {
    buf.put_u32(value);
}

/// Writes a big-endian uint64.
pub fn write_u64(buf: &mut BytesMut, value: u64) {
    buf.put_u64(value);
}

/// Writes a length-prefixed byte string.
pub fn write_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Writes a length-prefixed UTF-8 string.
pub fn write_string(buf: &mut BytesMut, s: &str) {
    write_bytes(buf, s.as_bytes());
}

/// Writes a signed big integer as an mpint.
///
/// The encoding is minimal: zero is an empty string, positive values whose top
/// bit is set get a single leading `0x00`, and negative values carry no
/// redundant leading `0xff`.
pub fn write_mpint(buf: &mut BytesMut, value: &BigInt) {
    write_bytes(buf, &mpint_body(value));
}

/// Writes an unsigned magnitude (big-endian bytes, leading zeros allowed) as an mpint.
pub fn write_mpint_unsigned(buf: &mut BytesMut, magnitude: &[u8]) {
    let value = BigInt::from_bytes_be(Sign::Plus, magnitude);
    write_mpint(buf, &value);
}

/// Returns the full mpint encoding (length prefix included) of an unsigned value.
pub fn encode_mpint(value: &BigUint) -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_mpint(&mut buf, &BigInt::from(value.clone()));
    buf.to_vec()
}

/// Writes a name-list.
pub fn write_name_list<S: AsRef<str>>(buf: &mut BytesMut, names: &[S]) {
    let joined = names
        .iter()
        .map(|n| n.as_ref())
        .collect::<Vec<_>>()
        .join(",");
    write_string(buf, &joined);
}

fn mpint_body(value: &BigInt) -> Vec<u8> {
    if value.sign() == Sign::NoSign {
        return Vec::new();
    }
    value.to_signed_bytes_be()
}
