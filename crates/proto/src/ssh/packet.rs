//! SSH binary packet protocol (RFC 4253 Section 6).
//!
//! # Packet Format
//!
//! ```text
//! uint32    packet_length
//! byte      padding_length
//! byte[n1]  payload (n1 = packet_length - padding_length - 1)
//! byte[n2]  random padding (n2 = padding_length)
//! byte[m]   mac (MAC = Message Authentication Code)
//! ```
//!
//! This module handles the plaintext part (everything but the MAC). Encryption,
//! integrity and sequence numbers live in [`transport`](crate::ssh::transport).
//!
//! # Constraints
//!
//! - `packet_length` does NOT include `mac` or the `packet_length` field itself
//! - `padding_length` is at least 4 and at most 255
//! - `packet_length + 4` is a multiple of `max(cipher block size, 8)`
//! - the whole unencrypted packet is at least 16 bytes
//! - incoming `packet_length` above 35000 is rejected
//!
//! # Example
//!
//! ```rust
//! use cssh_proto::ssh::packet::Packet;
//!
//! let packet = Packet::new(b"payload".to_vec(), 16).unwrap();
//! let bytes = packet.to_bytes();
//! assert_eq!(bytes.len() % 16, 0);
//!
//! let parsed = Packet::from_bytes(&bytes).unwrap();
//! assert_eq!(parsed.payload(), b"payload");
//! ```

use bytes::{Buf, BufMut, BytesMut};
use cssh_platform::{CsshError, CsshResult};
use rand::RngCore;

/// Maximum accepted `packet_length` (RFC 4253 Section 6.1).
pub const MAX_PACKET_SIZE: usize = 35000;

/// Minimum size of a whole packet, length field included.
pub const MIN_PACKET_SIZE: usize = 16;

/// Minimum padding length in bytes.
pub const MIN_PADDING_LEN: usize = 4;

/// Smallest alignment unit, used when the cipher block is smaller.
pub const MIN_BLOCK_SIZE: usize = 8;

/// `packet_length` field plus `padding_length` byte.
pub const HEADER_LEN: usize = 5;

/// Computes the padding length for a payload of `payload_len` bytes.
///
/// The packet is rounded up to a whole number of `max(block_size, 8)` blocks,
/// never below 16 bytes; one more block is added if that leaves fewer than
/// four bytes of padding.
pub fn padding_length(payload_len: usize, block_size: usize) -> usize {
    let block = block_size.max(MIN_BLOCK_SIZE);
    let unpadded = HEADER_LEN + payload_len;
    let desired = unpadded.div_ceil(block) * block;
    let desired = desired.max(MIN_PACKET_SIZE);

    let mut padding = desired - unpadded;
    if padding < MIN_PADDING_LEN {
        padding += block;
    }
    padding
}

/// Unencrypted SSH packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Vec<u8>,
    padding: Vec<u8>,
}

impl Packet {
    /// Pads `payload` with random bytes for the given cipher block size.
    ///
    /// # Errors
    ///
    /// Returns [`CsshError::Protocol`] if the padded packet would exceed
    /// [`MAX_PACKET_SIZE`].
    pub fn new(payload: Vec<u8>, block_size: usize) -> CsshResult<Self> {
        let padding_len = padding_length(payload.len(), block_size);
        let packet_length = 1 + payload.len() + padding_len;
        if packet_length > MAX_PACKET_SIZE {
            return Err(CsshError::Protocol(format!(
                "Packet size {} exceeds maximum {}",
                packet_length, MAX_PACKET_SIZE
            )));
        }

        let mut padding = vec![0u8; padding_len];
        rand::thread_rng().fill_bytes(&mut padding);

        Ok(Self { payload, padding })
    }

    /// Returns the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the packet and returns the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Returns the padding.
    pub fn padding(&self) -> &[u8] {
        &self.padding
    }

    /// Value of the `packet_length` field.
    pub fn packet_length(&self) -> usize {
        1 + self.payload.len() + self.padding.len()
    }

    /// Serializes the plaintext packet (no MAC).
    pub fn to_bytes(&self) -> Vec<u8> {
        let packet_length = self.packet_length();
        let mut buf = BytesMut::with_capacity(4 + packet_length);
        buf.put_u32(packet_length as u32);
        buf.put_u8(self.padding.len() as u8);
        buf.put_slice(&self.payload);
        buf.put_slice(&self.padding);
        buf.to_vec()
    }

    /// Parses a complete plaintext packet (length field included, no MAC).
    ///
    /// # Errors
    ///
    /// Returns [`CsshError::Decode`] if the length fields are inconsistent
    /// with `data` or violate the size limits.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(CsshError::Decode(format!(
                "Packet too short: {} bytes (minimum {})",
                data.len(),
                HEADER_LEN
            )));
        }

        let mut buf = data;
        let packet_length = buf.get_u32() as usize;
        check_packet_length(packet_length)?;

        if buf.len() != packet_length {
            return Err(CsshError::Decode(format!(
                "Packet length mismatch: declared {}, got {} bytes",
                packet_length,
                buf.len()
            )));
        }

        let padding_length = buf.get_u8() as usize;
        if padding_length < MIN_PADDING_LEN {
            return Err(CsshError::Decode(format!(
                "Padding too short: {} bytes (minimum {})",
                padding_length, MIN_PADDING_LEN
            )));
        }
        if packet_length < 1 + padding_length {
            return Err(CsshError::Decode(format!(
                "Padding length {} exceeds packet length {}",
                padding_length, packet_length
            )));
        }

        let payload_length = packet_length - 1 - padding_length;
        let payload = buf[..payload_length].to_vec();
        buf.advance(payload_length);
        let padding = buf.to_vec();

        Ok(Self { payload, padding })
    }
}

/// Validates a `packet_length` field read off the wire.
pub fn check_packet_length(packet_length: usize) -> CsshResult<()> {
    if packet_length > MAX_PACKET_SIZE {
        return Err(CsshError::Decode(format!(
            "Packet too large: {} bytes (maximum {})",
            packet_length, MAX_PACKET_SIZE
        )));
    }
    if packet_length < 1 + MIN_PADDING_LEN {
        return Err(CsshError::Decode(format!(
            "Packet too small: {} bytes",
            packet_length
        )));
    }
    Ok(())
}
