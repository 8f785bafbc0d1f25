//! Key exchange messages (RFC 4253 Sections 7 and 8).
//!
//! - SSH_MSG_KEXINIT carries the sender's algorithm preferences
//! - SSH_MSG_NEWKEYS switches a direction to the freshly derived keys
//! - SSH_MSG_KEXDH_INIT / SSH_MSG_KEXDH_REPLY carry the Diffie-Hellman values
//!
//! # Key Exchange Flow
//!
//! 1. Both sides send SSH_MSG_KEXINIT
//! 2. Algorithm negotiation (first client preference the server supports)
//! 3. Client sends `e`, server replies with host key, `f` and signature
//! 4. Both sides send SSH_MSG_NEWKEYS
//!
//! # Example
//!
//! ```rust
//! use cssh_proto::ssh::kex::{KexInit, NewKeys};
//!
//! let kexinit = KexInit::builder()
//!     .kex(["diffie-hellman-group14-sha256"])
//!     .build();
//! let bytes = kexinit.to_bytes();
//! assert_eq!(bytes[0], 20);
//! assert_eq!(NewKeys::new().to_bytes(), vec![21]);
//! ```

use crate::ssh::message::{expect_type, start, MessageType};
use crate::ssh::wire::{
    read_bool, read_bytes, read_mpint_unsigned, read_name_list, read_raw, read_u32, write_bool,
    write_bytes, write_mpint_unsigned, write_name_list, write_u32,
};
use bytes::BufMut;
use cssh_platform::{CsshError, CsshResult};
use num_bigint::BigUint;
use rand::RngCore;

/// SSH_MSG_KEXINIT message (RFC 4253 Section 7.1).
///
/// Each algorithm list is ordered by preference (most preferred first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexInit {
    cookie: [u8; 16],
    kex_algorithms: Vec<String>,
    server_host_key_algorithms: Vec<String>,
    encryption_algorithms_client_to_server: Vec<String>,
    encryption_algorithms_server_to_client: Vec<String>,
    mac_algorithms_client_to_server: Vec<String>,
    mac_algorithms_server_to_client: Vec<String>,
    compression_algorithms_client_to_server: Vec<String>,
    compression_algorithms_server_to_client: Vec<String>,
    languages_client_to_server: Vec<String>,
    languages_server_to_client: Vec<String>,
    first_kex_packet_follows: bool,
}

/// Builder for [`KexInit`].
///
/// Directional lists default to symmetric; the cookie is random unless fixed.
#[derive(Debug, Default)]
pub struct KexInitBuilder {
    cookie: Option<[u8; 16]>,
    kex: Vec<String>,
    host_key: Vec<String>,
    encryption: [Vec<String>; 2],
    mac: [Vec<String>; 2],
    compression: [Vec<String>; 2],
    first_kex_packet_follows: bool,
}

fn owned<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

impl KexInitBuilder {
    /// Fixes the cookie instead of drawing a random one.
    pub fn cookie(mut self, cookie: [u8; 16]) -> Self {
        self.cookie = Some(cookie);
        self
    }

    /// Sets the key exchange algorithms.
    pub fn kex<I: IntoIterator<Item = S>, S: Into<String>>(mut self, names: I) -> Self {
        self.kex = owned(names);
        self
    }

    /// Sets the server host key algorithms.
    pub fn host_key<I: IntoIterator<Item = S>, S: Into<String>>(mut self, names: I) -> Self {
        self.host_key = owned(names);
        self
    }

    /// Sets the encryption algorithms for both directions.
    pub fn encryption<I: IntoIterator<Item = S>, S: Into<String>>(mut self, names: I) -> Self {
        let names = owned(names);
        self.encryption = [names.clone(), names];
        self
    }

    /// Sets the encryption algorithms per direction (client to server, server to client).
    pub fn encryption_directional(
        mut self,
        client_to_server: Vec<String>,
        server_to_client: Vec<String>,
    ) -> Self {
        self.encryption = [client_to_server, server_to_client];
        self
    }

    /// Sets the MAC algorithms for both directions.
    pub fn mac<I: IntoIterator<Item = S>, S: Into<String>>(mut self, names: I) -> Self {
        let names = owned(names);
        self.mac = [names.clone(), names];
        self
    }

    /// Sets the MAC algorithms per direction (client to server, server to client).
    pub fn mac_directional(
        mut self,
        client_to_server: Vec<String>,
        server_to_client: Vec<String>,
    ) -> Self {
        self.mac = [client_to_server, server_to_client];
        self
    }

    /// Sets the compression algorithms for both directions.
    pub fn compression<I: IntoIterator<Item = S>, S: Into<String>>(mut self, names: I) -> Self {
        let names = owned(names);
        self.compression = [names.clone(), names];
        self
    }

    /// Sets the compression algorithms per direction (client to server, server to client).
    pub fn compression_directional(
        mut self,
        client_to_server: Vec<String>,
        server_to_client: Vec<String>,
    ) -> Self {
        self.compression = [client_to_server, server_to_client];
        self
    }

    /// Sets the first_kex_packet_follows flag.
    pub fn first_kex_packet_follows(mut self, follows: bool) -> Self {
        self.first_kex_packet_follows = follows;
        self
    }

    /// Builds the message.
    pub fn build(self) -> KexInit {
        let cookie = self.cookie.unwrap_or_else(|| {
            let mut cookie = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut cookie);
            cookie
        });

        let [encryption_c2s, encryption_s2c] = self.encryption;
        let [mac_c2s, mac_s2c] = self.mac;
        let [compression_c2s, compression_s2c] = self.compression;

        KexInit {
            cookie,
            kex_algorithms: self.kex,
            server_host_key_algorithms: self.host_key,
            encryption_algorithms_client_to_server: encryption_c2s,
            encryption_algorithms_server_to_client: encryption_s2c,
            mac_algorithms_client_to_server: mac_c2s,
            mac_algorithms_server_to_client: mac_s2c,
            compression_algorithms_client_to_server: compression_c2s,
            compression_algorithms_server_to_client: compression_s2c,
            languages_client_to_server: Vec::new(),
            languages_server_to_client: Vec::new(),
            first_kex_packet_follows: self.first_kex_packet_follows,
        }
    }
}

impl KexInit {
    /// Starts building a KEXINIT message.
    pub fn builder() -> KexInitBuilder {
        KexInitBuilder::default()
    }

    /// Returns the cookie.
    pub fn cookie(&self) -> &[u8; 16] {
        &self.cookie
    }

    /// Returns the key exchange algorithms.
    pub fn kex_algorithms(&self) -> &[String] {
        &self.kex_algorithms
    }

    /// Returns the server host key algorithms.
    pub fn server_host_key_algorithms(&self) -> &[String] {
        &self.server_host_key_algorithms
    }

    /// Returns the encryption algorithms (client to server).
    pub fn encryption_algorithms_client_to_server(&self) -> &[String] {
        &self.encryption_algorithms_client_to_server
    }

    /// Returns the encryption algorithms (server to client).
    pub fn encryption_algorithms_server_to_client(&self) -> &[String] {
        &self.encryption_algorithms_server_to_client
    }

    /// Returns the MAC algorithms (client to server).
    pub fn mac_algorithms_client_to_server(&self) -> &[String] {
        &self.mac_algorithms_client_to_server
    }

    /// Returns the MAC algorithms (server to client).
    pub fn mac_algorithms_server_to_client(&self) -> &[String] {
        &self.mac_algorithms_server_to_client
    }

    /// Returns the compression algorithms (client to server).
    pub fn compression_algorithms_client_to_server(&self) -> &[String] {
        &self.compression_algorithms_client_to_server
    }

    /// Returns the compression algorithms (server to client).
    pub fn compression_algorithms_server_to_client(&self) -> &[String] {
        &self.compression_algorithms_server_to_client
    }

    /// Returns the language tags (client to server).
    pub fn languages_client_to_server(&self) -> &[String] {
        &self.languages_client_to_server
    }

    /// Returns the language tags (server to client).
    pub fn languages_server_to_client(&self) -> &[String] {
        &self.languages_server_to_client
    }

    /// Returns whether a guessed KEX packet follows.
    pub fn first_kex_packet_follows(&self) -> bool {
        self.first_kex_packet_follows
    }

    /// Serializes the KEXINIT message to bytes (without packet framing).
    ///
    /// Format (RFC 4253 Section 7.1):
    /// ```text
    /// byte         SSH_MSG_KEXINIT (20)
    /// byte[16]     cookie (random bytes)
    /// name-list    kex_algorithms
    /// name-list    server_host_key_algorithms
    /// name-list    encryption_algorithms_client_to_server
    /// name-list    encryption_algorithms_server_to_client
    /// name-list    mac_algorithms_client_to_server
    /// name-list    mac_algorithms_server_to_client
    /// name-list    compression_algorithms_client_to_server
    /// name-list    compression_algorithms_server_to_client
    /// name-list    languages_client_to_server
    /// name-list    languages_server_to_client
    /// boolean      first_kex_packet_follows
    /// uint32       0 (reserved for future extension)
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::KexInit);
        buf.put_slice(&self.cookie);

        write_name_list(&mut buf, &self.kex_algorithms);
        write_name_list(&mut buf, &self.server_host_key_algorithms);
        write_name_list(&mut buf, &self.encryption_algorithms_client_to_server);
        write_name_list(&mut buf, &self.encryption_algorithms_server_to_client);
        write_name_list(&mut buf, &self.mac_algorithms_client_to_server);
        write_name_list(&mut buf, &self.mac_algorithms_server_to_client);
        write_name_list(&mut buf, &self.compression_algorithms_client_to_server);
        write_name_list(&mut buf, &self.compression_algorithms_server_to_client);
        write_name_list(&mut buf, &self.languages_client_to_server);
        write_name_list(&mut buf, &self.languages_server_to_client);

        write_bool(&mut buf, self.first_kex_packet_follows);
        write_u32(&mut buf, 0);

        buf.to_vec()
    }

    /// Parses a KEXINIT message from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CsshError::Decode`] if the message is truncated, has the
    /// wrong type byte, or carries a malformed name-list.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::KexInit)?;

        let mut cookie = [0u8; 16];
        cookie.copy_from_slice(&read_raw(data, &mut offset, 16)?);

        let kex_algorithms = read_name_list(data, &mut offset)?;
        let server_host_key_algorithms = read_name_list(data, &mut offset)?;
        let encryption_algorithms_client_to_server = read_name_list(data, &mut offset)?;
        let encryption_algorithms_server_to_client = read_name_list(data, &mut offset)?;
        let mac_algorithms_client_to_server = read_name_list(data, &mut offset)?;
        let mac_algorithms_server_to_client = read_name_list(data, &mut offset)?;
        let compression_algorithms_client_to_server = read_name_list(data, &mut offset)?;
        let compression_algorithms_server_to_client = read_name_list(data, &mut offset)?;
        let languages_client_to_server = read_name_list(data, &mut offset)?;
        let languages_server_to_client = read_name_list(data, &mut offset)?;
        let first_kex_packet_follows = read_bool(data, &mut offset)?;
        // reserved
        read_u32(data, &mut offset)?;

        Ok(Self {
            cookie,
            kex_algorithms,
            server_host_key_algorithms,
            encryption_algorithms_client_to_server,
            encryption_algorithms_server_to_client,
            mac_algorithms_client_to_server,
            mac_algorithms_server_to_client,
            compression_algorithms_client_to_server,
            compression_algorithms_server_to_client,
            languages_client_to_server,
            languages_server_to_client,
            first_kex_packet_follows,
        })
    }
}

/// SSH_MSG_NEWKEYS message (RFC 4253 Section 7.3).
///
/// The packet sequence numbers are not reset when keys change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NewKeys;

impl NewKeys {
    /// Creates a new SSH_MSG_NEWKEYS message.
    pub const fn new() -> Self {
        Self
    }

    /// Serializes to the single byte 21.
    pub fn to_bytes(&self) -> Vec<u8> {
        vec![MessageType::NewKeys as u8]
    }

    /// Parses a NEWKEYS message.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        expect_type(data, MessageType::NewKeys)?;
        Ok(Self)
    }
}

/// SSH_MSG_KEXDH_INIT (RFC 4253 Section 8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexdhInit {
    e: BigUint,
}

impl KexdhInit {
    /// Creates the message from the client's public value.
    pub fn new(e: BigUint) -> Self {
        Self { e }
    }

    /// Returns the client's public value `e`.
    pub fn e(&self) -> &BigUint {
        &self.e
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::KexdhInit);
        write_mpint_unsigned(&mut buf, &self.e.to_bytes_be());
        buf.to_vec()
    }

    /// Parses from bytes. A negative `e` is a decode error.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::KexdhInit)?;
        Ok(Self {
            e: read_mpint_unsigned(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_KEXDH_REPLY (RFC 4253 Section 8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexdhReply {
    host_key: Vec<u8>,
    f: BigUint,
    signature: Vec<u8>,
}

impl KexdhReply {
    /// Creates the reply.
    ///
    /// `host_key` is the public host key blob `K_S`; `signature` is the
    /// encoded signature blob over the exchange hash.
    pub fn new(host_key: Vec<u8>, f: BigUint, signature: Vec<u8>) -> Self {
        Self {
            host_key,
            f,
            signature,
        }
    }

    /// Returns the host key blob.
    pub fn host_key(&self) -> &[u8] {
        &self.host_key
    }

    /// Returns the server's public value `f`.
    pub fn f(&self) -> &BigUint {
        &self.f
    }

    /// Returns the signature blob.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::KexdhReply);
        write_bytes(&mut buf, &self.host_key);
        write_mpint_unsigned(&mut buf, &self.f.to_bytes_be());
        write_bytes(&mut buf, &self.signature);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::KexdhReply)?;
        let host_key = read_bytes(data, &mut offset)?;
        let f = read_mpint_unsigned(data, &mut offset)?;
        let signature = read_bytes(data, &mut offset)?;
        if host_key.is_empty() {
            return Err(CsshError::Decode("KEXDH_REPLY has empty host key".into()));
        }
        Ok(Self {
            host_key,
            f,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KexInit {
        KexInit::builder()
            .cookie([7u8; 16])
            .kex(["diffie-hellman-group14-sha1"])
            .host_key(["ssh-rsa"])
            .encryption(["aes128-cbc"])
            .mac(["hmac-sha1"])
            .compression(["none"])
            .build()
    }

    #[test]
    fn test_kexinit_builder_is_symmetric() {
        let k = sample();
        assert_eq!(k.cookie(), &[7u8; 16]);
        assert_eq!(
            k.encryption_algorithms_client_to_server(),
            k.encryption_algorithms_server_to_client()
        );
        assert_eq!(k.mac_algorithms_server_to_client(), ["hmac-sha1"]);
        assert!(k.languages_client_to_server().is_empty());
        assert!(!k.first_kex_packet_follows());
    }

    #[test]
    fn test_kexinit_random_cookie() {
        let a = KexInit::builder().build();
        let b = KexInit::builder().build();
        assert_ne!(a.cookie(), b.cookie());
    }

    #[test]
    fn test_kexinit_wire_layout() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes[0], 20);
        assert_eq!(&bytes[1..17], &[7u8; 16]);
        // first name-list: "diffie-hellman-group14-sha1"
        assert_eq!(&bytes[17..21], &[0, 0, 0, 27]);
        assert_eq!(&bytes[21..48], b"diffie-hellman-group14-sha1");
        // trailing boolean + reserved uint32
        assert_eq!(&bytes[bytes.len() - 5..], &[0, 0, 0, 0, 0]);

        let parsed = KexInit::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn test_kexinit_parse_invalid_type() {
        let mut bytes = sample().to_bytes();
        bytes[0] = 21;
        assert!(matches!(
            KexInit::from_bytes(&bytes),
            Err(CsshError::Decode(_))
        ));
    }

    #[test]
    fn test_kexinit_parse_truncated() {
        let bytes = sample().to_bytes();
        assert!(KexInit::from_bytes(&bytes[..10]).is_err());
        // missing reserved field
        assert!(KexInit::from_bytes(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn test_newkeys() {
        assert_eq!(NewKeys::new().to_bytes(), vec![21]);
        assert!(NewKeys::from_bytes(&[21]).is_ok());
        assert!(NewKeys::from_bytes(&[20]).is_err());
        assert!(NewKeys::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_kexdh_init_high_bit() {
        // 0x80 needs a leading zero byte to stay positive
        let msg = KexdhInit::new(BigUint::from(0x80u32));
        assert_eq!(msg.to_bytes(), vec![30, 0, 0, 0, 2, 0x00, 0x80]);
        assert_eq!(
            KexdhInit::from_bytes(&msg.to_bytes()).unwrap().e(),
            &BigUint::from(0x80u32)
        );
    }

    #[test]
    fn test_kexdh_init_negative_rejected() {
        assert!(KexdhInit::from_bytes(&[30, 0, 0, 0, 1, 0xff]).is_err());
    }

    #[test]
    fn test_kexdh_reply_fields() {
        let reply = KexdhReply::new(b"blob".to_vec(), BigUint::from(5u32), b"sig".to_vec());
        let parsed = KexdhReply::from_bytes(&reply.to_bytes()).unwrap();
        assert_eq!(parsed.host_key(), b"blob");
        assert_eq!(parsed.f(), &BigUint::from(5u32));
        assert_eq!(parsed.signature(), b"sig");
    }
}
