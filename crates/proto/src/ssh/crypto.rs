//! SSH packet ciphers and MACs.
//!
//! This module implements the encryption and integrity algorithms used by
//! the binary packet protocol:
//! - AES-128-CBC, AES-256-CBC (RFC 4253 Section 6.3)
//! - HMAC-SHA1, HMAC-SHA2-256 (RFC 4253 Section 6.4, RFC 6668)
//! - "none" for both, used before the first NEWKEYS
//!
//! Each algorithm is bound to one direction when instantiated: a cipher
//! instance only encrypts or only decrypts, and keeps its CBC chaining state
//! across packets.
//!
//! # Security
//!
//! - **Constant-time MAC verification** via `subtle`
//! - **Key material redacted** from `Debug` output
//!
//! # Example
//!
//! ```rust
//! use cssh_proto::ssh::crypto::{CipherAlgorithm, MacAlgorithm};
//!
//! let key = [0x11u8; 16];
//! let iv = [0x22u8; 16];
//! let mut enc = CipherAlgorithm::Aes128Cbc.encryptor(&key, &iv).unwrap();
//! let mut dec = CipherAlgorithm::Aes128Cbc.decryptor(&key, &iv).unwrap();
//!
//! let mut block = *b"sixteen byte msg";
//! enc.process(&mut block).unwrap();
//! dec.process(&mut block).unwrap();
//! assert_eq!(&block, b"sixteen byte msg");
//!
//! let mac = MacAlgorithm::HmacSha256.instantiate(&[0u8; 32]).unwrap();
//! let tag = mac.compute(0, b"packet");
//! assert!(mac.verify(0, b"packet", &tag));
//! ```

use aes::{Aes128, Aes256};
use cipher::generic_array::GenericArray;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cssh_platform::{CsshError, CsshResult};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

const AES_BLOCK_SIZE: usize = 16;

/// Encryption algorithm for SSH packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// No encryption (before the first key exchange)
    None,
    /// AES-128 in CBC mode
    Aes128Cbc,
    /// AES-256 in CBC mode
    Aes256Cbc,
}

impl CipherAlgorithm {
    /// Returns the algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            CipherAlgorithm::None => "none",
            CipherAlgorithm::Aes128Cbc => "aes128-cbc",
            CipherAlgorithm::Aes256Cbc => "aes256-cbc",
        }
    }

    /// Returns the key size in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            CipherAlgorithm::None => 0,
            CipherAlgorithm::Aes128Cbc => 16,
            CipherAlgorithm::Aes256Cbc => 32,
        }
    }

    /// Returns the IV size in bytes.
    pub fn iv_size(&self) -> usize {
        match self {
            CipherAlgorithm::None => 0,
            CipherAlgorithm::Aes128Cbc | CipherAlgorithm::Aes256Cbc => AES_BLOCK_SIZE,
        }
    }

    /// Returns the cipher block size (8 for "none", the framing minimum).
    pub fn block_size(&self) -> usize {
        match self {
            CipherAlgorithm::None => 8,
            CipherAlgorithm::Aes128Cbc | CipherAlgorithm::Aes256Cbc => AES_BLOCK_SIZE,
        }
    }

    /// Parses the algorithm from its name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(CipherAlgorithm::None),
            "aes128-cbc" => Some(CipherAlgorithm::Aes128Cbc),
            "aes256-cbc" => Some(CipherAlgorithm::Aes256Cbc),
            _ => None,
        }
    }

    /// Creates an encrypting instance.
    ///
    /// `key` and `iv` may be longer than needed; only the leading bytes are used.
    pub fn encryptor(&self, key: &[u8], iv: &[u8]) -> CsshResult<Box<dyn PacketCipher>> {
        let (key, iv) = self.split_material(key, iv)?;
        Ok(match self {
            CipherAlgorithm::None => Box::new(NoneCipher),
            CipherAlgorithm::Aes128Cbc => Box::new(AesCbcEncryptor {
                algorithm: *self,
                inner: CbcEnc::Aes128(
                    cbc::Encryptor::<Aes128>::new_from_slices(key, iv).map_err(invalid_length)?,
                ),
            }),
            CipherAlgorithm::Aes256Cbc => Box::new(AesCbcEncryptor {
                algorithm: *self,
                inner: CbcEnc::Aes256(
                    cbc::Encryptor::<Aes256>::new_from_slices(key, iv).map_err(invalid_length)?,
                ),
            }),
        })
    }

    /// Creates a decrypting instance.
    pub fn decryptor(&self, key: &[u8], iv: &[u8]) -> CsshResult<Box<dyn PacketCipher>> {
        let (key, iv) = self.split_material(key, iv)?;
        Ok(match self {
            CipherAlgorithm::None => Box::new(NoneCipher),
            CipherAlgorithm::Aes128Cbc => Box::new(AesCbcDecryptor {
                algorithm: *self,
                inner: CbcDec::Aes128(
                    cbc::Decryptor::<Aes128>::new_from_slices(key, iv).map_err(invalid_length)?,
                ),
            }),
            CipherAlgorithm::Aes256Cbc => Box::new(AesCbcDecryptor {
                algorithm: *self,
                inner: CbcDec::Aes256(
                    cbc::Decryptor::<Aes256>::new_from_slices(key, iv).map_err(invalid_length)?,
                ),
            }),
        })
    }

    fn split_material<'a>(
        &self,
        key: &'a [u8],
        iv: &'a [u8],
    ) -> CsshResult<(&'a [u8], &'a [u8])> {
        if key.len() < self.key_size() || iv.len() < self.iv_size() {
            return Err(CsshError::Security(format!(
                "Insufficient key material for {}: key {} / {}, iv {} / {}",
                self.name(),
                key.len(),
                self.key_size(),
                iv.len(),
                self.iv_size()
            )));
        }
        Ok((&key[..self.key_size()], &iv[..self.iv_size()]))
    }
}

fn invalid_length(_: cipher::InvalidLength) -> CsshError {
    CsshError::Security("Invalid cipher key or IV length".to_string())
}

/// One direction of a packet cipher.
///
/// `process` encrypts or decrypts in place, depending on how the instance
/// was created. The length must be a multiple of [`PacketCipher::block_size`].
pub trait PacketCipher: Send {
    /// Returns the algorithm.
    fn algorithm(&self) -> CipherAlgorithm;

    /// Returns the block size used for packet framing.
    fn block_size(&self) -> usize {
        self.algorithm().block_size()
    }

    /// Transforms `data` in place.
    fn process(&mut self, data: &mut [u8]) -> CsshResult<()>;
}

impl std::fmt::Debug for dyn PacketCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketCipher")
            .field("algorithm", &self.algorithm())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// The identity cipher.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneCipher;

impl PacketCipher for NoneCipher {
    fn algorithm(&self) -> CipherAlgorithm {
        CipherAlgorithm::None
    }

    fn process(&mut self, _data: &mut [u8]) -> CsshResult<()> {
        Ok(())
    }
}

enum CbcEnc {
    Aes128(cbc::Encryptor<Aes128>),
    Aes256(cbc::Encryptor<Aes256>),
}

enum CbcDec {
    Aes128(cbc::Decryptor<Aes128>),
    Aes256(cbc::Decryptor<Aes256>),
}

fn check_aligned(data: &[u8]) -> CsshResult<()> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(CsshError::Decode(format!(
            "Cipher input of {} bytes is not a multiple of the block size",
            data.len()
        )));
    }
    Ok(())
}

/// AES-CBC encrypting direction.
struct AesCbcEncryptor {
    algorithm: CipherAlgorithm,
    inner: CbcEnc,
}

impl PacketCipher for AesCbcEncryptor {
    fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    fn process(&mut self, data: &mut [u8]) -> CsshResult<()> {
        check_aligned(data)?;
        for chunk in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(chunk);
            match &mut self.inner {
                CbcEnc::Aes128(c) => c.encrypt_block_mut(block),
                CbcEnc::Aes256(c) => c.encrypt_block_mut(block),
            }
        }
        Ok(())
    }
}

/// AES-CBC decrypting direction.
struct AesCbcDecryptor {
    algorithm: CipherAlgorithm,
    inner: CbcDec,
}

impl PacketCipher for AesCbcDecryptor {
    fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    fn process(&mut self, data: &mut [u8]) -> CsshResult<()> {
        check_aligned(data)?;
        for chunk in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(chunk);
            match &mut self.inner {
                CbcDec::Aes128(c) => c.decrypt_block_mut(block),
                CbcDec::Aes256(c) => c.decrypt_block_mut(block),
            }
        }
        Ok(())
    }
}

/// MAC algorithm for SSH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    /// No MAC (before the first key exchange)
    None,
    /// HMAC-SHA1
    HmacSha1,
    /// HMAC-SHA2-256
    HmacSha256,
}

impl MacAlgorithm {
    /// Returns the algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            MacAlgorithm::None => "none",
            MacAlgorithm::HmacSha1 => "hmac-sha1",
            MacAlgorithm::HmacSha256 => "hmac-sha2-256",
        }
    }

    /// Returns the key size in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            MacAlgorithm::None => 0,
            MacAlgorithm::HmacSha1 => 20,
            MacAlgorithm::HmacSha256 => 32,
        }
    }

    /// Returns the MAC output size in bytes.
    pub fn mac_size(&self) -> usize {
        match self {
            MacAlgorithm::None => 0,
            MacAlgorithm::HmacSha1 => 20,
            MacAlgorithm::HmacSha256 => 32,
        }
    }

    /// Parses the algorithm from its name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(MacAlgorithm::None),
            "hmac-sha1" => Some(MacAlgorithm::HmacSha1),
            "hmac-sha2-256" => Some(MacAlgorithm::HmacSha256),
            _ => None,
        }
    }

    /// Creates a keyed instance from (possibly longer) key material.
    pub fn instantiate(&self, key_material: &[u8]) -> CsshResult<Box<dyn PacketMac>> {
        if key_material.len() < self.key_size() {
            return Err(CsshError::Security(format!(
                "Insufficient key material for MAC: expected {}, got {}",
                self.key_size(),
                key_material.len()
            )));
        }
        let key = &key_material[..self.key_size()];
        let invalid = |_| CsshError::Security("Invalid HMAC key".to_string());

        Ok(match self {
            MacAlgorithm::None => Box::new(NoneMac),
            MacAlgorithm::HmacSha1 => Box::new(HmacKey {
                algorithm: *self,
                inner: HmacState::Sha1(Hmac::<Sha1>::new_from_slice(key).map_err(invalid)?),
            }),
            MacAlgorithm::HmacSha256 => Box::new(HmacKey {
                algorithm: *self,
                inner: HmacState::Sha256(Hmac::<Sha256>::new_from_slice(key).map_err(invalid)?),
            }),
        })
    }
}

/// One direction's integrity algorithm.
///
/// The tag covers `uint32(sequence) || unencrypted packet`.
pub trait PacketMac: Send {
    /// Returns the algorithm.
    fn algorithm(&self) -> MacAlgorithm;

    /// Returns the tag length in bytes.
    fn mac_size(&self) -> usize {
        self.algorithm().mac_size()
    }

    /// Computes the tag for a packet.
    fn compute(&self, sequence: u32, packet: &[u8]) -> Vec<u8>;

    /// Verifies a received tag in constant time.
    fn verify(&self, sequence: u32, packet: &[u8], received: &[u8]) -> bool {
        let expected = self.compute(sequence, packet);
        expected.len() == received.len() && bool::from(expected.ct_eq(received))
    }
}

impl std::fmt::Debug for dyn PacketMac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketMac")
            .field("algorithm", &self.algorithm())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// The empty MAC.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneMac;

impl PacketMac for NoneMac {
    fn algorithm(&self) -> MacAlgorithm {
        MacAlgorithm::None
    }

    fn compute(&self, _sequence: u32, _packet: &[u8]) -> Vec<u8> {
        Vec::new()
    }
}

#[derive(Clone)]
enum HmacState {
    Sha1(Hmac<Sha1>),
    Sha256(Hmac<Sha256>),
}

/// Keyed HMAC; the keyed state is cloned per packet.
struct HmacKey {
    algorithm: MacAlgorithm,
    inner: HmacState,
}

impl PacketMac for HmacKey {
    fn algorithm(&self) -> MacAlgorithm {
        self.algorithm
    }

    fn compute(&self, sequence: u32, packet: &[u8]) -> Vec<u8> {
        let seq = sequence.to_be_bytes();
        match self.inner.clone() {
            HmacState::Sha1(mut mac) => {
                mac.update(&seq);
                mac.update(packet);
                mac.finalize().into_bytes().to_vec()
            }
            HmacState::Sha256(mut mac) => {
                mac.update(&seq);
                mac.update(packet);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_algorithm_properties() {
        assert_eq!(CipherAlgorithm::Aes128Cbc.key_size(), 16);
        assert_eq!(CipherAlgorithm::Aes256Cbc.key_size(), 32);
        assert_eq!(CipherAlgorithm::Aes256Cbc.iv_size(), 16);
        assert_eq!(CipherAlgorithm::None.block_size(), 8);
        assert_eq!(CipherAlgorithm::Aes128Cbc.block_size(), 16);
    }

    #[test]
    fn test_cipher_from_name() {
        for alg in [
            CipherAlgorithm::None,
            CipherAlgorithm::Aes128Cbc,
            CipherAlgorithm::Aes256Cbc,
        ] {
            assert_eq!(CipherAlgorithm::from_name(alg.name()), Some(alg));
        }
        assert_eq!(CipherAlgorithm::from_name("aes128-ctr"), None);
    }

    #[test]
    fn test_aes128_cbc_nist_vector() {
        // NIST SP 800-38A F.2.1, first block
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let mut data = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
        let mut enc = CipherAlgorithm::Aes128Cbc.encryptor(&key, &iv).unwrap();
        enc.process(&mut data).unwrap();
        assert_eq!(hex::encode(&data), "7649abac8119b246cee98e9b12e9197d");
    }

    #[test]
    fn test_cbc_chaining_persists_across_calls() {
        let key = [7u8; 32];
        let iv = [9u8; 16];
        let plain = [0x5au8; 64];

        let mut one_shot = plain;
        CipherAlgorithm::Aes256Cbc
            .encryptor(&key, &iv)
            .unwrap()
            .process(&mut one_shot)
            .unwrap();

        let mut split = plain;
        let mut enc = CipherAlgorithm::Aes256Cbc.encryptor(&key, &iv).unwrap();
        enc.process(&mut split[..16]).unwrap();
        enc.process(&mut split[16..]).unwrap();
        assert_eq!(one_shot, split);

        let mut dec = CipherAlgorithm::Aes256Cbc.decryptor(&key, &iv).unwrap();
        dec.process(&mut split[..32]).unwrap();
        dec.process(&mut split[32..]).unwrap();
        assert_eq!(split, plain);
    }

    #[test]
    fn test_cipher_rejects_unaligned() {
        let mut enc = CipherAlgorithm::Aes128Cbc
            .encryptor(&[0u8; 16], &[0u8; 16])
            .unwrap();
        assert!(enc.process(&mut [0u8; 15]).is_err());
    }

    #[test]
    fn test_cipher_insufficient_material() {
        assert!(CipherAlgorithm::Aes256Cbc
            .encryptor(&[0u8; 16], &[0u8; 16])
            .is_err());
    }

    #[test]
    fn test_mac_algorithm_properties() {
        assert_eq!(MacAlgorithm::HmacSha1.mac_size(), 20);
        assert_eq!(MacAlgorithm::HmacSha256.key_size(), 32);
        assert_eq!(MacAlgorithm::from_name("hmac-sha2-256"), Some(MacAlgorithm::HmacSha256));
        assert_eq!(MacAlgorithm::from_name("hmac-md5"), None);
    }

    #[test]
    fn test_hmac_covers_sequence_then_packet() {
        assert!(MacAlgorithm::HmacSha256.instantiate(b"Jefe").is_err());

        // Key material is truncated to the algorithm's key size
        let key = [0x0bu8; 40];
        let mac = MacAlgorithm::HmacSha256.instantiate(&key).unwrap();
        let mut reference = Hmac::<Sha256>::new_from_slice(&key[..32]).unwrap();
        reference.update(&[0, 0, 0, 3]);
        reference.update(b"payload");
        assert_eq!(
            mac.compute(3, b"payload"),
            reference.finalize().into_bytes().to_vec()
        );
    }

    #[test]
    fn test_mac_compute_and_verify() {
        let mac = MacAlgorithm::HmacSha1.instantiate(&[1u8; 20]).unwrap();
        let tag = mac.compute(42, b"data");
        assert_eq!(tag.len(), 20);
        assert!(mac.verify(42, b"data", &tag));
        assert!(!mac.verify(43, b"data", &tag));
        assert!(!mac.verify(42, b"datA", &tag));
        assert!(!mac.verify(42, b"data", &tag[..19]));
    }

    #[test]
    fn test_none_mac_and_cipher() {
        let mac = MacAlgorithm::None.instantiate(&[]).unwrap();
        assert!(mac.compute(0, b"x").is_empty());
        assert!(mac.verify(0, b"x", &[]));

        let mut cipher = CipherAlgorithm::None.encryptor(&[], &[]).unwrap();
        let mut data = *b"plain";
        cipher.process(&mut data).unwrap();
        assert_eq!(&data, b"plain");
    }

    #[test]
    fn test_debug_redacts_keys() {
        let mac = MacAlgorithm::HmacSha256.instantiate(&[0xabu8; 32]).unwrap();
        let printed = format!("{:?}", mac);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("171"));
    }
}
