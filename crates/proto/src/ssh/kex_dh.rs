//! Diffie-Hellman key exchange (RFC 4253 Section 8, RFC 8268).
//!
//! This module implements the server side of:
//! - diffie-hellman-group16-sha512 (4096-bit MODP group)
//! - diffie-hellman-group14-sha256 (2048-bit MODP group)
//! - diffie-hellman-group14-sha1 (2048-bit MODP group)
//!
//! plus the exchange hash and the six-key schedule of RFC 4253 Section 7.2.
//!
//! # Security
//!
//! - The client's public value `e` is checked to lie in `(1, p-1)`
//! - Private exponents and derived keys are zeroized on drop
//! - `session_id` is fixed by the first exchange and never replaced

use crate::ssh::algorithms::{AlgorithmRegistry, AlgorithmSet};
use crate::ssh::hostkey::HostKey;
use crate::ssh::kex::{KexInit, KexdhInit, KexdhReply};
use crate::ssh::wire::{encode_mpint, write_bytes, write_mpint_unsigned, write_string};
use bytes::BytesMut;
use cssh_platform::{CsshError, CsshResult};
use num_bigint::{BigUint, RandBigInt};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;
use zeroize::Zeroize;

/// MODP groups from RFC 3526.
mod groups {
    use num_bigint::BigUint;
    use once_cell::sync::Lazy;

    const GROUP14_PRIME: &str = "\
        FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
        29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
        EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
        E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
        EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
        C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
        83655D23DCA3AD961C62F356208552BB9ED529077096966D\
        670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
        E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
        DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
        15728E5A8AACAA68FFFFFFFFFFFFFFFF";

    const GROUP16_PRIME: &str = "\
        FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
        29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
        EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
        E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
        EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
        C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
        83655D23DCA3AD961C62F356208552BB9ED529077096966D\
        670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
        E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
        DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
        15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64\
        ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7\
        ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B\
        F12FFA06D98A0864D87602733EC86A64521F2B18177B200C\
        BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31\
        43DB5BFCE0FD108E4B82D120A92108011A723C12A787E6D7\
        88719A10BDBA5B2699C327186AF4E23C1A946834B6150BDA\
        2583E9CA2AD44CE8DBBBC2DB04DE8EF92E8EFC141FBECAA6\
        287C59474E6BC05D99B2964FA090C3A2233BA186515BE7ED\
        1F612970CEE2D7AFB81BDD762170481CD0069127D5B05AA9\
        93B4EA988D8FDDC186FFB7DC90A6C08F4DF435C934063199\
        FFFFFFFFFFFFFFFF";

    fn parse(hex_digits: &str) -> BigUint {
        BigUint::parse_bytes(hex_digits.as_bytes(), 16).expect("MODP prime literal is valid hex")
    }

    /// 2048-bit prime
    pub static GROUP14: Lazy<BigUint> = Lazy::new(|| parse(GROUP14_PRIME));

    /// 4096-bit prime
    pub static GROUP16: Lazy<BigUint> = Lazy::new(|| parse(GROUP16_PRIME));

    /// Generator shared by both groups
    pub const GENERATOR: u32 = 2;
}

/// Digest bound to a key exchange method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexHash {
    /// SHA-1 (20 bytes)
    Sha1,
    /// SHA-256 (32 bytes)
    Sha256,
    /// SHA-512 (64 bytes)
    Sha512,
}

impl KexHash {
    /// Hashes `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            KexHash::Sha1 => Sha1::digest(data).to_vec(),
            KexHash::Sha256 => Sha256::digest(data).to_vec(),
            KexHash::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            KexHash::Sha1 => 20,
            KexHash::Sha256 => 32,
            KexHash::Sha512 => 64,
        }
    }
}

/// Key exchange method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KexAlgorithm {
    /// diffie-hellman-group16-sha512
    DhGroup16Sha512,
    /// diffie-hellman-group14-sha256
    DhGroup14Sha256,
    /// diffie-hellman-group14-sha1
    DhGroup14Sha1,
}

impl KexAlgorithm {
    /// Returns the algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            KexAlgorithm::DhGroup16Sha512 => "diffie-hellman-group16-sha512",
            KexAlgorithm::DhGroup14Sha256 => "diffie-hellman-group14-sha256",
            KexAlgorithm::DhGroup14Sha1 => "diffie-hellman-group14-sha1",
        }
    }

    /// Parses the algorithm from its name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "diffie-hellman-group16-sha512" => Some(KexAlgorithm::DhGroup16Sha512),
            "diffie-hellman-group14-sha256" => Some(KexAlgorithm::DhGroup14Sha256),
            "diffie-hellman-group14-sha1" => Some(KexAlgorithm::DhGroup14Sha1),
            _ => None,
        }
    }

    /// Exchange-hash and key-schedule digest.
    pub fn hash(&self) -> KexHash {
        match self {
            KexAlgorithm::DhGroup16Sha512 => KexHash::Sha512,
            KexAlgorithm::DhGroup14Sha256 => KexHash::Sha256,
            KexAlgorithm::DhGroup14Sha1 => KexHash::Sha1,
        }
    }

    /// Safe prime `p`.
    pub fn prime(&self) -> &'static BigUint {
        match self {
            KexAlgorithm::DhGroup16Sha512 => &groups::GROUP16,
            KexAlgorithm::DhGroup14Sha256 | KexAlgorithm::DhGroup14Sha1 => &groups::GROUP14,
        }
    }

    /// Generator `g`.
    pub fn generator(&self) -> BigUint {
        BigUint::from(groups::GENERATOR)
    }

    /// Private exponent size in bits (RFC 8268 Section 4 sizing).
    pub fn exponent_bits(&self) -> u64 {
        match self {
            KexAlgorithm::DhGroup16Sha512 => 512,
            KexAlgorithm::DhGroup14Sha256 | KexAlgorithm::DhGroup14Sha1 => 256,
        }
    }
}

/// Checks `1 < value < p - 1`.
pub fn validate_public_value(value: &BigUint, prime: &BigUint) -> CsshResult<()> {
    let one = BigUint::from(1u32);
    if *value <= one || *value >= prime - &one {
        return Err(CsshError::Security(
            "DH public value out of range".to_string(),
        ));
    }
    Ok(())
}

/// Server half of one Diffie-Hellman exchange.
pub struct DhServerExchange {
    algorithm: KexAlgorithm,
    /// Private exponent y (big-endian, zeroized on drop)
    private_key: Vec<u8>,
    /// f = g^y mod p
    public_key: BigUint,
}

impl DhServerExchange {
    /// Draws a random exponent in `[2, 2^exponent_bits)`.
    pub fn new(algorithm: KexAlgorithm) -> Self {
        let mut rng = rand::thread_rng();
        let upper = BigUint::from(1u32) << algorithm.exponent_bits();
        let y = rng.gen_biguint_range(&BigUint::from(2u32), &upper);
        Self::with_exponent(algorithm, &y)
    }

    /// Uses a caller-supplied exponent.
    pub fn with_exponent(algorithm: KexAlgorithm, y: &BigUint) -> Self {
        let public_key = algorithm.generator().modpow(y, algorithm.prime());
        Self {
            algorithm,
            private_key: y.to_bytes_be(),
            public_key,
        }
    }

    /// Returns `f`.
    pub fn public_key(&self) -> &BigUint {
        &self.public_key
    }

    /// Computes `K = e^y mod p` after validating `e`.
    pub fn compute_shared_secret(&self, client_public: &BigUint) -> CsshResult<BigUint> {
        let p = self.algorithm.prime();
        validate_public_value(client_public, p)?;
        let y = BigUint::from_bytes_be(&self.private_key);
        Ok(client_public.modpow(&y, p))
    }
}

impl Drop for DhServerExchange {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

/// Fields hashed into `H`, in wire order.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeHashInput<'a> {
    /// V_C, CR LF stripped
    pub client_version: &'a str,
    /// V_S, CR LF stripped
    pub server_version: &'a str,
    /// I_C, the client's KEXINIT payload
    pub client_kexinit: &'a [u8],
    /// I_S, the server's KEXINIT payload
    pub server_kexinit: &'a [u8],
    /// K_S
    pub host_key: &'a [u8],
    /// e
    pub client_public: &'a BigUint,
    /// f
    pub server_public: &'a BigUint,
    /// K
    pub shared_secret: &'a BigUint,
}

/// Computes the exchange hash `H` (RFC 4253 Section 8).
pub fn exchange_hash(hash: KexHash, input: &ExchangeHashInput<'_>) -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_string(&mut buf, input.client_version);
    write_string(&mut buf, input.server_version);
    write_bytes(&mut buf, input.client_kexinit);
    write_bytes(&mut buf, input.server_kexinit);
    write_bytes(&mut buf, input.host_key);
    write_mpint_unsigned(&mut buf, &input.client_public.to_bytes_be());
    write_mpint_unsigned(&mut buf, &input.server_public.to_bytes_be());
    write_mpint_unsigned(&mut buf, &input.shared_secret.to_bytes_be());
    hash.digest(&buf)
}

/// Derives one session key (RFC 4253 Section 7.2).
///
/// ```text
/// K1 = HASH(K || H || letter || session_id)
/// K2 = HASH(K || H || K1)
/// K3 = HASH(K || H || K1 || K2)
/// key = K1 || K2 || K3 || ...   (truncated to key_length)
/// ```
///
/// `K` is hashed in its mpint encoding.
///
/// # Example
///
/// ```rust
/// use cssh_proto::ssh::kex_dh::{derive_key, KexHash};
/// use num_bigint::BigUint;
///
/// let k = BigUint::from(0x42u32);
/// let key = derive_key(KexHash::Sha1, &k, &[1; 20], &[2; 20], b'C', 32);
/// assert_eq!(key.len(), 32);
/// ```
pub fn derive_key(
    hash: KexHash,
    shared_secret: &BigUint,
    exchange_hash: &[u8],
    session_id: &[u8],
    letter: u8,
    key_length: usize,
) -> Vec<u8> {
    let mut prefix = encode_mpint(shared_secret);
    prefix.extend_from_slice(exchange_hash);

    let mut input = prefix.clone();
    input.push(letter);
    input.extend_from_slice(session_id);
    let mut key = hash.digest(&input);

    while key.len() < key_length {
        input.clear();
        input.extend_from_slice(&prefix);
        input.extend_from_slice(&key);
        let block = hash.digest(&input);
        key.extend_from_slice(&block);
    }

    input.zeroize();
    prefix.zeroize();
    key.truncate(key_length);
    key
}

/// The six keys of one exchange.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct KeyMaterial {
    /// 'A': initial IV client to server
    pub iv_client_to_server: Vec<u8>,
    /// 'B': initial IV server to client
    pub iv_server_to_client: Vec<u8>,
    /// 'C': encryption key client to server
    pub enc_client_to_server: Vec<u8>,
    /// 'D': encryption key server to client
    pub enc_server_to_client: Vec<u8>,
    /// 'E': integrity key client to server
    pub mac_client_to_server: Vec<u8>,
    /// 'F': integrity key server to client
    pub mac_server_to_client: Vec<u8>,
}

impl KeyMaterial {
    /// Derives every key at the length the negotiated algorithms need.
    pub fn derive(
        hash: KexHash,
        shared_secret: &BigUint,
        exchange_hash: &[u8],
        session_id: &[u8],
        algorithms: &AlgorithmSet,
    ) -> Self {
        let key = |letter, len| derive_key(hash, shared_secret, exchange_hash, session_id, letter, len);
        Self {
            iv_client_to_server: key(b'A', algorithms.encryption_client_to_server.iv_size()),
            iv_server_to_client: key(b'B', algorithms.encryption_server_to_client.iv_size()),
            enc_client_to_server: key(b'C', algorithms.encryption_client_to_server.key_size()),
            enc_server_to_client: key(b'D', algorithms.encryption_server_to_client.key_size()),
            mac_client_to_server: key(b'E', algorithms.mac_client_to_server.key_size()),
            mac_server_to_client: key(b'F', algorithms.mac_server_to_client.key_size()),
        }
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.iv_client_to_server.zeroize();
        self.iv_server_to_client.zeroize();
        self.enc_client_to_server.zeroize();
        self.enc_server_to_client.zeroize();
        self.mac_client_to_server.zeroize();
        self.mac_server_to_client.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

/// Keys and algorithms ready to be activated by NEWKEYS.
#[derive(Debug)]
pub struct PendingKeys {
    /// Negotiated algorithms
    pub algorithms: AlgorithmSet,
    /// Derived keys
    pub keys: KeyMaterial,
}

/// Result of handling a client KEXINIT.
#[derive(Debug)]
pub struct KexInitOutcome {
    /// `I_S`, our KEXINIT payload
    pub server_kexinit: Vec<u8>,
    /// Negotiated algorithms
    pub algorithms: AlgorithmSet,
}

#[derive(Debug)]
enum KexState {
    Idle,
    AwaitingDhInit {
        client_kexinit: Vec<u8>,
        server_kexinit: Vec<u8>,
        algorithms: AlgorithmSet,
        discard_guess: bool,
    },
}

/// Server key exchange state machine.
///
/// 1. [`server_kexinit`](Self::server_kexinit): produce and record `I_S`.
/// 2. [`on_kexinit`](Self::on_kexinit): record `I_C`, negotiate.
/// 3. [`on_dh_init`](Self::on_dh_init): DH, `H`, signature, key schedule.
#[derive(Debug)]
pub struct KeyExchangeEngine {
    registry: AlgorithmRegistry,
    client_version: String,
    server_version: String,
    state: KexState,
    sent_kexinit: Option<Vec<u8>>,
    session_id: Option<Vec<u8>>,
    exchanges: u32,
}

impl KeyExchangeEngine {
    /// Creates an engine for one connection. Versions are CR LF stripped.
    pub fn new(
        registry: AlgorithmRegistry,
        client_version: impl Into<String>,
        server_version: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            client_version: client_version.into(),
            server_version: server_version.into(),
            state: KexState::Idle,
            sent_kexinit: None,
            session_id: None,
            exchanges: 0,
        }
    }

    /// Session identifier, set by the first completed exchange.
    pub fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    /// Number of completed exchanges.
    pub fn exchanges(&self) -> u32 {
        self.exchanges
    }

    /// True between KEXINIT and KEXDH_INIT.
    pub fn in_progress(&self) -> bool {
        matches!(self.state, KexState::AwaitingDhInit { .. })
    }

    /// Builds our KEXINIT and records it as `I_S` for the next exchange.
    ///
    /// It must reach the peer before negotiation, so a failed negotiation
    /// still leaves the client with our lists.
    pub fn server_kexinit(&mut self) -> CsshResult<KexInit> {
        self.ensure_idle()?;
        let server = self.registry.kex_init();
        self.sent_kexinit = Some(server.to_bytes());
        Ok(server)
    }

    fn ensure_idle(&self) -> CsshResult<()> {
        if self.in_progress() {
            return Err(CsshError::Protocol(
                "KEXINIT received during key exchange".to_string(),
            ));
        }
        Ok(())
    }

    /// Handles the client's raw KEXINIT payload.
    ///
    /// Uses the KEXINIT recorded by [`server_kexinit`](Self::server_kexinit),
    /// building one if none was sent.
    pub fn on_kexinit(&mut self, payload: &[u8]) -> CsshResult<KexInitOutcome> {
        self.ensure_idle()?;
        let server_kexinit = match self.sent_kexinit.take() {
            Some(sent) => sent,
            None => self.registry.kex_init().to_bytes(),
        };
        let client = KexInit::from_bytes(payload)?;
        let algorithms = self.registry.negotiate(&client)?;

        // A wrong guess means the client's next packet belongs to a method we did not pick.
        let discard_guess = client.first_kex_packet_follows()
            && (client.kex_algorithms().first().map(String::as_str) != Some(algorithms.kex.name())
                || client.server_host_key_algorithms().first().map(String::as_str)
                    != Some(algorithms.host_key.name()));

        debug!(
            kex = algorithms.kex.name(),
            host_key = algorithms.host_key.name(),
            discard_guess,
            "key exchange negotiated"
        );

        self.state = KexState::AwaitingDhInit {
            client_kexinit: payload.to_vec(),
            server_kexinit: server_kexinit.clone(),
            algorithms,
            discard_guess,
        };
        Ok(KexInitOutcome {
            server_kexinit,
            algorithms,
        })
    }

    /// Handles KEXDH_INIT.
    ///
    /// Returns `None` when the message was the client's wrongly guessed first
    /// kex packet and has been discarded.
    pub fn on_dh_init(
        &mut self,
        init: &KexdhInit,
        host_key: &dyn HostKey,
    ) -> CsshResult<Option<(KexdhReply, PendingKeys)>> {
        let (client_kexinit, server_kexinit, algorithms) =
            match std::mem::replace(&mut self.state, KexState::Idle) {
                KexState::Idle => {
                    return Err(CsshError::Protocol(
                        "KEXDH_INIT without KEXINIT".to_string(),
                    ))
                }
                KexState::AwaitingDhInit {
                    client_kexinit,
                    server_kexinit,
                    algorithms,
                    discard_guess: true,
                } => {
                    debug!("discarding guessed key exchange packet");
                    self.state = KexState::AwaitingDhInit {
                        client_kexinit,
                        server_kexinit,
                        algorithms,
                        discard_guess: false,
                    };
                    return Ok(None);
                }
                KexState::AwaitingDhInit {
                    client_kexinit,
                    server_kexinit,
                    algorithms,
                    ..
                } => (client_kexinit, server_kexinit, algorithms),
            };

        let kex = algorithms.kex;
        let dh = DhServerExchange::new(kex);
        let shared_secret = dh.compute_shared_secret(init.e())?;
        let host_key_blob = host_key.public_key_bytes();

        let h = exchange_hash(
            kex.hash(),
            &ExchangeHashInput {
                client_version: &self.client_version,
                server_version: &self.server_version,
                client_kexinit: &client_kexinit,
                server_kexinit: &server_kexinit,
                host_key: &host_key_blob,
                client_public: init.e(),
                server_public: dh.public_key(),
                shared_secret: &shared_secret,
            },
        );

        let session_id = self.session_id.get_or_insert_with(|| h.clone()).clone();
        let signature = host_key.sign(algorithms.host_key, &h)?;
        let keys = KeyMaterial::derive(kex.hash(), &shared_secret, &h, &session_id, &algorithms);
        self.exchanges += 1;

        let reply = KexdhReply::new(host_key_blob, dh.public_key().clone(), signature);
        Ok(Some((reply, PendingKeys { algorithms, keys })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::compression::CompressionAlgorithm;
    use crate::ssh::crypto::{CipherAlgorithm, MacAlgorithm};
    use crate::ssh::hostkey::{HostKeyAlgorithm, RsaHostKey};
    use once_cell::sync::Lazy;

    static HOST_KEY: Lazy<RsaHostKey> = Lazy::new(|| RsaHostKey::generate(1024).unwrap());

    fn sample_set() -> AlgorithmSet {
        AlgorithmSet {
            kex: KexAlgorithm::DhGroup14Sha1,
            host_key: HostKeyAlgorithm::SshRsa,
            encryption_client_to_server: CipherAlgorithm::Aes256Cbc,
            encryption_server_to_client: CipherAlgorithm::Aes128Cbc,
            mac_client_to_server: MacAlgorithm::HmacSha256,
            mac_server_to_client: MacAlgorithm::HmacSha1,
            compression_client_to_server: CompressionAlgorithm::None,
            compression_server_to_client: CompressionAlgorithm::None,
        }
    }

    fn client_kexinit(kex: &str) -> KexInit {
        KexInit::builder()
            .cookie([7; 16])
            .kex([kex])
            .host_key(["ssh-rsa"])
            .encryption(["aes128-cbc"])
            .mac(["hmac-sha1"])
            .compression(["none"])
            .build()
    }

    #[test]
    fn test_group_parameters() {
        assert_eq!(KexAlgorithm::DhGroup14Sha1.prime().bits(), 2048);
        assert_eq!(KexAlgorithm::DhGroup16Sha512.prime().bits(), 4096);
        assert_eq!(
            KexAlgorithm::DhGroup14Sha256.prime(),
            KexAlgorithm::DhGroup14Sha1.prime()
        );
        assert_eq!(KexAlgorithm::DhGroup16Sha512.hash().output_len(), 64);
        for alg in [
            KexAlgorithm::DhGroup16Sha512,
            KexAlgorithm::DhGroup14Sha256,
            KexAlgorithm::DhGroup14Sha1,
        ] {
            assert_eq!(KexAlgorithm::from_name(alg.name()), Some(alg));
        }
    }

    #[test]
    fn test_shared_secret_matches_modpow() {
        let alg = KexAlgorithm::DhGroup14Sha1;
        let p = alg.prime();
        let g = BigUint::from(2u32);
        let x = BigUint::from(0x1234_5678_9abc_def0u64);
        let y = BigUint::from(0x0fed_cba9_8765_4321u64);

        let e = g.modpow(&x, p);
        let server = DhServerExchange::with_exponent(alg, &y);
        let k = server.compute_shared_secret(&e).unwrap();

        assert_eq!(k, e.modpow(&y, p));
        assert_eq!(k, server.public_key().modpow(&x, p));
    }

    #[test]
    fn test_client_public_value_range() {
        let server = DhServerExchange::new(KexAlgorithm::DhGroup14Sha256);
        let p = KexAlgorithm::DhGroup14Sha256.prime();
        for bad in [
            BigUint::from(0u32),
            BigUint::from(1u32),
            p - 1u32,
            p.clone(),
            p + 5u32,
        ] {
            assert!(server.compute_shared_secret(&bad).is_err());
        }
        assert!(server.compute_shared_secret(&BigUint::from(2u32)).is_ok());
    }

    #[test]
    fn test_exchange_hash_is_sha1_of_transcript() {
        let e = BigUint::from(0x80u32);
        let f = BigUint::from(0x1234u32);
        let k = BigUint::from(0u32);
        let input = ExchangeHashInput {
            client_version: "SSH-2.0-Foo",
            server_version: "SSH-2.0-Bar",
            client_kexinit: &[20, 1, 2],
            server_kexinit: &[20, 3],
            host_key: b"KS",
            client_public: &e,
            server_public: &f,
            shared_secret: &k,
        };

        let mut expected = Vec::new();
        expected.extend_from_slice(&[0, 0, 0, 11]);
        expected.extend_from_slice(b"SSH-2.0-Foo");
        expected.extend_from_slice(&[0, 0, 0, 11]);
        expected.extend_from_slice(b"SSH-2.0-Bar");
        expected.extend_from_slice(&[0, 0, 0, 3, 20, 1, 2]);
        expected.extend_from_slice(&[0, 0, 0, 2, 20, 3]);
        expected.extend_from_slice(&[0, 0, 0, 2, b'K', b'S']);
        expected.extend_from_slice(&[0, 0, 0, 2, 0x00, 0x80]);
        expected.extend_from_slice(&[0, 0, 0, 2, 0x12, 0x34]);
        expected.extend_from_slice(&[0, 0, 0, 0]);

        assert_eq!(
            exchange_hash(KexHash::Sha1, &input),
            Sha1::digest(&expected).to_vec()
        );
    }

    #[test]
    fn test_derive_key_is_prefix_of_chain() {
        let k = BigUint::from(0x42u32);
        let h = [0x01u8; 20];
        let sid = [0x02u8; 20];

        let short = derive_key(KexHash::Sha1, &k, &h, &sid, b'C', 16);
        let long = derive_key(KexHash::Sha1, &k, &h, &sid, b'C', 60);
        assert_eq!(short.len(), 16);
        assert_eq!(long.len(), 60);
        assert_eq!(&long[..16], &short[..]);

        let mut first = encode_mpint(&k);
        first.extend_from_slice(&h);
        first.push(b'C');
        first.extend_from_slice(&sid);
        let k1 = Sha1::digest(&first).to_vec();

        let mut second = encode_mpint(&k);
        second.extend_from_slice(&h);
        second.extend_from_slice(&k1);
        let k2 = Sha1::digest(&second).to_vec();

        let mut third = encode_mpint(&k);
        third.extend_from_slice(&h);
        third.extend_from_slice(&k1);
        third.extend_from_slice(&k2);
        let k3 = Sha1::digest(&third).to_vec();

        assert_eq!(&long[..20], &k1[..]);
        assert_eq!(&long[20..40], &k2[..]);
        assert_eq!(&long[40..60], &k3[..]);

        assert_ne!(short, derive_key(KexHash::Sha1, &k, &h, &sid, b'D', 16));
    }

    #[test]
    fn test_key_material_sizes() {
        let k = BigUint::from(7u32);
        let keys = KeyMaterial::derive(KexHash::Sha1, &k, &[3; 20], &[3; 20], &sample_set());
        assert_eq!(keys.iv_client_to_server.len(), 16);
        assert_eq!(keys.enc_client_to_server.len(), 32);
        assert_eq!(keys.enc_server_to_client.len(), 16);
        assert_eq!(keys.mac_client_to_server.len(), 32);
        assert_eq!(keys.mac_server_to_client.len(), 20);
        assert_eq!(format!("{:?}", keys), "KeyMaterial(<redacted>)");
    }

    #[test]
    fn test_engine_full_exchange_and_session_id_fixed() {
        let mut engine =
            KeyExchangeEngine::new(AlgorithmRegistry::default(), "SSH-2.0-Foo", "SSH-2.0-Bar");
        assert!(engine.session_id().is_none());

        let outcome = engine
            .on_kexinit(&client_kexinit("diffie-hellman-group14-sha1").to_bytes())
            .unwrap();
        assert_eq!(outcome.algorithms.kex, KexAlgorithm::DhGroup14Sha1);
        assert!(engine.in_progress());

        let g = BigUint::from(2u32);
        let x = BigUint::from(987654321u64);
        let e = g.modpow(&x, KexAlgorithm::DhGroup14Sha1.prime());
        let (reply, pending) = engine
            .on_dh_init(&KexdhInit::new(e.clone()), &*HOST_KEY)
            .unwrap()
            .unwrap();

        assert_eq!(reply.host_key(), &HOST_KEY.public_key_bytes()[..]);
        assert_eq!(pending.keys.enc_client_to_server.len(), 16);
        let first_id = engine.session_id().unwrap().to_vec();
        assert_eq!(first_id.len(), 20);

        // Recompute H from the transcript and check it became the session id.
        let k = reply.f().modpow(&x, KexAlgorithm::DhGroup14Sha1.prime());
        let h = exchange_hash(
            KexHash::Sha1,
            &ExchangeHashInput {
                client_version: "SSH-2.0-Foo",
                server_version: "SSH-2.0-Bar",
                client_kexinit: &client_kexinit("diffie-hellman-group14-sha1").to_bytes(),
                server_kexinit: &outcome.server_kexinit,
                host_key: reply.host_key(),
                client_public: &e,
                server_public: reply.f(),
                shared_secret: &k,
            },
        );
        assert_eq!(h, first_id);
        assert!(HOST_KEY.verify(&h, reply.signature()).unwrap());

        engine
            .on_kexinit(&client_kexinit("diffie-hellman-group14-sha256").to_bytes())
            .unwrap();
        engine
            .on_dh_init(&KexdhInit::new(e), &*HOST_KEY)
            .unwrap()
            .unwrap();
        assert_eq!(engine.session_id().unwrap(), &first_id[..]);
        assert_eq!(engine.exchanges(), 2);
    }

    #[test]
    fn test_engine_uses_sent_kexinit() {
        let mut engine =
            KeyExchangeEngine::new(AlgorithmRegistry::default(), "SSH-2.0-Foo", "SSH-2.0-Bar");
        let sent = engine.server_kexinit().unwrap();
        let outcome = engine
            .on_kexinit(&client_kexinit("diffie-hellman-group14-sha256").to_bytes())
            .unwrap();
        assert_eq!(outcome.server_kexinit, sent.to_bytes());
        assert!(matches!(
            engine.server_kexinit(),
            Err(CsshError::Protocol(_))
        ));
    }

    #[test]
    fn test_engine_rejects_out_of_order() {
        let mut engine =
            KeyExchangeEngine::new(AlgorithmRegistry::default(), "SSH-2.0-Foo", "SSH-2.0-Bar");
        let e = BigUint::from(5u32);
        assert!(matches!(
            engine.on_dh_init(&KexdhInit::new(e), &*HOST_KEY),
            Err(CsshError::Protocol(_))
        ));
    }

    #[test]
    fn test_engine_discards_wrong_guess() {
        let mut engine =
            KeyExchangeEngine::new(AlgorithmRegistry::default(), "SSH-2.0-Foo", "SSH-2.0-Bar");
        let client = KexInit::builder()
            .kex(["curve25519-sha256", "diffie-hellman-group14-sha256"])
            .host_key(["ssh-rsa"])
            .encryption(["aes128-cbc"])
            .mac(["hmac-sha1"])
            .compression(["none"])
            .first_kex_packet_follows(true)
            .build();
        engine.on_kexinit(&client.to_bytes()).unwrap();

        let e = BigUint::from(5u32);
        assert!(engine
            .on_dh_init(&KexdhInit::new(e.clone()), &*HOST_KEY)
            .unwrap()
            .is_none());
        assert!(engine
            .on_dh_init(&KexdhInit::new(e), &*HOST_KEY)
            .unwrap()
            .is_some());
    }
}
