//! Algorithm catalogue and negotiation (RFC 4253 Section 7.1).
//!
//! The [`AlgorithmRegistry`] is an explicit table built at startup. Each entry
//! names an algorithm and says whether it may be used client→server and/or
//! server→client; kex and host-key algorithms serve both directions at once.
//!
//! Negotiation walks the **client's** list in order and picks the first name
//! the server has enabled, independently for each of the eight slots.
//!
//! # Example
//!
//! ```rust
//! use cssh_proto::ssh::algorithms::find_match;
//!
//! let client = vec!["aes256-ctr".to_string(), "aes128-cbc".to_string()];
//! let server = vec!["aes128-cbc".to_string()];
//! assert_eq!(find_match(&client, &server, "encryption").unwrap(), "aes128-cbc");
//! ```

use crate::ssh::compression::CompressionAlgorithm;
use crate::ssh::crypto::{CipherAlgorithm, MacAlgorithm};
use crate::ssh::hostkey::HostKeyAlgorithm;
use crate::ssh::kex::KexInit;
use crate::ssh::kex_dh::KexAlgorithm;
use cssh_platform::{CsshError, CsshResult};

/// Algorithm category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Key exchange method (both directions)
    Kex,
    /// Server host key algorithm (both directions)
    HostKey,
    /// Packet encryption
    Encryption,
    /// Packet integrity
    Mac,
    /// Payload compression
    Compression,
}

impl Category {
    fn is_both_way(&self) -> bool {
        matches!(self, Category::Kex | Category::HostKey)
    }

    fn knows(&self, name: &str) -> bool {
        match self {
            Category::Kex => KexAlgorithm::from_name(name).is_some(),
            Category::HostKey => HostKeyAlgorithm::from_name(name).is_some(),
            Category::Encryption => CipherAlgorithm::from_name(name).is_some(),
            Category::Mac => MacAlgorithm::from_name(name).is_some(),
            Category::Compression => CompressionAlgorithm::from_name(name).is_some(),
        }
    }
}

/// Traffic direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server (inbound on the server)
    ClientToServer,
    /// Server to client (outbound on the server)
    ServerToClient,
}

/// One registered algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmEntry {
    /// Wire name
    pub name: &'static str,
    /// Usable for client→server traffic
    pub client_enabled: bool,
    /// Usable for server→client traffic
    pub server_enabled: bool,
}

impl AlgorithmEntry {
    fn enabled_for(&self, category: Category, direction: Direction) -> bool {
        if category.is_both_way() {
            return self.client_enabled && self.server_enabled;
        }
        match direction {
            Direction::ClientToServer => self.client_enabled,
            Direction::ServerToClient => self.server_enabled,
        }
    }
}

/// Catalogue of supported algorithms in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmRegistry {
    kex: Vec<AlgorithmEntry>,
    host_key: Vec<AlgorithmEntry>,
    encryption: Vec<AlgorithmEntry>,
    mac: Vec<AlgorithmEntry>,
    compression: Vec<AlgorithmEntry>,
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        let on = |name| AlgorithmEntry {
            name,
            client_enabled: true,
            server_enabled: true,
        };
        let off = |name| AlgorithmEntry {
            name,
            client_enabled: false,
            server_enabled: false,
        };

        Self {
            kex: vec![
                on(KexAlgorithm::DhGroup16Sha512.name()),
                on(KexAlgorithm::DhGroup14Sha256.name()),
                on(KexAlgorithm::DhGroup14Sha1.name()),
            ],
            host_key: vec![
                on(HostKeyAlgorithm::RsaSha2_512.name()),
                on(HostKeyAlgorithm::RsaSha2_256.name()),
                on(HostKeyAlgorithm::SshRsa.name()),
            ],
            encryption: vec![
                on(CipherAlgorithm::Aes128Cbc.name()),
                on(CipherAlgorithm::Aes256Cbc.name()),
                off(CipherAlgorithm::None.name()),
            ],
            mac: vec![
                on(MacAlgorithm::HmacSha256.name()),
                on(MacAlgorithm::HmacSha1.name()),
                off(MacAlgorithm::None.name()),
            ],
            compression: vec![
                on(CompressionAlgorithm::None.name()),
                on(CompressionAlgorithm::Zlib.name()),
            ],
        }
    }
}

impl AlgorithmRegistry {
    /// Creates a registry with no entries.
    pub fn empty() -> Self {
        Self {
            kex: Vec::new(),
            host_key: Vec::new(),
            encryption: Vec::new(),
            mac: Vec::new(),
            compression: Vec::new(),
        }
    }

    fn entries(&self, category: Category) -> &Vec<AlgorithmEntry> {
        match category {
            Category::Kex => &self.kex,
            Category::HostKey => &self.host_key,
            Category::Encryption => &self.encryption,
            Category::Mac => &self.mac,
            Category::Compression => &self.compression,
        }
    }

    fn entries_mut(&mut self, category: Category) -> &mut Vec<AlgorithmEntry> {
        match category {
            Category::Kex => &mut self.kex,
            Category::HostKey => &mut self.host_key,
            Category::Encryption => &mut self.encryption,
            Category::Mac => &mut self.mac,
            Category::Compression => &mut self.compression,
        }
    }

    /// Appends an algorithm at the lowest priority, or updates its flags if present.
    ///
    /// # Errors
    ///
    /// Returns [`CsshError::Config`] if no implementation exists for `name`.
    pub fn register(
        &mut self,
        category: Category,
        name: &'static str,
        client_enabled: bool,
        server_enabled: bool,
    ) -> CsshResult<()> {
        if !category.knows(name) {
            return Err(CsshError::Config(format!(
                "No implementation for {:?} algorithm '{}'",
                category, name
            )));
        }
        let entries = self.entries_mut(category);
        match entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.client_enabled = client_enabled;
                entry.server_enabled = server_enabled;
            }
            None => entries.push(AlgorithmEntry {
                name,
                client_enabled,
                server_enabled,
            }),
        }
        Ok(())
    }

    /// Enables or disables a registered algorithm.
    pub fn set_enabled(
        &mut self,
        category: Category,
        name: &str,
        client_enabled: bool,
        server_enabled: bool,
    ) -> CsshResult<()> {
        let entry = self
            .entries_mut(category)
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| {
                CsshError::Config(format!("{:?} algorithm '{}' is not registered", category, name))
            })?;
        entry.client_enabled = client_enabled;
        entry.server_enabled = server_enabled;
        Ok(())
    }

    /// Returns the enabled names for one category and direction, in priority order.
    pub fn algorithms(&self, category: Category, direction: Direction) -> Vec<String> {
        self.entries(category)
            .iter()
            .filter(|e| e.enabled_for(category, direction))
            .map(|e| e.name.to_string())
            .collect()
    }

    /// Builds this server's KEXINIT (random cookie, `first_kex_packet_follows = false`).
    pub fn kex_init(&self) -> KexInit {
        use Direction::*;
        KexInit::builder()
            .kex(self.algorithms(Category::Kex, ClientToServer))
            .host_key(self.algorithms(Category::HostKey, ClientToServer))
            .encryption_directional(
                self.algorithms(Category::Encryption, ClientToServer),
                self.algorithms(Category::Encryption, ServerToClient),
            )
            .mac_directional(
                self.algorithms(Category::Mac, ClientToServer),
                self.algorithms(Category::Mac, ServerToClient),
            )
            .compression_directional(
                self.algorithms(Category::Compression, ClientToServer),
                self.algorithms(Category::Compression, ServerToClient),
            )
            .build()
    }

    /// Checks that every slot can be negotiated at all.
    pub fn validate(&self) -> CsshResult<()> {
        use Direction::*;
        for (category, label) in [
            (Category::Kex, "kex"),
            (Category::HostKey, "host key"),
            (Category::Encryption, "encryption"),
            (Category::Mac, "MAC"),
            (Category::Compression, "compression"),
        ] {
            for direction in [ClientToServer, ServerToClient] {
                if self.algorithms(category, direction).is_empty() {
                    return Err(CsshError::Config(format!(
                        "No {} algorithm enabled for {:?}",
                        label, direction
                    )));
                }
            }
        }
        Ok(())
    }

    /// Negotiates all eight slots against the client's KEXINIT.
    ///
    /// # Errors
    ///
    /// Returns [`CsshError::NoMatchingAlgorithm`] naming the first slot with no
    /// common algorithm.
    pub fn negotiate(&self, client: &KexInit) -> CsshResult<AlgorithmSet> {
        use Direction::*;
        let pick = |list: &[String], category, direction, label| {
            find_match(list, &self.algorithms(category, direction), label)
        };

        let kex = pick(client.kex_algorithms(), Category::Kex, ClientToServer, "kex")?;
        let host_key = pick(
            client.server_host_key_algorithms(),
            Category::HostKey,
            ClientToServer,
            "server_host_key",
        )?;
        let enc_c2s = pick(
            client.encryption_algorithms_client_to_server(),
            Category::Encryption,
            ClientToServer,
            "encryption_client_to_server",
        )?;
        let enc_s2c = pick(
            client.encryption_algorithms_server_to_client(),
            Category::Encryption,
            ServerToClient,
            "encryption_server_to_client",
        )?;
        let mac_c2s = pick(
            client.mac_algorithms_client_to_server(),
            Category::Mac,
            ClientToServer,
            "mac_client_to_server",
        )?;
        let mac_s2c = pick(
            client.mac_algorithms_server_to_client(),
            Category::Mac,
            ServerToClient,
            "mac_server_to_client",
        )?;
        let comp_c2s = pick(
            client.compression_algorithms_client_to_server(),
            Category::Compression,
            ClientToServer,
            "compression_client_to_server",
        )?;
        let comp_s2c = pick(
            client.compression_algorithms_server_to_client(),
            Category::Compression,
            ServerToClient,
            "compression_server_to_client",
        )?;

        // Registry entries are validated on insertion, so names always resolve.
        let unresolved = |category| CsshError::NoMatchingAlgorithm { category };
        Ok(AlgorithmSet {
            kex: KexAlgorithm::from_name(&kex).ok_or_else(|| unresolved("kex"))?,
            host_key: HostKeyAlgorithm::from_name(&host_key)
                .ok_or_else(|| unresolved("server_host_key"))?,
            encryption_client_to_server: CipherAlgorithm::from_name(&enc_c2s)
                .ok_or_else(|| unresolved("encryption_client_to_server"))?,
            encryption_server_to_client: CipherAlgorithm::from_name(&enc_s2c)
                .ok_or_else(|| unresolved("encryption_server_to_client"))?,
            mac_client_to_server: MacAlgorithm::from_name(&mac_c2s)
                .ok_or_else(|| unresolved("mac_client_to_server"))?,
            mac_server_to_client: MacAlgorithm::from_name(&mac_s2c)
                .ok_or_else(|| unresolved("mac_server_to_client"))?,
            compression_client_to_server: CompressionAlgorithm::from_name(&comp_c2s)
                .ok_or_else(|| unresolved("compression_client_to_server"))?,
            compression_server_to_client: CompressionAlgorithm::from_name(&comp_s2c)
                .ok_or_else(|| unresolved("compression_server_to_client"))?,
        })
    }
}

/// Returns the first name in `client_list` that also appears in `server_list`.
///
/// # Errors
///
/// Returns [`CsshError::NoMatchingAlgorithm`] tagged with `category` when the
/// lists share no name.
pub fn find_match(
    client_list: &[String],
    server_list: &[String],
    category: &'static str,
) -> CsshResult<String> {
    client_list
        .iter()
        .find(|name| server_list.contains(name))
        .cloned()
        .ok_or(CsshError::NoMatchingAlgorithm { category })
}

/// Result of one negotiation round: one algorithm per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmSet {
    /// Key exchange method
    pub kex: KexAlgorithm,
    /// Server host key algorithm
    pub host_key: HostKeyAlgorithm,
    /// Cipher, client to server
    pub encryption_client_to_server: CipherAlgorithm,
    /// Cipher, server to client
    pub encryption_server_to_client: CipherAlgorithm,
    /// MAC, client to server
    pub mac_client_to_server: MacAlgorithm,
    /// MAC, server to client
    pub mac_server_to_client: MacAlgorithm,
    /// Compression, client to server
    pub compression_client_to_server: CompressionAlgorithm,
    /// Compression, server to client
    pub compression_server_to_client: CompressionAlgorithm,
}
