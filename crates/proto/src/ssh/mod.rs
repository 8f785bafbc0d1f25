//! SSH-2 server protocol engine.
//!
//! # Architecture
//!
//! The implementation is layered:
//!
//! 1. **Wire layer** ([`wire`], [`message`]) - primitive encodings and the message registry
//! 2. **Packet layer** ([`packet`], [`transport`]) - binary packet protocol, sequence numbers,
//!    cipher, MAC and compression (RFC 4253 Section 6)
//! 3. **Key exchange** ([`kex`], [`kex_dh`], [`algorithms`], [`hostkey`]) - negotiation,
//!    finite-field Diffie-Hellman, exchange hash and key schedule (RFC 4253 Sections 7-8)
//! 4. **Authentication** ([`auth`]) - user authentication protocol (RFC 4252)
//! 5. **Connection** ([`connection`], [`channel`], [`pty`]) - channels and requests (RFC 4254)
//! 6. **Server** ([`session`], [`server`]) - per-connection driver and accept loop
//!
//! # Security Considerations
//!
//! - **Input Validation**: every read is bounds-checked; packets above 35000 bytes are refused
//! - **Integrity**: a MAC mismatch ends the connection with DISCONNECT(MAC_ERROR)
//! - **Constant-Time Operations**: MAC tags and passwords are compared in constant time
//! - **Memory Safety**: DH exponents and derived keys are zeroized on drop
//! - **No Unsafe Code**: Pure Rust implementation without `unsafe`
//!
//! # Example
//!
//! ```rust
//! use cssh_proto::ssh::Packet;
//!
//! let packet = Packet::new(b"\x02ignore me".to_vec(), 16).unwrap();
//! let bytes = packet.to_bytes();
//! assert_eq!(bytes.len() % 16, 0);
//!
//! let parsed = Packet::from_bytes(&bytes).unwrap();
//! assert_eq!(parsed.payload(), b"\x02ignore me");
//! ```
//!
//! # References
//!
//! - [RFC 4251](https://datatracker.ietf.org/doc/html/rfc4251) - SSH Protocol Architecture
//! - [RFC 4252](https://datatracker.ietf.org/doc/html/rfc4252) - SSH Authentication Protocol
//! - [RFC 4253](https://datatracker.ietf.org/doc/html/rfc4253) - SSH Transport Layer Protocol
//! - [RFC 4254](https://datatracker.ietf.org/doc/html/rfc4254) - SSH Connection Protocol
//! - [RFC 8332](https://datatracker.ietf.org/doc/html/rfc8332) - RSA keys with SHA-256/512

pub mod algorithms;
pub mod auth;
pub mod channel;
pub mod compression;
pub mod connection;
pub mod crypto;
pub mod hostkey;
pub mod kex;
pub mod kex_dh;
pub mod message;
pub mod packet;
pub mod pty;
pub mod server;
pub mod session;
pub mod transport;
pub mod version;
pub mod wire;

// Re-export main types
pub use algorithms::{find_match, AlgorithmRegistry, AlgorithmSet, Category, Direction};
pub use auth::{
    AuthDecision, AuthMethod, AuthPolicy, AuthRequest, AuthSettings, Authenticator, PasswordTable,
};
pub use channel::{
    ChannelApp, ChannelAppFactory, ChannelCounter, ChannelHandle, ChannelLimits,
    ChannelMultiplexer, ChannelState,
};
pub use compression::CompressionAlgorithm;
pub use connection::{
    ChannelClose, ChannelData, ChannelEof, ChannelExtendedData, ChannelFailure, ChannelOpen,
    ChannelOpenConfirmation, ChannelOpenFailure, ChannelOpenFailureReason, ChannelRequest,
    ChannelRequestType, ChannelSuccess, ChannelType, ChannelWindowAdjust, GlobalRequest,
};
pub use crypto::{CipherAlgorithm, MacAlgorithm};
pub use hostkey::{HostKey, HostKeyAlgorithm, RsaHostKey};
pub use kex::{KexInit, KexdhInit, KexdhReply, NewKeys};
pub use kex_dh::{derive_key, KexAlgorithm, KeyExchangeEngine};
pub use message::{DisconnectReason, Message, MessageType};
pub use packet::Packet;
pub use pty::{PseudoTerminalConfig, TerminalModes, WindowSize};
pub use server::{SshServer, SshServerConfig};
pub use session::{SessionContext, SessionController, SessionEnd};
pub use transport::{PacketReader, PacketSender};
pub use version::Version;
