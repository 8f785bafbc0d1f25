//! SSH-2 server protocol engine for the cssh project.
//!
//! This crate implements the server side of the Secure Shell protocol:
//!
//! - **Transport** (RFC 4253) - identification exchange, binary packets,
//!   Diffie-Hellman key exchange, AES-CBC, HMAC and zlib
//! - **Authentication** (RFC 4252) - `none` and `password` behind a pluggable policy
//! - **Connection** (RFC 4254) - session channels, pty and shell requests
//!
//! # Features
//!
//! - `ssh` (default) - the SSH protocol engine
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
//!
//! # Security
//!
//! - All cryptographic primitives come from the RustCrypto crates
//! - Constant-time comparison of MAC tags and passwords
//! - Secret material is zeroized with `zeroize`
//! - The packet and message decoders are fuzzed
//!
//! # References
//!
//! - [RFC 4251](https://datatracker.ietf.org/doc/html/rfc4251) - SSH Protocol Architecture
//! - [RFC 4252](https://datatracker.ietf.org/doc/html/rfc4252) - SSH Authentication Protocol
//! - [RFC 4253](https://datatracker.ietf.org/doc/html/rfc4253) - SSH Transport Layer Protocol
//! - [RFC 4254](https://datatracker.ietf.org/doc/html/rfc4254) - SSH Connection Protocol

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "ssh")]
pub mod ssh;
