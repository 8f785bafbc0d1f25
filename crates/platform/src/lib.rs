//! # cssh Platform
//!
//! Shared types for the cssh SSH server crates.
//!
//! This crate provides the unified error type (`CsshError`) and result alias
//! (`CsshResult`) used across the protocol engine.
//!
//! # Examples
//!
//! ```
//! use cssh_platform::{CsshError, CsshResult};
//!
//! fn parse_port(s: &str) -> CsshResult<u16> {
//!     s.parse()
//!         .map_err(|_| CsshError::Config(format!("invalid port: {}", s)))
//! }
//!
//! # fn main() -> CsshResult<()> {
//! assert_eq!(parse_port("2222")?, 2222);
//! assert!(parse_port("ssh").is_err());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;

pub use error::{CsshError, CsshResult};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
