//! SSH protocol version exchange (RFC 4253 Section 4.2).
//!
//! Both sides send an identification string:
//!
//! ```text
//! SSH-protoversion-softwareversion SP comments CR LF
//! ```
//!
//! The server may send other lines first (a banner). Lines the client sends
//! before its `SSH-` line are skipped.
//!
//! # Security
//!
//! - Maximum line length: 255 characters including CR LF
//! - Must be "SSH-2.0-" or "SSH-1.99-"
//! - No null bytes allowed
//!
//! # Example
//!
//! ```rust
//! use cssh_proto::ssh::version::Version;
//!
//! let version = Version::new("CustomSSH_0.1.0", Some("Custom SSH server"));
//! assert_eq!(version.to_string(), "SSH-2.0-CustomSSH_0.1.0 Custom SSH server");
//!
//! let parsed = Version::parse("SSH-2.0-OpenSSH_8.9\r\n").unwrap();
//! assert_eq!(parsed.software(), "OpenSSH_8.9");
//! ```

use crate::ssh::message::DisconnectReason;
use crate::ssh::transport::{PacketReader, PacketSender};
use cssh_platform::{CsshError, CsshResult};
use tracing::{debug, info};

/// Maximum length of an identification line, CR LF included.
pub const MAX_VERSION_LENGTH: usize = 255;

/// Longest non-identification line accepted before the client's `SSH-` line.
const MAX_BANNER_LINE: usize = 8192;

/// How many non-identification lines may precede the client's `SSH-` line.
const MAX_BANNER_LINES: usize = 64;

/// SSH identification string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    proto_version: String,
    software_version: String,
    comments: Option<String>,
    /// Exact line without CR LF, as hashed into H.
    line: String,
}

impl Version {
    /// Creates an SSH-2.0 identification.
    pub fn new(software: &str, comments: Option<&str>) -> Self {
        let line = match comments {
            Some(c) => format!("SSH-2.0-{} {}", software, c),
            None => format!("SSH-2.0-{}", software),
        };
        Self {
            proto_version: "2.0".to_string(),
            software_version: software.to_string(),
            comments: comments.map(String::from),
            line,
        }
    }

    /// Parses an identification line (with or without CR LF).
    ///
    /// # Errors
    ///
    /// Returns [`CsshError::Disconnected`] with reason
    /// PROTOCOL_VERSION_NOT_SUPPORTED if the line is too long, contains NUL,
    /// is not `SSH-` prefixed or names a protocol other than 2.0 / 1.99.
    pub fn parse(line: &str) -> CsshResult<Self> {
        if line.len() > MAX_VERSION_LENGTH {
            return Err(unsupported(format!(
                "Version string too long: {} bytes (max {})",
                line.len(),
                MAX_VERSION_LENGTH
            )));
        }

        let line = line.trim_end_matches('\n').trim_end_matches('\r');

        if line.contains('\0') {
            return Err(unsupported("Version string contains null byte".to_string()));
        }
        let Some(rest) = line.strip_prefix("SSH-") else {
            return Err(unsupported(format!(
                "Invalid version string: must start with 'SSH-', got '{}'",
                line
            )));
        };
        let Some((proto_version, rest)) = rest.split_once('-') else {
            return Err(unsupported(format!("Invalid version string format: '{}'", line)));
        };
        if proto_version != "2.0" && proto_version != "1.99" {
            return Err(unsupported(format!(
                "Unsupported protocol version: '{}' (expected '2.0' or '1.99')",
                proto_version
            )));
        }

        let (software_version, comments) = match rest.split_once(' ') {
            Some((software, comments)) => (software.to_string(), Some(comments.to_string())),
            None => (rest.to_string(), None),
        };

        Ok(Self {
            proto_version: proto_version.to_string(),
            software_version,
            comments,
            line: line.to_string(),
        })
    }

    /// Returns the protocol version (e.g., "2.0").
    pub fn proto_version(&self) -> &str {
        &self.proto_version
    }

    /// Returns the software version.
    pub fn software(&self) -> &str {
        &self.software_version
    }

    /// Returns the comments, if any.
    pub fn comments(&self) -> Option<&str> {
        self.comments.as_deref()
    }

    /// The identification line without CR LF.
    pub fn as_str(&self) -> &str {
        &self.line
    }

    /// Converts to wire format (with CR LF).
    pub fn to_wire_format(&self) -> Vec<u8> {
        format!("{}\r\n", self.line).into_bytes()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.line)
    }
}

fn unsupported(description: String) -> CsshError {
    CsshError::Disconnected {
        reason: DisconnectReason::ProtocolVersionNotSupported as u32,
        description,
    }
}

/// Sends `banner_lines` and our identification, then reads the client's.
///
/// Returns the client identification; lines before it are skipped.
pub async fn exchange(
    reader: &mut PacketReader,
    sender: &PacketSender,
    banner_lines: &[String],
    ours: &Version,
) -> CsshResult<Version> {
    let mut out = Vec::new();
    for line in banner_lines {
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(&ours.to_wire_format());
    sender.write_raw(&out).await?;

    for _ in 0..=MAX_BANNER_LINES {
        let raw = reader.read_line(MAX_BANNER_LINE).await?;
        if !raw.starts_with(b"SSH-") {
            debug!(len = raw.len(), "skipping pre-identification line");
            continue;
        }
        let text = String::from_utf8(raw)
            .map_err(|_| unsupported("Version string is not valid UTF-8".to_string()))?;
        let client = Version::parse(&text)?;
        info!(client = %client, "client identification received");
        return Ok(client);
    }

    Err(unsupported(format!(
        "No identification string within {} lines",
        MAX_BANNER_LINES
    )))
}
