//! Error types for cssh

use std::fmt;

/// Unified error type for all cssh operations
#[derive(Debug)]
pub enum CsshError {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Protocol error (peer sent something out of sequence or semantically invalid)
    Protocol(String),

    /// Security error (key handling, signing, etc.)
    Security(String),

    /// Malformed wire bytes
    Decode(String),

    /// Message number with no registered decoder
    UnknownMessage(u8),

    /// Algorithm negotiation failed for one category
    NoMatchingAlgorithm {
        /// Negotiated slot, e.g. `encryption_client_to_server`
        category: &'static str,
    },

    /// Incoming packet failed integrity verification
    MacVerification {
        /// Incoming sequence number of the rejected packet
        sequence: u32,
    },

    /// Compression or decompression failed
    Compression(String),

    /// Channel-count ceiling reached
    ChannelLimitExceeded,

    /// Channel type other than `session`
    UnsupportedChannelType(String),

    /// Channel request type not handled
    UnsupportedRequestType(String),

    /// Authentication request refused
    AuthenticationRejected(String),

    /// Connection closed with SSH_MSG_DISCONNECT (sent or received)
    Disconnected {
        /// Reason code (RFC 4253 Section 11.1)
        reason: u32,
        /// Human-readable description
        description: String,
    },

    /// Other error
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl CsshError {
    /// Returns true if the session can keep running after this error.
    ///
    /// Non-fatal errors are answered with a protocol-level reply instead of a disconnect.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CsshError::UnknownMessage(_)
                | CsshError::ChannelLimitExceeded
                | CsshError::UnsupportedChannelType(_)
                | CsshError::UnsupportedRequestType(_)
                | CsshError::AuthenticationRejected(_)
        )
    }
}

impl fmt::Display for CsshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsshError::Io(e) => write!(f, "IO error: {}", e),
            CsshError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CsshError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            CsshError::Security(msg) => write!(f, "Security error: {}", msg),
            CsshError::Decode(msg) => write!(f, "Decode error: {}", msg),
            CsshError::UnknownMessage(n) => write!(f, "Unknown message number: {}", n),
            CsshError::NoMatchingAlgorithm { category } => {
                write!(f, "No matching algorithm for {}", category)
            }
            CsshError::MacVerification { sequence } => {
                write!(f, "MAC verification failed for packet {}", sequence)
            }
            CsshError::Compression(msg) => write!(f, "Compression error: {}", msg),
            CsshError::ChannelLimitExceeded => write!(f, "Channel limit exceeded"),
            CsshError::UnsupportedChannelType(t) => write!(f, "Unsupported channel type: {}", t),
            CsshError::UnsupportedRequestType(t) => write!(f, "Unsupported request type: {}", t),
            CsshError::AuthenticationRejected(msg) => {
                write!(f, "Authentication rejected: {}", msg)
            }
            CsshError::Disconnected {
                reason,
                description,
            } => write!(f, "Disconnected (reason {}): {}", reason, description),
            CsshError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for CsshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CsshError::Io(e) => Some(e),
            CsshError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CsshError {
    fn from(err: std::io::Error) -> Self {
        CsshError::Io(err)
    }
}

/// Result type for cssh operations
pub type CsshResult<T> = Result<T, CsshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CsshError::Config("Invalid configuration".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid configuration"
        );

        let err = CsshError::NoMatchingAlgorithm {
            category: "kex_algorithms",
        };
        assert_eq!(err.to_string(), "No matching algorithm for kex_algorithms");

        let err = CsshError::MacVerification { sequence: 7 };
        assert_eq!(err.to_string(), "MAC verification failed for packet 7");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let cssh_err: CsshError = io_err.into();
        assert!(matches!(cssh_err, CsshError::Io(_)));
        assert!(std::error::Error::source(&cssh_err).is_some());
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(CsshError::ChannelLimitExceeded.is_recoverable());
        assert!(CsshError::UnknownMessage(200).is_recoverable());
        assert!(CsshError::UnsupportedChannelType("x11".into()).is_recoverable());
        assert!(CsshError::AuthenticationRejected("password for alice".into()).is_recoverable());
        assert!(!CsshError::Decode("short".into()).is_recoverable());
        assert!(!CsshError::MacVerification { sequence: 3 }.is_recoverable());
        assert!(!CsshError::NoMatchingAlgorithm { category: "mac" }.is_recoverable());
    }

    #[test]
    fn test_result_type() {
        fn example() -> CsshResult<i32> {
            Ok(42)
        }

        assert_eq!(example().unwrap(), 42);
    }
}
