//! SSH protocol message types (RFC 4253, RFC 4252, RFC 4254).
//!
//! This module defines message numbers, the transport-layer generic messages,
//! and [`Message`], the tagged union every decoded payload becomes.
//!
//! # Message Categories
//!
//! - **Transport Layer Generic** (1-19): Disconnect, ignore, debug, service request
//! - **Algorithm Negotiation** (20-29): Key exchange initialization
//! - **Key Exchange Method** (30-49): Method-specific messages
//! - **User Authentication Generic** (50-79): Authentication protocol
//! - **Connection Protocol Generic** (80-127): Global requests and channels
//!
//! # Example
//!
//! ```rust
//! use cssh_proto::ssh::message::{Message, MessageType, ServiceRequest};
//!
//! let payload = ServiceRequest::new("ssh-userauth").to_bytes();
//! assert_eq!(payload[0], MessageType::ServiceRequest as u8);
//!
//! match Message::decode(&payload).unwrap() {
//!     Message::ServiceRequest(req) => assert_eq!(req.service_name(), "ssh-userauth"),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use crate::ssh::auth::{AuthBanner, AuthFailure, AuthPasswdChangeReq, AuthRequest};
use crate::ssh::connection::{
    ChannelClose, ChannelData, ChannelEof, ChannelExtendedData, ChannelFailure, ChannelOpen,
    ChannelOpenConfirmation, ChannelOpenFailure, ChannelRequest, ChannelSuccess,
    ChannelWindowAdjust, GlobalRequest,
};
use crate::ssh::kex::{KexInit, KexdhInit, KexdhReply};
use crate::ssh::wire::{read_bool, read_string, read_u32, write_bool, write_string, write_u32};
use bytes::{BufMut, BytesMut};
use cssh_platform::{CsshError, CsshResult};

/// SSH message types.
///
/// Each message type has a unique numeric identifier used in the binary protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Transport layer generic (1-19)
    /// Disconnect message - terminates the connection.
    Disconnect = 1,
    /// Ignore message - can be used for padding or keep-alive.
    Ignore = 2,
    /// Unimplemented message - response to unknown message type.
    Unimplemented = 3,
    /// Debug message - debugging information.
    Debug = 4,
    /// Service request - request a service (e.g., "ssh-userauth").
    ServiceRequest = 5,
    /// Service accept - service request accepted.
    ServiceAccept = 6,

    // Algorithm negotiation (20-29)
    /// Key exchange init - algorithm negotiation.
    KexInit = 20,
    /// New keys - signals transition to new keys.
    NewKeys = 21,

    // Key exchange method specific (30-49)
    /// Diffie-Hellman key exchange init (client public value `e`).
    KexdhInit = 30,
    /// Diffie-Hellman key exchange reply (host key, `f`, signature).
    KexdhReply = 31,

    // User authentication generic (50-79)
    /// User authentication request.
    UserauthRequest = 50,
    /// User authentication failure.
    UserauthFailure = 51,
    /// User authentication success.
    UserauthSuccess = 52,
    /// User authentication banner.
    UserauthBanner = 53,
    /// Password change request (method-specific number 60 for "password").
    UserauthPasswdChangereq = 60,

    // Connection protocol generic (80-127)
    /// Global request.
    GlobalRequest = 80,
    /// Request success.
    RequestSuccess = 81,
    /// Request failure.
    RequestFailure = 82,
    /// Channel open.
    ChannelOpen = 90,
    /// Channel open confirmation.
    ChannelOpenConfirmation = 91,
    /// Channel open failure.
    ChannelOpenFailure = 92,
    /// Channel window adjust.
    ChannelWindowAdjust = 93,
    /// Channel data.
    ChannelData = 94,
    /// Channel extended data (stderr).
    ChannelExtendedData = 95,
    /// Channel EOF.
    ChannelEof = 96,
    /// Channel close.
    ChannelClose = 97,
    /// Channel request.
    ChannelRequest = 98,
    /// Channel success.
    ChannelSuccess = 99,
    /// Channel failure.
    ChannelFailure = 100,
}

impl MessageType {
    /// Converts a byte to a message type.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cssh_proto::ssh::message::MessageType;
    ///
    /// assert_eq!(MessageType::from_u8(20), Some(MessageType::KexInit));
    /// assert_eq!(MessageType::from_u8(255), None);
    /// ```
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageType::Disconnect),
            2 => Some(MessageType::Ignore),
            3 => Some(MessageType::Unimplemented),
            4 => Some(MessageType::Debug),
            5 => Some(MessageType::ServiceRequest),
            6 => Some(MessageType::ServiceAccept),
            20 => Some(MessageType::KexInit),
            21 => Some(MessageType::NewKeys),
            30 => Some(MessageType::KexdhInit),
            31 => Some(MessageType::KexdhReply),
            50 => Some(MessageType::UserauthRequest),
            51 => Some(MessageType::UserauthFailure),
            52 => Some(MessageType::UserauthSuccess),
            53 => Some(MessageType::UserauthBanner),
            60 => Some(MessageType::UserauthPasswdChangereq),
            80 => Some(MessageType::GlobalRequest),
            81 => Some(MessageType::RequestSuccess),
            82 => Some(MessageType::RequestFailure),
            90 => Some(MessageType::ChannelOpen),
            91 => Some(MessageType::ChannelOpenConfirmation),
            92 => Some(MessageType::ChannelOpenFailure),
            93 => Some(MessageType::ChannelWindowAdjust),
            94 => Some(MessageType::ChannelData),
            95 => Some(MessageType::ChannelExtendedData),
            96 => Some(MessageType::ChannelEof),
            97 => Some(MessageType::ChannelClose),
            98 => Some(MessageType::ChannelRequest),
            99 => Some(MessageType::ChannelSuccess),
            100 => Some(MessageType::ChannelFailure),
            _ => None,
        }
    }

    /// Returns the message type name.
    ///
    /// ```rust
    /// use cssh_proto::ssh::message::MessageType;
    ///
    /// assert_eq!(MessageType::KexInit.name(), "SSH_MSG_KEXINIT");
    /// ```
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Disconnect => "SSH_MSG_DISCONNECT",
            MessageType::Ignore => "SSH_MSG_IGNORE",
            MessageType::Unimplemented => "SSH_MSG_UNIMPLEMENTED",
            MessageType::Debug => "SSH_MSG_DEBUG",
            MessageType::ServiceRequest => "SSH_MSG_SERVICE_REQUEST",
            MessageType::ServiceAccept => "SSH_MSG_SERVICE_ACCEPT",
            MessageType::KexInit => "SSH_MSG_KEXINIT",
            MessageType::NewKeys => "SSH_MSG_NEWKEYS",
            MessageType::KexdhInit => "SSH_MSG_KEXDH_INIT",
            MessageType::KexdhReply => "SSH_MSG_KEXDH_REPLY",
            MessageType::UserauthRequest => "SSH_MSG_USERAUTH_REQUEST",
            MessageType::UserauthFailure => "SSH_MSG_USERAUTH_FAILURE",
            MessageType::UserauthSuccess => "SSH_MSG_USERAUTH_SUCCESS",
            MessageType::UserauthBanner => "SSH_MSG_USERAUTH_BANNER",
            MessageType::UserauthPasswdChangereq => "SSH_MSG_USERAUTH_PASSWD_CHANGEREQ",
            MessageType::GlobalRequest => "SSH_MSG_GLOBAL_REQUEST",
            MessageType::RequestSuccess => "SSH_MSG_REQUEST_SUCCESS",
            MessageType::RequestFailure => "SSH_MSG_REQUEST_FAILURE",
            MessageType::ChannelOpen => "SSH_MSG_CHANNEL_OPEN",
            MessageType::ChannelOpenConfirmation => "SSH_MSG_CHANNEL_OPEN_CONFIRMATION",
            MessageType::ChannelOpenFailure => "SSH_MSG_CHANNEL_OPEN_FAILURE",
            MessageType::ChannelWindowAdjust => "SSH_MSG_CHANNEL_WINDOW_ADJUST",
            MessageType::ChannelData => "SSH_MSG_CHANNEL_DATA",
            MessageType::ChannelExtendedData => "SSH_MSG_CHANNEL_EXTENDED_DATA",
            MessageType::ChannelEof => "SSH_MSG_CHANNEL_EOF",
            MessageType::ChannelClose => "SSH_MSG_CHANNEL_CLOSE",
            MessageType::ChannelRequest => "SSH_MSG_CHANNEL_REQUEST",
            MessageType::ChannelSuccess => "SSH_MSG_CHANNEL_SUCCESS",
            MessageType::ChannelFailure => "SSH_MSG_CHANNEL_FAILURE",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), *self as u8)
    }
}

/// Checks the leading message number and returns the offset of the first field.
pub(crate) fn expect_type(data: &[u8], expected: MessageType) -> CsshResult<usize> {
    match data.first() {
        None => Err(CsshError::Decode(format!("{} message is empty", expected.name()))),
        Some(&b) if b == expected as u8 => Ok(1),
        Some(&b) => Err(CsshError::Decode(format!(
            "Invalid message type: expected {}, got {}",
            expected, b
        ))),
    }
}

/// Starts a payload buffer with the message number.
pub(crate) fn start(msg_type: MessageType) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(msg_type as u8);
    buf
}

/// Disconnect reason codes (RFC 4253 Section 11.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DisconnectReason {
    /// Host not allowed to connect
    HostNotAllowedToConnect = 1,
    /// Protocol error
    ProtocolError = 2,
    /// Key exchange failed
    KeyExchangeFailed = 3,
    /// Reserved
    Reserved = 4,
    /// MAC error
    MacError = 5,
    /// Compression error
    CompressionError = 6,
    /// Service not available
    ServiceNotAvailable = 7,
    /// Protocol version not supported
    ProtocolVersionNotSupported = 8,
    /// Host key not verifiable
    HostKeyNotVerifiable = 9,
    /// Connection lost
    ConnectionLost = 10,
    /// Disconnected by application
    ByApplication = 11,
    /// Too many connections
    TooManyConnections = 12,
    /// Authentication cancelled by user
    AuthCancelledByUser = 13,
    /// No more authentication methods available
    NoMoreAuthMethodsAvailable = 14,
    /// Illegal user name
    IllegalUserName = 15,
}

impl DisconnectReason {
    /// Converts a reason code to the enum, if known.
    pub fn from_u32(value: u32) -> Option<Self> {
        use DisconnectReason::*;
        Some(match value {
            1 => HostNotAllowedToConnect,
            2 => ProtocolError,
            3 => KeyExchangeFailed,
            4 => Reserved,
            5 => MacError,
            6 => CompressionError,
            7 => ServiceNotAvailable,
            8 => ProtocolVersionNotSupported,
            9 => HostKeyNotVerifiable,
            10 => ConnectionLost,
            11 => ByApplication,
            12 => TooManyConnections,
            13 => AuthCancelledByUser,
            14 => NoMoreAuthMethodsAvailable,
            15 => IllegalUserName,
            _ => return None,
        })
    }

    /// Picks the reason code sent when the session ends because of `err`.
    pub fn for_error(err: &CsshError) -> Self {
        match err {
            CsshError::NoMatchingAlgorithm { .. } | CsshError::Security(_) => {
                DisconnectReason::KeyExchangeFailed
            }
            CsshError::MacVerification { .. } => DisconnectReason::MacError,
            CsshError::Compression(_) => DisconnectReason::CompressionError,
            CsshError::Disconnected { reason, .. } => {
                DisconnectReason::from_u32(*reason).unwrap_or(DisconnectReason::ProtocolError)
            }
            CsshError::Io(_) => DisconnectReason::ConnectionLost,
            _ => DisconnectReason::ProtocolError,
        }
    }
}

/// SSH_MSG_DISCONNECT (RFC 4253 Section 11.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    reason_code: u32,
    description: String,
    language_tag: String,
}

impl Disconnect {
    /// Creates a disconnect message with an empty language tag.
    pub fn new(reason: DisconnectReason, description: impl Into<String>) -> Self {
        Self {
            reason_code: reason as u32,
            description: description.into(),
            language_tag: String::new(),
        }
    }

    /// Returns the raw reason code.
    pub fn reason_code(&self) -> u32 {
        self.reason_code
    }

    /// Returns the description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::Disconnect);
        write_u32(&mut buf, self.reason_code);
        write_string(&mut buf, &self.description);
        write_string(&mut buf, &self.language_tag);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::Disconnect)?;
        Ok(Self {
            reason_code: read_u32(data, &mut offset)?,
            description: read_string(data, &mut offset)?,
            language_tag: read_string(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_IGNORE (RFC 4253 Section 11.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ignore {
    data: Vec<u8>,
}

impl Ignore {
    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::Ignore)?;
        Ok(Self {
            data: crate::ssh::wire::read_bytes(data, &mut offset)?,
        })
    }

    /// Returns the ignored data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// SSH_MSG_UNIMPLEMENTED (RFC 4253 Section 11.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unimplemented {
    sequence_number: u32,
}

impl Unimplemented {
    /// Creates a reply for the rejected packet's sequence number.
    pub fn new(sequence_number: u32) -> Self {
        Self { sequence_number }
    }

    /// Returns the sequence number of the rejected packet.
    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::Unimplemented);
        write_u32(&mut buf, self.sequence_number);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::Unimplemented)?;
        Ok(Self {
            sequence_number: read_u32(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_DEBUG (RFC 4253 Section 11.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugMessage {
    always_display: bool,
    message: String,
    language_tag: String,
}

impl DebugMessage {
    /// Returns the debug text.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns whether the sender asked for the message to be displayed.
    pub fn always_display(&self) -> bool {
        self.always_display
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::Debug);
        write_bool(&mut buf, self.always_display);
        write_string(&mut buf, &self.message);
        write_string(&mut buf, &self.language_tag);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::Debug)?;
        Ok(Self {
            always_display: read_bool(data, &mut offset)?,
            message: read_string(data, &mut offset)?,
            language_tag: read_string(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_SERVICE_REQUEST (RFC 4253 Section 10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    service_name: String,
}

impl ServiceRequest {
    /// Creates a service request.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Returns the requested service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::ServiceRequest);
        write_string(&mut buf, &self.service_name);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::ServiceRequest)?;
        Ok(Self {
            service_name: read_string(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_SERVICE_ACCEPT (RFC 4253 Section 10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccept {
    service_name: String,
}

impl ServiceAccept {
    /// Creates a service accept.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Returns the accepted service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::ServiceAccept);
        write_string(&mut buf, &self.service_name);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::ServiceAccept)?;
        Ok(Self {
            service_name: read_string(data, &mut offset)?,
        })
    }
}

/// A decoded SSH message.
///
/// One variant per message number; variants whose layout depends on an inner
/// tag (user-auth method, channel type, channel request type) carry their own
/// tagged sub-enums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// SSH_MSG_DISCONNECT
    Disconnect(Disconnect),
    /// SSH_MSG_IGNORE
    Ignore(Ignore),
    /// SSH_MSG_UNIMPLEMENTED
    Unimplemented(Unimplemented),
    /// SSH_MSG_DEBUG
    Debug(DebugMessage),
    /// SSH_MSG_SERVICE_REQUEST
    ServiceRequest(ServiceRequest),
    /// SSH_MSG_SERVICE_ACCEPT
    ServiceAccept(ServiceAccept),
    /// SSH_MSG_KEXINIT
    KexInit(KexInit),
    /// SSH_MSG_NEWKEYS
    NewKeys,
    /// SSH_MSG_KEXDH_INIT
    KexdhInit(KexdhInit),
    /// SSH_MSG_KEXDH_REPLY
    KexdhReply(KexdhReply),
    /// SSH_MSG_USERAUTH_REQUEST
    UserauthRequest(AuthRequest),
    /// SSH_MSG_USERAUTH_FAILURE
    UserauthFailure(AuthFailure),
    /// SSH_MSG_USERAUTH_SUCCESS
    UserauthSuccess,
    /// SSH_MSG_USERAUTH_BANNER
    UserauthBanner(AuthBanner),
    /// SSH_MSG_USERAUTH_PASSWD_CHANGEREQ
    UserauthPasswdChangereq(AuthPasswdChangeReq),
    /// SSH_MSG_GLOBAL_REQUEST
    GlobalRequest(GlobalRequest),
    /// SSH_MSG_REQUEST_SUCCESS (response-specific data kept raw)
    RequestSuccess(Vec<u8>),
    /// SSH_MSG_REQUEST_FAILURE
    RequestFailure,
    /// SSH_MSG_CHANNEL_OPEN
    ChannelOpen(ChannelOpen),
    /// SSH_MSG_CHANNEL_OPEN_CONFIRMATION
    ChannelOpenConfirmation(ChannelOpenConfirmation),
    /// SSH_MSG_CHANNEL_OPEN_FAILURE
    ChannelOpenFailure(ChannelOpenFailure),
    /// SSH_MSG_CHANNEL_WINDOW_ADJUST
    ChannelWindowAdjust(ChannelWindowAdjust),
    /// SSH_MSG_CHANNEL_DATA
    ChannelData(ChannelData),
    /// SSH_MSG_CHANNEL_EXTENDED_DATA
    ChannelExtendedData(ChannelExtendedData),
    /// SSH_MSG_CHANNEL_EOF
    ChannelEof(ChannelEof),
    /// SSH_MSG_CHANNEL_CLOSE
    ChannelClose(ChannelClose),
    /// SSH_MSG_CHANNEL_REQUEST
    ChannelRequest(ChannelRequest),
    /// SSH_MSG_CHANNEL_SUCCESS
    ChannelSuccess(ChannelSuccess),
    /// SSH_MSG_CHANNEL_FAILURE
    ChannelFailure(ChannelFailure),
}

impl Message {
    /// Decodes a packet payload.
    ///
    /// # Errors
    ///
    /// - [`CsshError::UnknownMessage`] for a message number with no decoder
    /// - [`CsshError::Decode`] for a truncated or malformed body
    pub fn decode(payload: &[u8]) -> CsshResult<Self> {
        let number = *payload
            .first()
            .ok_or_else(|| CsshError::Decode("Empty payload".to_string()))?;
        let msg_type = MessageType::from_u8(number).ok_or(CsshError::UnknownMessage(number))?;

        Ok(match msg_type {
            MessageType::Disconnect => Message::Disconnect(Disconnect::from_bytes(payload)?),
            MessageType::Ignore => Message::Ignore(Ignore::from_bytes(payload)?),
            MessageType::Unimplemented => {
                Message::Unimplemented(Unimplemented::from_bytes(payload)?)
            }
            MessageType::Debug => Message::Debug(DebugMessage::from_bytes(payload)?),
            MessageType::ServiceRequest => {
                Message::ServiceRequest(ServiceRequest::from_bytes(payload)?)
            }
            MessageType::ServiceAccept => {
                Message::ServiceAccept(ServiceAccept::from_bytes(payload)?)
            }
            MessageType::KexInit => Message::KexInit(KexInit::from_bytes(payload)?),
            MessageType::NewKeys => Message::NewKeys,
            MessageType::KexdhInit => Message::KexdhInit(KexdhInit::from_bytes(payload)?),
            MessageType::KexdhReply => Message::KexdhReply(KexdhReply::from_bytes(payload)?),
            MessageType::UserauthRequest => {
                Message::UserauthRequest(AuthRequest::from_bytes(payload)?)
            }
            MessageType::UserauthFailure => {
                Message::UserauthFailure(AuthFailure::from_bytes(payload)?)
            }
            MessageType::UserauthSuccess => Message::UserauthSuccess,
            MessageType::UserauthBanner => {
                Message::UserauthBanner(AuthBanner::from_bytes(payload)?)
            }
            MessageType::UserauthPasswdChangereq => {
                Message::UserauthPasswdChangereq(AuthPasswdChangeReq::from_bytes(payload)?)
            }
            MessageType::GlobalRequest => {
                Message::GlobalRequest(GlobalRequest::from_bytes(payload)?)
            }
            MessageType::RequestSuccess => Message::RequestSuccess(payload[1..].to_vec()),
            MessageType::RequestFailure => Message::RequestFailure,
            MessageType::ChannelOpen => Message::ChannelOpen(ChannelOpen::from_bytes(payload)?),
            MessageType::ChannelOpenConfirmation => {
                Message::ChannelOpenConfirmation(ChannelOpenConfirmation::from_bytes(payload)?)
            }
            MessageType::ChannelOpenFailure => {
                Message::ChannelOpenFailure(ChannelOpenFailure::from_bytes(payload)?)
            }
            MessageType::ChannelWindowAdjust => {
                Message::ChannelWindowAdjust(ChannelWindowAdjust::from_bytes(payload)?)
            }
            MessageType::ChannelData => Message::ChannelData(ChannelData::from_bytes(payload)?),
            MessageType::ChannelExtendedData => {
                Message::ChannelExtendedData(ChannelExtendedData::from_bytes(payload)?)
            }
            MessageType::ChannelEof => Message::ChannelEof(ChannelEof::from_bytes(payload)?),
            MessageType::ChannelClose => Message::ChannelClose(ChannelClose::from_bytes(payload)?),
            MessageType::ChannelRequest => {
                Message::ChannelRequest(ChannelRequest::from_bytes(payload)?)
            }
            MessageType::ChannelSuccess => {
                Message::ChannelSuccess(ChannelSuccess::from_bytes(payload)?)
            }
            MessageType::ChannelFailure => {
                Message::ChannelFailure(ChannelFailure::from_bytes(payload)?)
            }
        })
    }

    /// Encodes the message into a packet payload.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::Disconnect(m) => m.to_bytes(),
            Message::Ignore(m) => {
                let mut buf = start(MessageType::Ignore);
                crate::ssh::wire::write_bytes(&mut buf, m.data());
                buf.to_vec()
            }
            Message::Unimplemented(m) => m.to_bytes(),
            Message::Debug(m) => m.to_bytes(),
            Message::ServiceRequest(m) => m.to_bytes(),
            Message::ServiceAccept(m) => m.to_bytes(),
            Message::KexInit(m) => m.to_bytes(),
            Message::NewKeys => vec![MessageType::NewKeys as u8],
            Message::KexdhInit(m) => m.to_bytes(),
            Message::KexdhReply(m) => m.to_bytes(),
            Message::UserauthRequest(m) => m.to_bytes(),
            Message::UserauthFailure(m) => m.to_bytes(),
            Message::UserauthSuccess => vec![MessageType::UserauthSuccess as u8],
            Message::UserauthBanner(m) => m.to_bytes(),
            Message::UserauthPasswdChangereq(m) => m.to_bytes(),
            Message::GlobalRequest(m) => m.to_bytes(),
            Message::RequestSuccess(data) => {
                let mut out = vec![MessageType::RequestSuccess as u8];
                out.extend_from_slice(data);
                out
            }
            Message::RequestFailure => vec![MessageType::RequestFailure as u8],
            Message::ChannelOpen(m) => m.to_bytes(),
            Message::ChannelOpenConfirmation(m) => m.to_bytes(),
            Message::ChannelOpenFailure(m) => m.to_bytes(),
            Message::ChannelWindowAdjust(m) => m.to_bytes(),
            Message::ChannelData(m) => m.to_bytes(),
            Message::ChannelExtendedData(m) => m.to_bytes(),
            Message::ChannelEof(m) => m.to_bytes(),
            Message::ChannelClose(m) => m.to_bytes(),
            Message::ChannelRequest(m) => m.to_bytes(),
            Message::ChannelSuccess(m) => m.to_bytes(),
            Message::ChannelFailure(m) => m.to_bytes(),
        }
    }

    /// Returns the message number of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Disconnect(_) => MessageType::Disconnect,
            Message::Ignore(_) => MessageType::Ignore,
            Message::Unimplemented(_) => MessageType::Unimplemented,
            Message::Debug(_) => MessageType::Debug,
            Message::ServiceRequest(_) => MessageType::ServiceRequest,
            Message::ServiceAccept(_) => MessageType::ServiceAccept,
            Message::KexInit(_) => MessageType::KexInit,
            Message::NewKeys => MessageType::NewKeys,
            Message::KexdhInit(_) => MessageType::KexdhInit,
            Message::KexdhReply(_) => MessageType::KexdhReply,
            Message::UserauthRequest(_) => MessageType::UserauthRequest,
            Message::UserauthFailure(_) => MessageType::UserauthFailure,
            Message::UserauthSuccess => MessageType::UserauthSuccess,
            Message::UserauthBanner(_) => MessageType::UserauthBanner,
            Message::UserauthPasswdChangereq(_) => MessageType::UserauthPasswdChangereq,
            Message::GlobalRequest(_) => MessageType::GlobalRequest,
            Message::RequestSuccess(_) => MessageType::RequestSuccess,
            Message::RequestFailure => MessageType::RequestFailure,
            Message::ChannelOpen(_) => MessageType::ChannelOpen,
            Message::ChannelOpenConfirmation(_) => MessageType::ChannelOpenConfirmation,
            Message::ChannelOpenFailure(_) => MessageType::ChannelOpenFailure,
            Message::ChannelWindowAdjust(_) => MessageType::ChannelWindowAdjust,
            Message::ChannelData(_) => MessageType::ChannelData,
            Message::ChannelExtendedData(_) => MessageType::ChannelExtendedData,
            Message::ChannelEof(_) => MessageType::ChannelEof,
            Message::ChannelClose(_) => MessageType::ChannelClose,
            Message::ChannelRequest(_) => MessageType::ChannelRequest,
            Message::ChannelSuccess(_) => MessageType::ChannelSuccess,
            Message::ChannelFailure(_) => MessageType::ChannelFailure,
        }
    }
}
