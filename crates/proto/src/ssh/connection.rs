//! SSH connection protocol messages (RFC 4254).
//!
//! - Global requests (RFC 4254 Section 4)
//! - Channel open / confirmation / failure (Section 5.1)
//! - Data transfer and window adjustment (Sections 5.2, 5.3)
//! - EOF and close (Section 5.3)
//! - Channel requests (Sections 6.2 - 6.10)
//!
//! Messages whose layout depends on a tag (`channel type`, `request type`)
//! carry a tagged enum with exactly the fields each tag defines.
//!
//! # Example
//!
//! ```rust
//! use cssh_proto::ssh::connection::{ChannelOpen, ChannelType};
//!
//! let open = ChannelOpen::new(ChannelType::Session, 0, 1_048_576, 32_768);
//! let parsed = ChannelOpen::from_bytes(&open.to_bytes()).unwrap();
//! assert_eq!(parsed.channel_type(), &ChannelType::Session);
//! ```

use crate::ssh::message::{expect_type, start, MessageType};
use crate::ssh::wire::{
    read_bool, read_bytes, read_string, read_u32, write_bool, write_bytes, write_string,
    write_u32,
};
use cssh_platform::CsshResult;

/// Channel type carried by SSH_MSG_CHANNEL_OPEN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelType {
    /// Session channel (interactive shell, exec, subsystem).
    Session,
    /// X11 forwarding channel.
    X11 {
        /// Originator IP address
        originator_address: String,
        /// Originator port
        originator_port: u32,
    },
    /// Forwarded TCP/IP channel (reverse port forwarding).
    ForwardedTcpip {
        /// Address that was connected
        connected_address: String,
        /// Port that was connected
        connected_port: u32,
        /// Originator IP address
        originator_address: String,
        /// Originator port
        originator_port: u32,
    },
    /// Direct TCP/IP channel (local port forwarding).
    DirectTcpip {
        /// Host to connect to
        host: String,
        /// Port to connect to
        port: u32,
        /// Originator IP address
        originator_address: String,
        /// Originator port
        originator_port: u32,
    },
    /// Any other channel type; type-specific data is kept raw.
    Other {
        /// Channel type name
        name: String,
        /// Remaining bytes after the common header
        data: Vec<u8>,
    },
}

impl ChannelType {
    /// Returns the channel type name.
    pub fn name(&self) -> &str {
        match self {
            ChannelType::Session => "session",
            ChannelType::X11 { .. } => "x11",
            ChannelType::ForwardedTcpip { .. } => "forwarded-tcpip",
            ChannelType::DirectTcpip { .. } => "direct-tcpip",
            ChannelType::Other { name, .. } => name,
        }
    }
}

/// SSH_MSG_CHANNEL_OPEN message (RFC 4254 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpen {
    channel_type: ChannelType,
    sender_channel: u32,
    initial_window_size: u32,
    maximum_packet_size: u32,
}

impl ChannelOpen {
    /// Creates a new channel open request.
    pub fn new(
        channel_type: ChannelType,
        sender_channel: u32,
        initial_window_size: u32,
        maximum_packet_size: u32,
    ) -> Self {
        Self {
            channel_type,
            sender_channel,
            initial_window_size,
            maximum_packet_size,
        }
    }

    /// Returns the channel type.
    pub fn channel_type(&self) -> &ChannelType {
        &self.channel_type
    }

    /// Returns the sender's channel number.
    pub fn sender_channel(&self) -> u32 {
        self.sender_channel
    }

    /// Returns the sender's initial window size.
    pub fn initial_window_size(&self) -> u32 {
        self.initial_window_size
    }

    /// Returns the sender's maximum packet size.
    pub fn maximum_packet_size(&self) -> u32 {
        self.maximum_packet_size
    }

    /// Serializes to bytes.
    ///
    /// ```text
    /// byte      SSH_MSG_CHANNEL_OPEN (90)
    /// string    channel type
    /// uint32    sender channel
    /// uint32    initial window size
    /// uint32    maximum packet size
    /// ....      channel type specific data
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::ChannelOpen);
        write_string(&mut buf, self.channel_type.name());
        write_u32(&mut buf, self.sender_channel);
        write_u32(&mut buf, self.initial_window_size);
        write_u32(&mut buf, self.maximum_packet_size);

        match &self.channel_type {
            ChannelType::Session => {}
            ChannelType::X11 {
                originator_address,
                originator_port,
            } => {
                write_string(&mut buf, originator_address);
                write_u32(&mut buf, *originator_port);
            }
            ChannelType::ForwardedTcpip {
                connected_address: host,
                connected_port: port,
                originator_address,
                originator_port,
            }
            | ChannelType::DirectTcpip {
                host,
                port,
                originator_address,
                originator_port,
            } => {
                write_string(&mut buf, host);
                write_u32(&mut buf, *port);
                write_string(&mut buf, originator_address);
                write_u32(&mut buf, *originator_port);
            }
            ChannelType::Other { data, .. } => buf.extend_from_slice(data),
        }

        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::ChannelOpen)?;

        let type_name = read_string(data, &mut offset)?;
        let sender_channel = read_u32(data, &mut offset)?;
        let initial_window_size = read_u32(data, &mut offset)?;
        let maximum_packet_size = read_u32(data, &mut offset)?;

        let channel_type = match type_name.as_str() {
            "session" => ChannelType::Session,
            "x11" => ChannelType::X11 {
                originator_address: read_string(data, &mut offset)?,
                originator_port: read_u32(data, &mut offset)?,
            },
            "forwarded-tcpip" => ChannelType::ForwardedTcpip {
                connected_address: read_string(data, &mut offset)?,
                connected_port: read_u32(data, &mut offset)?,
                originator_address: read_string(data, &mut offset)?,
                originator_port: read_u32(data, &mut offset)?,
            },
            "direct-tcpip" => ChannelType::DirectTcpip {
                host: read_string(data, &mut offset)?,
                port: read_u32(data, &mut offset)?,
                originator_address: read_string(data, &mut offset)?,
                originator_port: read_u32(data, &mut offset)?,
            },
            _ => ChannelType::Other {
                name: type_name,
                data: data[offset..].to_vec(),
            },
        };

        Ok(Self {
            channel_type,
            sender_channel,
            initial_window_size,
            maximum_packet_size,
        })
    }
}

/// SSH_MSG_CHANNEL_OPEN_CONFIRMATION message (RFC 4254 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenConfirmation {
    recipient_channel: u32,
    sender_channel: u32,
    initial_window_size: u32,
    maximum_packet_size: u32,
}

impl ChannelOpenConfirmation {
    /// Creates a new confirmation.
    pub fn new(
        recipient_channel: u32,
        sender_channel: u32,
        initial_window_size: u32,
        maximum_packet_size: u32,
    ) -> Self {
        Self {
            recipient_channel,
            sender_channel,
            initial_window_size,
            maximum_packet_size,
        }
    }

    /// Returns the recipient (peer's) channel number.
    pub fn recipient_channel(&self) -> u32 {
        self.recipient_channel
    }

    /// Returns the sender (our) channel number.
    pub fn sender_channel(&self) -> u32 {
        self.sender_channel
    }

    /// Returns the initial window size.
    pub fn initial_window_size(&self) -> u32 {
        self.initial_window_size
    }

    /// Returns the maximum packet size.
    pub fn maximum_packet_size(&self) -> u32 {
        self.maximum_packet_size
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::ChannelOpenConfirmation);
        write_u32(&mut buf, self.recipient_channel);
        write_u32(&mut buf, self.sender_channel);
        write_u32(&mut buf, self.initial_window_size);
        write_u32(&mut buf, self.maximum_packet_size);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::ChannelOpenConfirmation)?;
        Ok(Self {
            recipient_channel: read_u32(data, &mut offset)?,
            sender_channel: read_u32(data, &mut offset)?,
            initial_window_size: read_u32(data, &mut offset)?,
            maximum_packet_size: read_u32(data, &mut offset)?,
        })
    }
}

/// Channel open failure reason codes (RFC 4254 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChannelOpenFailureReason {
    /// Administratively prohibited
    AdministrativelyProhibited = 1,
    /// Connect failed
    ConnectFailed = 2,
    /// Unknown channel type
    UnknownChannelType = 3,
    /// Resource shortage
    ResourceShortage = 4,
}

impl ChannelOpenFailureReason {
    /// Converts from u32.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::AdministrativelyProhibited),
            2 => Some(Self::ConnectFailed),
            3 => Some(Self::UnknownChannelType),
            4 => Some(Self::ResourceShortage),
            _ => None,
        }
    }

    /// Returns a default description.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdministrativelyProhibited => "Administratively prohibited",
            Self::ConnectFailed => "Connect failed",
            Self::UnknownChannelType => "Unknown channel type",
            Self::ResourceShortage => "Resource shortage",
        }
    }
}

/// SSH_MSG_CHANNEL_OPEN_FAILURE message (RFC 4254 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenFailure {
    recipient_channel: u32,
    reason_code: u32,
    description: String,
    language_tag: String,
}

impl ChannelOpenFailure {
    /// Creates a failure with the reason's default description.
    pub fn new(recipient_channel: u32, reason: ChannelOpenFailureReason) -> Self {
        Self {
            recipient_channel,
            reason_code: reason as u32,
            description: reason.as_str().to_string(),
            language_tag: String::new(),
        }
    }

    /// Returns the recipient channel number.
    pub fn recipient_channel(&self) -> u32 {
        self.recipient_channel
    }

    /// Returns the raw reason code.
    pub fn reason_code(&self) -> u32 {
        self.reason_code
    }

    /// Returns the reason, if it is a known code.
    pub fn reason(&self) -> Option<ChannelOpenFailureReason> {
        ChannelOpenFailureReason::from_u32(self.reason_code)
    }

    /// Returns the description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::ChannelOpenFailure);
        write_u32(&mut buf, self.recipient_channel);
        write_u32(&mut buf, self.reason_code);
        write_string(&mut buf, &self.description);
        write_string(&mut buf, &self.language_tag);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::ChannelOpenFailure)?;
        Ok(Self {
            recipient_channel: read_u32(data, &mut offset)?,
            reason_code: read_u32(data, &mut offset)?,
            description: read_string(data, &mut offset)?,
            language_tag: read_string(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_CHANNEL_WINDOW_ADJUST message (RFC 4254 Section 5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelWindowAdjust {
    recipient_channel: u32,
    bytes_to_add: u32,
}

impl ChannelWindowAdjust {
    /// Creates a window adjustment.
    pub fn new(recipient_channel: u32, bytes_to_add: u32) -> Self {
        Self {
            recipient_channel,
            bytes_to_add,
        }
    }

    /// Returns the recipient channel number.
    pub fn recipient_channel(&self) -> u32 {
        self.recipient_channel
    }

    /// Returns the number of bytes to add to the window.
    pub fn bytes_to_add(&self) -> u32 {
        self.bytes_to_add
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::ChannelWindowAdjust);
        write_u32(&mut buf, self.recipient_channel);
        write_u32(&mut buf, self.bytes_to_add);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::ChannelWindowAdjust)?;
        Ok(Self {
            recipient_channel: read_u32(data, &mut offset)?,
            bytes_to_add: read_u32(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_CHANNEL_DATA message (RFC 4254 Section 5.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    recipient_channel: u32,
    data: Vec<u8>,
}

impl ChannelData {
    /// Creates a data message.
    pub fn new(recipient_channel: u32, data: Vec<u8>) -> Self {
        Self {
            recipient_channel,
            data,
        }
    }

    /// Returns the recipient channel number.
    pub fn recipient_channel(&self) -> u32 {
        self.recipient_channel
    }

    /// Returns the payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the message and returns the payload.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::ChannelData);
        write_u32(&mut buf, self.recipient_channel);
        write_bytes(&mut buf, &self.data);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::ChannelData)?;
        Ok(Self {
            recipient_channel: read_u32(data, &mut offset)?,
            data: read_bytes(data, &mut offset)?,
        })
    }
}

/// Extended data type code for stderr (RFC 4254 Section 5.2).
pub const EXTENDED_DATA_STDERR: u32 = 1;

/// SSH_MSG_CHANNEL_EXTENDED_DATA message (RFC 4254 Section 5.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelExtendedData {
    recipient_channel: u32,
    data_type_code: u32,
    data: Vec<u8>,
}

impl ChannelExtendedData {
    /// Creates an extended data message.
    pub fn new(recipient_channel: u32, data_type_code: u32, data: Vec<u8>) -> Self {
        Self {
            recipient_channel,
            data_type_code,
            data,
        }
    }

    /// Returns the recipient channel number.
    pub fn recipient_channel(&self) -> u32 {
        self.recipient_channel
    }

    /// Returns the data type code.
    pub fn data_type_code(&self) -> u32 {
        self.data_type_code
    }

    /// Returns the payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::ChannelExtendedData);
        write_u32(&mut buf, self.recipient_channel);
        write_u32(&mut buf, self.data_type_code);
        write_bytes(&mut buf, &self.data);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::ChannelExtendedData)?;
        Ok(Self {
            recipient_channel: read_u32(data, &mut offset)?,
            data_type_code: read_u32(data, &mut offset)?,
            data: read_bytes(data, &mut offset)?,
        })
    }
}

/// Defines a message that carries only a recipient channel.
macro_rules! recipient_only_message {
    ($(#[$doc:meta])* $name:ident, $msg_type:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            recipient_channel: u32,
        }

        impl $name {
            /// Creates the message.
            pub fn new(recipient_channel: u32) -> Self {
                Self { recipient_channel }
            }

            /// Returns the recipient channel number.
            pub fn recipient_channel(&self) -> u32 {
                self.recipient_channel
            }

            /// Serializes to bytes.
            pub fn to_bytes(&self) -> Vec<u8> {
                let mut buf = start($msg_type);
                write_u32(&mut buf, self.recipient_channel);
                buf.to_vec()
            }

            /// Parses from bytes.
            pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
                let mut offset = expect_type(data, $msg_type)?;
                Ok(Self {
                    recipient_channel: read_u32(data, &mut offset)?,
                })
            }
        }
    };
}

recipient_only_message!(
    /// SSH_MSG_CHANNEL_EOF message (RFC 4254 Section 5.3).
    ChannelEof,
    MessageType::ChannelEof
);
recipient_only_message!(
    /// SSH_MSG_CHANNEL_CLOSE message (RFC 4254 Section 5.3).
    ChannelClose,
    MessageType::ChannelClose
);
recipient_only_message!(
    /// SSH_MSG_CHANNEL_SUCCESS message (RFC 4254 Section 5.4).
    ChannelSuccess,
    MessageType::ChannelSuccess
);
recipient_only_message!(
    /// SSH_MSG_CHANNEL_FAILURE message (RFC 4254 Section 5.4).
    ChannelFailure,
    MessageType::ChannelFailure
);

/// Channel request type, tagged by request name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequestType {
    /// "pty-req" (RFC 4254 Section 6.2)
    PtyReq {
        /// TERM environment variable value (e.g., "xterm")
        term: String,
        /// Terminal width in characters
        width_chars: u32,
        /// Terminal height in rows
        height_rows: u32,
        /// Terminal width in pixels
        width_pixels: u32,
        /// Terminal height in pixels
        height_pixels: u32,
        /// Encoded terminal modes
        modes: Vec<u8>,
    },
    /// "x11-req" (RFC 4254 Section 6.3.1)
    X11Req {
        /// Only forward a single connection
        single_connection: bool,
        /// X11 authentication protocol
        auth_protocol: String,
        /// X11 authentication cookie
        auth_cookie: String,
        /// X11 screen number
        screen_number: u32,
    },
    /// "env" (RFC 4254 Section 6.4)
    Env {
        /// Variable name
        name: String,
        /// Variable value
        value: String,
    },
    /// "shell" (RFC 4254 Section 6.5)
    Shell,
    /// "exec" (RFC 4254 Section 6.5)
    Exec {
        /// Command to execute
        command: String,
    },
    /// "subsystem" (RFC 4254 Section 6.5)
    Subsystem {
        /// Subsystem name
        name: String,
    },
    /// "window-change" (RFC 4254 Section 6.7)
    WindowChange {
        /// Terminal width in characters
        width_chars: u32,
        /// Terminal height in rows
        height_rows: u32,
        /// Terminal width in pixels
        width_pixels: u32,
        /// Terminal height in pixels
        height_pixels: u32,
    },
    /// "xon-xoff" (RFC 4254 Section 6.8)
    XonXoff {
        /// Whether the client may do flow control
        client_can_do: bool,
    },
    /// "signal" (RFC 4254 Section 6.9)
    Signal {
        /// Signal name without the "SIG" prefix
        signal_name: String,
    },
    /// "exit-status" (RFC 4254 Section 6.10)
    ExitStatus {
        /// Exit status code
        exit_status: u32,
    },
    /// "exit-signal" (RFC 4254 Section 6.10)
    ExitSignal {
        /// Signal name
        signal_name: String,
        /// Core dumped flag
        core_dumped: bool,
        /// Error message
        error_message: String,
        /// Language tag
        language_tag: String,
    },
    /// Any other request name; request-specific data kept raw.
    Unknown {
        /// Request name
        name: String,
        /// Remaining bytes after `want_reply`
        data: Vec<u8>,
    },
}

impl ChannelRequestType {
    /// Returns the request type name.
    pub fn name(&self) -> &str {
        match self {
            ChannelRequestType::PtyReq { .. } => "pty-req",
            ChannelRequestType::X11Req { .. } => "x11-req",
            ChannelRequestType::Env { .. } => "env",
            ChannelRequestType::Shell => "shell",
            ChannelRequestType::Exec { .. } => "exec",
            ChannelRequestType::Subsystem { .. } => "subsystem",
            ChannelRequestType::WindowChange { .. } => "window-change",
            ChannelRequestType::XonXoff { .. } => "xon-xoff",
            ChannelRequestType::Signal { .. } => "signal",
            ChannelRequestType::ExitStatus { .. } => "exit-status",
            ChannelRequestType::ExitSignal { .. } => "exit-signal",
            ChannelRequestType::Unknown { name, .. } => name,
        }
    }
}

/// SSH_MSG_CHANNEL_REQUEST message (RFC 4254 Section 5.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    recipient_channel: u32,
    request_type: ChannelRequestType,
    want_reply: bool,
}

impl ChannelRequest {
    /// Creates a channel request.
    pub fn new(recipient_channel: u32, request_type: ChannelRequestType, want_reply: bool) -> Self {
        Self {
            recipient_channel,
            request_type,
            want_reply,
        }
    }

    /// Returns the recipient channel number.
    pub fn recipient_channel(&self) -> u32 {
        self.recipient_channel
    }

    /// Returns the request type.
    pub fn request_type(&self) -> &ChannelRequestType {
        &self.request_type
    }

    /// Returns whether the sender wants a reply.
    pub fn want_reply(&self) -> bool {
        self.want_reply
    }

    /// Serializes to bytes.
    ///
    /// ```text
    /// byte      SSH_MSG_CHANNEL_REQUEST (98)
    /// uint32    recipient channel
    /// string    request type
    /// boolean   want reply
    /// ....      type-specific data
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::ChannelRequest);
        write_u32(&mut buf, self.recipient_channel);
        write_string(&mut buf, self.request_type.name());
        write_bool(&mut buf, self.want_reply);

        match &self.request_type {
            ChannelRequestType::PtyReq {
                term,
                width_chars,
                height_rows,
                width_pixels,
                height_pixels,
                modes,
            } => {
                write_string(&mut buf, term);
                write_u32(&mut buf, *width_chars);
                write_u32(&mut buf, *height_rows);
                write_u32(&mut buf, *width_pixels);
                write_u32(&mut buf, *height_pixels);
                write_bytes(&mut buf, modes);
            }
            ChannelRequestType::X11Req {
                single_connection,
                auth_protocol,
                auth_cookie,
                screen_number,
            } => {
                write_bool(&mut buf, *single_connection);
                write_string(&mut buf, auth_protocol);
                write_string(&mut buf, auth_cookie);
                write_u32(&mut buf, *screen_number);
            }
            ChannelRequestType::Env { name, value } => {
                write_string(&mut buf, name);
                write_string(&mut buf, value);
            }
            ChannelRequestType::Shell => {}
            ChannelRequestType::Exec { command } => write_string(&mut buf, command),
            ChannelRequestType::Subsystem { name } => write_string(&mut buf, name),
            ChannelRequestType::WindowChange {
                width_chars,
                height_rows,
                width_pixels,
                height_pixels,
            } => {
                write_u32(&mut buf, *width_chars);
                write_u32(&mut buf, *height_rows);
                write_u32(&mut buf, *width_pixels);
                write_u32(&mut buf, *height_pixels);
            }
            ChannelRequestType::XonXoff { client_can_do } => write_bool(&mut buf, *client_can_do),
            ChannelRequestType::Signal { signal_name } => write_string(&mut buf, signal_name),
            ChannelRequestType::ExitStatus { exit_status } => write_u32(&mut buf, *exit_status),
            ChannelRequestType::ExitSignal {
                signal_name,
                core_dumped,
                error_message,
                language_tag,
            } => {
                write_string(&mut buf, signal_name);
                write_bool(&mut buf, *core_dumped);
                write_string(&mut buf, error_message);
                write_string(&mut buf, language_tag);
            }
            ChannelRequestType::Unknown { data, .. } => buf.extend_from_slice(data),
        }

        buf.to_vec()
    }

    /// Parses from bytes.
    ///
    /// Unrecognised request names parse as [`ChannelRequestType::Unknown`].
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::ChannelRequest)?;

        let recipient_channel = read_u32(data, &mut offset)?;
        let request_name = read_string(data, &mut offset)?;
        let want_reply = read_bool(data, &mut offset)?;

        let request_type = match request_name.as_str() {
            "pty-req" => ChannelRequestType::PtyReq {
                term: read_string(data, &mut offset)?,
                width_chars: read_u32(data, &mut offset)?,
                height_rows: read_u32(data, &mut offset)?,
                width_pixels: read_u32(data, &mut offset)?,
                height_pixels: read_u32(data, &mut offset)?,
                modes: read_bytes(data, &mut offset)?,
            },
            "x11-req" => ChannelRequestType::X11Req {
                single_connection: read_bool(data, &mut offset)?,
                auth_protocol: read_string(data, &mut offset)?,
                auth_cookie: read_string(data, &mut offset)?,
                screen_number: read_u32(data, &mut offset)?,
            },
            "env" => ChannelRequestType::Env {
                name: read_string(data, &mut offset)?,
                value: read_string(data, &mut offset)?,
            },
            "shell" => ChannelRequestType::Shell,
            "exec" => ChannelRequestType::Exec {
                command: read_string(data, &mut offset)?,
            },
            "subsystem" => ChannelRequestType::Subsystem {
                name: read_string(data, &mut offset)?,
            },
            "window-change" => ChannelRequestType::WindowChange {
                width_chars: read_u32(data, &mut offset)?,
                height_rows: read_u32(data, &mut offset)?,
                width_pixels: read_u32(data, &mut offset)?,
                height_pixels: read_u32(data, &mut offset)?,
            },
            "xon-xoff" => ChannelRequestType::XonXoff {
                client_can_do: read_bool(data, &mut offset)?,
            },
            "signal" => ChannelRequestType::Signal {
                signal_name: read_string(data, &mut offset)?,
            },
            "exit-status" => ChannelRequestType::ExitStatus {
                exit_status: read_u32(data, &mut offset)?,
            },
            "exit-signal" => ChannelRequestType::ExitSignal {
                signal_name: read_string(data, &mut offset)?,
                core_dumped: read_bool(data, &mut offset)?,
                error_message: read_string(data, &mut offset)?,
                language_tag: read_string(data, &mut offset)?,
            },
            _ => ChannelRequestType::Unknown {
                name: request_name,
                data: data[offset..].to_vec(),
            },
        };

        Ok(Self {
            recipient_channel,
            request_type,
            want_reply,
        })
    }
}

/// SSH_MSG_GLOBAL_REQUEST message (RFC 4254 Section 4).
///
/// No global request is supported, so request-specific data is kept raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRequest {
    request_name: String,
    want_reply: bool,
    data: Vec<u8>,
}

impl GlobalRequest {
    /// Creates a global request.
    pub fn new(request_name: impl Into<String>, want_reply: bool, data: Vec<u8>) -> Self {
        Self {
            request_name: request_name.into(),
            want_reply,
            data,
        }
    }

    /// Returns the request name.
    pub fn request_name(&self) -> &str {
        &self.request_name
    }

    /// Returns whether the sender wants a reply.
    pub fn want_reply(&self) -> bool {
        self.want_reply
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::GlobalRequest);
        write_string(&mut buf, &self.request_name);
        write_bool(&mut buf, self.want_reply);
        buf.extend_from_slice(&self.data);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::GlobalRequest)?;
        let request_name = read_string(data, &mut offset)?;
        let want_reply = read_bool(data, &mut offset)?;
        Ok(Self {
            request_name,
            want_reply,
            data: data[offset..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cssh_platform::CsshError;

    #[test]
    fn test_channel_open_session() {
        let open = ChannelOpen::new(ChannelType::Session, 5, 2_097_152, 32_768);
        let bytes = open.to_bytes();
        assert_eq!(bytes[0], 90);
        assert_eq!(&bytes[1..12], b"\x00\x00\x00\x07session");
        let parsed = ChannelOpen::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.sender_channel(), 5);
        assert_eq!(parsed.initial_window_size(), 2_097_152);
        assert_eq!(parsed.maximum_packet_size(), 32_768);
    }

    #[test]
    fn test_channel_open_x11() {
        let open = ChannelOpen::new(
            ChannelType::X11 {
                originator_address: "10.0.0.1".into(),
                originator_port: 6010,
            },
            1,
            1024,
            1024,
        );
        let parsed = ChannelOpen::from_bytes(&open.to_bytes()).unwrap();
        assert_eq!(parsed.channel_type().name(), "x11");
        assert_eq!(parsed, open);
    }

    #[test]
    fn test_channel_open_direct_tcpip() {
        let open = ChannelOpen::new(
            ChannelType::DirectTcpip {
                host: "localhost".into(),
                port: 80,
                originator_address: "127.0.0.1".into(),
                originator_port: 50000,
            },
            0,
            1024,
            1024,
        );
        assert_eq!(ChannelOpen::from_bytes(&open.to_bytes()).unwrap(), open);
    }

    #[test]
    fn test_channel_open_unknown_type() {
        let open = ChannelOpen::new(
            ChannelType::Other {
                name: "auth-agent@openssh.com".into(),
                data: vec![],
            },
            3,
            1024,
            1024,
        );
        let parsed = ChannelOpen::from_bytes(&open.to_bytes()).unwrap();
        assert_eq!(parsed.channel_type().name(), "auth-agent@openssh.com");
    }

    #[test]
    fn test_channel_open_truncated() {
        let bytes = ChannelOpen::new(ChannelType::Session, 0, 1, 1).to_bytes();
        assert!(matches!(
            ChannelOpen::from_bytes(&bytes[..bytes.len() - 1]),
            Err(CsshError::Decode(_))
        ));
    }

    #[test]
    fn test_channel_open_failure() {
        let failure = ChannelOpenFailure::new(9, ChannelOpenFailureReason::ResourceShortage);
        let bytes = failure.to_bytes();
        assert_eq!(&bytes[..9], &[92, 0, 0, 0, 9, 0, 0, 0, 4]);
        let parsed = ChannelOpenFailure::from_bytes(&bytes).unwrap();
        assert_eq!(
            parsed.reason(),
            Some(ChannelOpenFailureReason::ResourceShortage)
        );
        assert_eq!(parsed.description(), "Resource shortage");
    }

    #[test]
    fn test_channel_data_layout() {
        let data = ChannelData::new(7, b"hi".to_vec());
        assert_eq!(
            data.to_bytes(),
            vec![94, 0, 0, 0, 7, 0, 0, 0, 2, b'h', b'i']
        );
    }

    #[test]
    fn test_recipient_only_messages() {
        assert_eq!(ChannelEof::new(1).to_bytes(), vec![96, 0, 0, 0, 1]);
        assert_eq!(ChannelClose::new(1).to_bytes(), vec![97, 0, 0, 0, 1]);
        assert_eq!(ChannelSuccess::new(2).to_bytes(), vec![99, 0, 0, 0, 2]);
        assert_eq!(ChannelFailure::new(2).to_bytes(), vec![100, 0, 0, 0, 2]);
        assert!(ChannelClose::from_bytes(&[96, 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn test_channel_request_pty() {
        let request = ChannelRequest::new(
            0,
            ChannelRequestType::PtyReq {
                term: "xterm-256color".into(),
                width_chars: 80,
                height_rows: 24,
                width_pixels: 0,
                height_pixels: 0,
                modes: vec![53, 0, 0, 0, 1, 0],
            },
            true,
        );
        let parsed = ChannelRequest::from_bytes(&request.to_bytes()).unwrap();
        assert_eq!(parsed, request);
        assert!(parsed.want_reply());
    }

    #[test]
    fn test_channel_request_window_change() {
        let request = ChannelRequest::new(
            4,
            ChannelRequestType::WindowChange {
                width_chars: 120,
                height_rows: 40,
                width_pixels: 0,
                height_pixels: 0,
            },
            false,
        );
        let bytes = request.to_bytes();
        assert_eq!(bytes.len(), 1 + 4 + 4 + 13 + 1 + 16);
        assert_eq!(ChannelRequest::from_bytes(&bytes).unwrap(), request);
    }

    #[test]
    fn test_channel_request_exit_signal() {
        let request = ChannelRequest::new(
            0,
            ChannelRequestType::ExitSignal {
                signal_name: "TERM".into(),
                core_dumped: false,
                error_message: String::new(),
                language_tag: String::new(),
            },
            false,
        );
        assert_eq!(
            ChannelRequest::from_bytes(&request.to_bytes()).unwrap(),
            request
        );
    }

    #[test]
    fn test_channel_request_unknown() {
        let request = ChannelRequest::new(
            0,
            ChannelRequestType::Unknown {
                name: "keepalive@openssh.com".into(),
                data: vec![],
            },
            true,
        );
        let parsed = ChannelRequest::from_bytes(&request.to_bytes()).unwrap();
        assert_eq!(parsed.request_type().name(), "keepalive@openssh.com");
    }

    #[test]
    fn test_global_request() {
        let req = GlobalRequest::new("tcpip-forward", true, vec![0, 0, 0, 0]);
        let parsed = GlobalRequest::from_bytes(&req.to_bytes()).unwrap();
        assert_eq!(parsed.request_name(), "tcpip-forward");
        assert!(parsed.want_reply());
    }
}
