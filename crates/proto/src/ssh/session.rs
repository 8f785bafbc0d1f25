//! Per-connection session driver.
//!
//! [`SessionController`] runs the identification exchange, then reads one
//! packet at a time and routes it:
//!
//! | Messages                         | Handled by                  |
//! |----------------------------------|-----------------------------|
//! | KEXINIT, KEXDH_INIT, NEWKEYS     | [`KeyExchangeEngine`] and transport activation |
//! | SERVICE_REQUEST, USERAUTH_REQUEST| service gate and [`Authenticator`] |
//! | CHANNEL_*                        | [`ChannelMultiplexer`]      |
//! | GLOBAL_REQUEST                   | always refused              |
//! | IGNORE, DEBUG, UNIMPLEMENTED     | logged and dropped          |
//!
//! Fatal errors end the session with a DISCONNECT carrying the matching
//! reason code. Unknown message numbers are answered with UNIMPLEMENTED.

use crate::ssh::auth::{AuthPolicy, AuthSettings, Authenticator, CONNECTION_SERVICE};
use crate::ssh::channel::{ChannelAppFactory, ChannelCounter, ChannelLimits, ChannelMultiplexer};
use crate::ssh::hostkey::HostKey;
use crate::ssh::kex_dh::{KeyExchangeEngine, PendingKeys};
use crate::ssh::message::{Disconnect, DisconnectReason, Message, ServiceAccept, Unimplemented};
use crate::ssh::server::SshServerConfig;
use crate::ssh::transport::{split, DirectionState, PacketReader, PacketSender, ReceivedPacket};
use crate::ssh::version::{self, Version};
use cssh_platform::{CsshError, CsshResult};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// Service name of the user authentication protocol.
pub const USERAUTH_SERVICE: &str = "ssh-userauth";

/// Everything a connection shares with the rest of the server.
#[derive(Clone)]
pub struct SessionContext {
    /// Server settings
    pub config: Arc<SshServerConfig>,
    /// Host key used to sign the exchange hash
    pub host_key: Arc<dyn HostKey>,
    /// Password policy
    pub auth_policy: Arc<dyn AuthPolicy>,
    /// Builds channel applications
    pub app_factory: Arc<dyn ChannelAppFactory>,
    /// Server-wide channel ceiling
    pub channel_counter: ChannelCounter,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("config", &self.config)
            .field("host_key", &self.host_key.fingerprint())
            .field("channel_counter", &self.channel_counter)
            .finish_non_exhaustive()
    }
}

/// How a session ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent DISCONNECT
    PeerDisconnected {
        /// Reason code from the client
        reason: u32,
        /// Description from the client
        description: String,
    },
    /// The stream reached end of file
    ConnectionClosed,
}

enum Flow {
    Continue,
    Stop(SessionEnd),
}

/// Drives one SSH connection from identification to disconnect.
pub struct SessionController {
    peer: String,
    reader: PacketReader,
    sender: PacketSender,
    context: SessionContext,
}

impl SessionController {
    /// Wraps an accepted stream.
    pub fn new<S>(stream: S, peer: impl Into<String>, context: SessionContext) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, sender) = split(stream);
        Self {
            peer: peer.into(),
            reader,
            sender,
            context,
        }
    }

    /// Runs the session to completion.
    ///
    /// A fatal error is reported to the client with DISCONNECT before it is
    /// returned. End of stream counts as a normal end.
    pub async fn run(self) -> CsshResult<SessionEnd> {
        let SessionController {
            peer,
            mut reader,
            sender,
            context,
        } = self;
        let config = Arc::clone(&context.config);

        let ours = Version::new(&config.software_version, config.comments.as_deref());
        let client_version =
            match version::exchange(&mut reader, &sender, &config.banner_lines, &ours).await {
                Ok(v) => v,
                Err(e) => return finish_with_error(&peer, &sender, e).await,
            };
        info!(peer = %peer, client = %client_version, "identification exchanged");

        let channels = ChannelMultiplexer::new(
            sender.clone(),
            Arc::clone(&context.app_factory),
            context.channel_counter.clone(),
            ChannelLimits {
                client_channels_max: config.client_channels_max,
                initial_window_size: config.initial_window_size,
                maximum_packet_size: config.maximum_packet_size,
            },
        );
        let auth = Authenticator::new(
            Arc::clone(&context.auth_policy),
            AuthSettings {
                auth_required: config.auth_required,
                banner: config.userauth_banner.clone(),
                max_attempts: config.max_auth_attempts,
            },
        );
        let kex = KeyExchangeEngine::new(
            config.algorithms.clone(),
            client_version.as_str(),
            ours.as_str(),
        );

        let mut dispatcher = Dispatcher {
            peer: peer.clone(),
            sender: sender.clone(),
            host_key: Arc::clone(&context.host_key),
            kex,
            pending: None,
            auth,
            userauth_accepted: false,
            channels,
        };

        let result = dispatcher.run(&mut reader).await;
        dispatcher.channels.shutdown().await;

        match result {
            Ok(end) => {
                info!(peer = %peer, end = ?end, "session ended");
                let _ = sender.shutdown().await;
                Ok(end)
            }
            Err(e) => finish_with_error(&peer, &sender, e).await,
        }
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

async fn finish_with_error(
    peer: &str,
    sender: &PacketSender,
    err: CsshError,
) -> CsshResult<SessionEnd> {
    if let CsshError::Io(io) = &err {
        if io.kind() == std::io::ErrorKind::UnexpectedEof {
            info!(peer = %peer, "connection closed by peer");
            return Ok(SessionEnd::ConnectionClosed);
        }
        warn!(peer = %peer, error = %err, "connection lost");
        return Err(err);
    }

    let reason = DisconnectReason::for_error(&err);
    let description = match &err {
        CsshError::Disconnected { description, .. } => description.clone(),
        other => other.to_string(),
    };
    error!(peer = %peer, reason = ?reason, error = %err, "disconnecting");

    let disconnect = Message::Disconnect(Disconnect::new(reason, description));
    if let Err(e) = sender.send_message(&disconnect).await {
        debug!(peer = %peer, error = %e, "could not send disconnect");
    }
    let _ = sender.shutdown().await;
    Err(err)
}

/// Post-identification state of one connection.
struct Dispatcher {
    peer: String,
    sender: PacketSender,
    host_key: Arc<dyn HostKey>,
    kex: KeyExchangeEngine,
    pending: Option<PendingKeys>,
    auth: Authenticator,
    userauth_accepted: bool,
    channels: ChannelMultiplexer,
}

impl Dispatcher {
    async fn run(&mut self, reader: &mut PacketReader) -> CsshResult<SessionEnd> {
        loop {
            let packet = match reader.read_packet().await {
                Ok(packet) => packet,
                Err(CsshError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(SessionEnd::ConnectionClosed)
                }
                Err(e) => return Err(e),
            };

            match self.dispatch(reader, &packet).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop(end)) => return Ok(end),
                Err(e) if e.is_recoverable() => self.recover(e, packet.sequence).await?,
                Err(e) => return Err(e),
            }
        }
    }

    async fn dispatch(&mut self, reader: &mut PacketReader, packet: &ReceivedPacket) -> CsshResult<Flow> {
        let message = Message::decode(&packet.payload)?;
        debug!(peer = %self.peer, msg = %message.message_type(), seq = packet.sequence, "received");

        match message {
            Message::Disconnect(d) => {
                info!(
                    peer = %self.peer,
                    reason = d.reason_code(),
                    description = d.description(),
                    "peer disconnected"
                );
                return Ok(Flow::Stop(SessionEnd::PeerDisconnected {
                    reason: d.reason_code(),
                    description: d.description().to_string(),
                }));
            }
            Message::Ignore(_) => {}
            Message::Debug(d) => {
                debug!(peer = %self.peer, always_display = d.always_display(), text = d.message(), "peer debug message");
            }
            Message::Unimplemented(u) => {
                warn!(peer = %self.peer, seq = u.sequence_number(), "peer did not implement our message");
            }

            Message::KexInit(_) => self.on_kexinit(&packet.payload).await?,
            Message::KexdhInit(init) => {
                let outcome = self.kex.on_dh_init(&init, self.host_key.as_ref())?;
                if let Some((reply, pending)) = outcome {
                    let outbound = DirectionState::outbound(&pending.algorithms, &pending.keys)?;
                    self.sender.send_message(&Message::KexdhReply(reply)).await?;
                    self.sender
                        .send_then_activate(&Message::NewKeys, outbound)
                        .await?;
                    self.pending = Some(pending);
                }
            }
            Message::NewKeys => {
                let pending = self.pending.take().ok_or_else(|| {
                    CsshError::Protocol("NEWKEYS before key exchange completed".to_string())
                })?;
                reader.activate(DirectionState::inbound(&pending.algorithms, &pending.keys)?);
                info!(
                    peer = %self.peer,
                    kex = pending.algorithms.kex.name(),
                    host_key = pending.algorithms.host_key.name(),
                    cipher = pending.algorithms.encryption_client_to_server.name(),
                    mac = pending.algorithms.mac_client_to_server.name(),
                    compression = pending.algorithms.compression_client_to_server.name(),
                    "keys activated"
                );
            }

            other => {
                self.require_keys(&other)?;
                self.on_service_message(other, packet.sequence).await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn on_kexinit(&mut self, payload: &[u8]) -> CsshResult<()> {
        if self.kex.exchanges() > 0 {
            return Err(CsshError::Disconnected {
                reason: DisconnectReason::KeyExchangeFailed as u32,
                description: "Re-keying is not supported".to_string(),
            });
        }
        let ours = self.kex.server_kexinit()?;
        self.sender.send_message(&Message::KexInit(ours)).await?;
        self.kex.on_kexinit(payload)?;
        Ok(())
    }

    fn require_keys(&self, message: &Message) -> CsshResult<()> {
        if self.kex.session_id().is_none() || self.kex.in_progress() || self.pending.is_some() {
            return Err(CsshError::Protocol(format!(
                "{} received before key exchange completed",
                message.message_type()
            )));
        }
        Ok(())
    }

    async fn on_service_message(&mut self, message: Message, sequence: u32) -> CsshResult<()> {
        match message {
            Message::ServiceRequest(request) => {
                let name = request.service_name();
                let granted = match name {
                    USERAUTH_SERVICE => {
                        self.userauth_accepted = true;
                        true
                    }
                    CONNECTION_SERVICE => self.auth.is_authenticated(),
                    _ => false,
                };
                if !granted {
                    return Err(CsshError::Disconnected {
                        reason: DisconnectReason::ServiceNotAvailable as u32,
                        description: format!("Service not available: {}", name),
                    });
                }
                debug!(peer = %self.peer, service = name, "service accepted");
                self.sender
                    .send_message(&Message::ServiceAccept(ServiceAccept::new(name)))
                    .await
            }
            Message::UserauthRequest(request) => {
                if !self.userauth_accepted {
                    return Err(CsshError::Protocol(
                        "USERAUTH_REQUEST before ssh-userauth was accepted".to_string(),
                    ));
                }
                if self.auth.is_authenticated() {
                    debug!(peer = %self.peer, "ignoring authentication request after success");
                    return Ok(());
                }
                for reply in self.auth.handle_request(&request)? {
                    self.sender.send_message(&reply).await?;
                }
                Ok(())
            }
            Message::GlobalRequest(request) => {
                debug!(peer = %self.peer, request = request.request_name(), "refusing global request");
                if request.want_reply() {
                    self.sender.send_message(&Message::RequestFailure).await?;
                }
                Ok(())
            }
            Message::ChannelOpenConfirmation(_) | Message::ChannelOpenFailure(_) => {
                self.reply_unimplemented(sequence).await
            }
            channel @ (Message::ChannelOpen(_)
            | Message::ChannelWindowAdjust(_)
            | Message::ChannelData(_)
            | Message::ChannelExtendedData(_)
            | Message::ChannelEof(_)
            | Message::ChannelClose(_)
            | Message::ChannelRequest(_)
            | Message::ChannelSuccess(_)
            | Message::ChannelFailure(_)) => {
                if !self.auth.is_authenticated() {
                    return Err(CsshError::Protocol(format!(
                        "{} before authentication",
                        channel.message_type()
                    )));
                }
                self.channels.handle_message(channel).await
            }
            other => {
                warn!(peer = %self.peer, msg = %other.message_type(), "unexpected message for a server");
                self.reply_unimplemented(sequence).await
            }
        }
    }

    /// Answers a non-fatal error; the session carries on.
    async fn recover(&mut self, err: CsshError, sequence: u32) -> CsshResult<()> {
        match err {
            CsshError::UnknownMessage(number) => {
                warn!(peer = %self.peer, number, seq = sequence, "unknown message");
                self.reply_unimplemented(sequence).await
            }
            other => {
                warn!(peer = %self.peer, seq = sequence, error = %other, "request refused");
                Ok(())
            }
        }
    }

    async fn reply_unimplemented(&mut self, sequence: u32) -> CsshResult<()> {
        self.sender
            .send_message(&Message::Unimplemented(Unimplemented::new(sequence)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::auth::PasswordTable;
    use crate::ssh::channel::{ChannelApp, ChannelHandle};
    use crate::ssh::hostkey::RsaHostKey;
    use crate::ssh::pty::PseudoTerminalConfig;
    use async_trait::async_trait;
    use once_cell::sync::Lazy;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    static HOST_KEY: Lazy<Arc<RsaHostKey>> =
        Lazy::new(|| Arc::new(RsaHostKey::generate(1024).unwrap()));

    struct Silent;

    #[async_trait]
    impl ChannelApp for Silent {
        async fn start(&mut self, _handle: ChannelHandle, _pty: &PseudoTerminalConfig) -> CsshResult<()> {
            Ok(())
        }
        async fn handle_data(&mut self, _data: &[u8]) -> CsshResult<()> {
            Ok(())
        }
        async fn stop(&mut self) {}
    }

    fn context() -> SessionContext {
        let factory = |_id: u32| -> Box<dyn ChannelApp> { Box::new(Silent) };
        SessionContext {
            config: Arc::new(SshServerConfig::default()),
            host_key: HOST_KEY.clone(),
            auth_policy: Arc::new(PasswordTable::new()),
            app_factory: Arc::new(factory),
            channel_counter: ChannelCounter::new(1),
        }
    }

    fn spawn_session() -> (DuplexStream, tokio::task::JoinHandle<CsshResult<SessionEnd>>) {
        let (client, server) = tokio::io::duplex(1 << 16);
        let controller = SessionController::new(server, "test", context());
        (client, tokio::spawn(controller.run()))
    }

    async fn read_until_identification(client: &mut DuplexStream) -> String {
        let mut text = Vec::new();
        loop {
            let byte = client.read_u8().await.unwrap();
            text.push(byte);
            if text.ends_with(b"\r\n") && text.windows(4).any(|w| w == b"SSH-") {
                return String::from_utf8(text).unwrap();
            }
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_session_future_is_send() {
        let (_client, server) = tokio::io::duplex(64);
        let run = SessionController::new(server, "test", context()).run();
        assert_send(&run);
    }

    #[tokio::test]
    async fn test_banner_and_identification() {
        let (mut client, task) = spawn_session();
        client.write_all(b"SSH-2.0-Foo\r\n").await.unwrap();
        let text = read_until_identification(&mut client).await;
        assert_eq!(text, "Hello, World!\r\nSSH-2.0-CustomSSH_0.1.0 Custom SSH server\r\n");

        drop(client);
        assert_eq!(task.await.unwrap().unwrap(), SessionEnd::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_bad_version_disconnects() {
        let (mut client, task) = spawn_session();
        client.write_all(b"SSH-1.5-Old\r\n").await.unwrap();
        read_until_identification(&mut client).await;

        let (mut reader, _sender) = split(client);
        let packet = reader.read_packet().await.unwrap();
        match Message::decode(&packet.payload).unwrap() {
            Message::Disconnect(d) => {
                assert_eq!(d.reason_code(), DisconnectReason::ProtocolVersionNotSupported as u32)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_service_request_before_kex_is_fatal() {
        let (mut client, task) = spawn_session();
        client.write_all(b"SSH-2.0-Foo\r\n").await.unwrap();
        read_until_identification(&mut client).await;

        let (mut reader, sender) = split(client);
        let request = Message::ServiceRequest(crate::ssh::message::ServiceRequest::new(USERAUTH_SERVICE));
        sender.send_message(&request).await.unwrap();
        match Message::decode(&reader.read_packet().await.unwrap().payload).unwrap() {
            Message::Disconnect(d) => {
                assert_eq!(d.reason_code(), DisconnectReason::ProtocolError as u32)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(task.await.unwrap(), Err(CsshError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_unknown_message_gets_unimplemented() {
        let (mut client, task) = spawn_session();
        client.write_all(b"SSH-2.0-Foo\r\n").await.unwrap();
        read_until_identification(&mut client).await;

        let (mut reader, sender) = split(client);
        sender.send(&[2, 0, 0, 0, 0]).await.unwrap(); // IGNORE, seq 0
        sender.send(&[200, 1, 2, 3]).await.unwrap(); // seq 1
        match Message::decode(&reader.read_packet().await.unwrap().payload).unwrap() {
            Message::Unimplemented(u) => assert_eq!(u.sequence_number(), 1),
            other => panic!("unexpected {:?}", other),
        }

        let bye = Message::Disconnect(Disconnect::new(DisconnectReason::ByApplication, "bye"));
        sender.send_message(&bye).await.unwrap();
        assert_eq!(
            task.await.unwrap().unwrap(),
            SessionEnd::PeerDisconnected {
                reason: DisconnectReason::ByApplication as u32,
                description: "bye".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_no_common_kex_disconnects() {
        let (mut client, task) = spawn_session();
        client.write_all(b"SSH-2.0-Foo\r\n").await.unwrap();
        read_until_identification(&mut client).await;

        let (mut reader, sender) = split(client);
        let kexinit = crate::ssh::kex::KexInit::builder()
            .kex(["curve25519-sha256"])
            .host_key(["ssh-rsa"])
            .encryption(["aes128-cbc"])
            .mac(["hmac-sha1"])
            .compression(["none"])
            .build();
        sender.send_message(&Message::KexInit(kexinit)).await.unwrap();
        // Our lists go out before negotiation fails.
        match Message::decode(&reader.read_packet().await.unwrap().payload).unwrap() {
            Message::KexInit(ours) => {
                assert_eq!(ours.kex_algorithms()[0], "diffie-hellman-group16-sha512")
            }
            other => panic!("unexpected {:?}", other),
        }
        match Message::decode(&reader.read_packet().await.unwrap().payload).unwrap() {
            Message::Disconnect(d) => {
                assert_eq!(d.reason_code(), DisconnectReason::KeyExchangeFailed as u32)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            task.await.unwrap(),
            Err(CsshError::NoMatchingAlgorithm { category: "kex" })
        ));
    }
}
