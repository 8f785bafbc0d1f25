//! End-to-end tests for the server session.
//!
//! A minimal client is written against the crate's own building blocks:
//! real Diffie-Hellman, real AES-CBC and HMAC, over an in-memory duplex stream.
//! These tests cover:
//! - Identification exchange with a banner
//! - Key exchange, host key signature and key activation
//! - Service request and password authentication
//! - Session channel with pty, shell, echo, EOF and CLOSE
//! - MAC failure handling

use async_trait::async_trait;
use cssh_platform::{CsshError, CsshResult};
use cssh_proto::ssh::algorithms::{AlgorithmRegistry, AlgorithmSet};
use cssh_proto::ssh::auth::{AuthMethod, AuthRequest, PasswordTable};
use cssh_proto::ssh::channel::{ChannelApp, ChannelCounter, ChannelHandle};
use cssh_proto::ssh::connection::{
    ChannelClose, ChannelData, ChannelEof, ChannelOpen, ChannelRequest, ChannelRequestType,
    ChannelType,
};
use cssh_proto::ssh::hostkey::{HostKey, RsaHostKey};
use cssh_proto::ssh::kex::{KexInit, KexdhInit};
use cssh_proto::ssh::kex_dh::{
    exchange_hash, DhServerExchange, ExchangeHashInput, KeyMaterial,
};
use cssh_proto::ssh::message::{Disconnect, DisconnectReason, Message, ServiceRequest};
use cssh_proto::ssh::pty::PseudoTerminalConfig;
use cssh_proto::ssh::server::SshServerConfig;
use cssh_proto::ssh::session::{SessionContext, SessionController, SessionEnd};
use cssh_proto::ssh::transport::{DirectionState, PacketReader, PacketWriter};
use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

static HOST_KEY: Lazy<Arc<RsaHostKey>> =
    Lazy::new(|| Arc::new(RsaHostKey::generate(1024).unwrap()));

const CLIENT_VERSION: &str = "SSH-2.0-Foo";

/// Greets with the terminal type, then echoes every byte back.
struct EchoApp {
    handle: Option<ChannelHandle>,
}

#[async_trait]
impl ChannelApp for EchoApp {
    async fn start(&mut self, handle: ChannelHandle, pty: &PseudoTerminalConfig) -> CsshResult<()> {
        let term = pty.environment().get("TERM").cloned().unwrap_or_default();
        handle.send_data(format!("welcome {}\r\n", term).as_bytes()).await?;
        self.handle = Some(handle);
        Ok(())
    }

    async fn handle_data(&mut self, data: &[u8]) -> CsshResult<()> {
        match &self.handle {
            Some(handle) => handle.send_data(data).await,
            None => Ok(()),
        }
    }

    async fn stop(&mut self) {}
}

/// Algorithms the test client offers (one per slot).
struct Offer {
    kex: &'static str,
    host_key: &'static str,
    cipher: &'static str,
    mac: &'static str,
    compression: &'static str,
}

const GROUP14: Offer = Offer {
    kex: "diffie-hellman-group14-sha256",
    host_key: "rsa-sha2-256",
    cipher: "aes128-cbc",
    mac: "hmac-sha2-256",
    compression: "none",
};

struct Client {
    reader: PacketReader,
    writer: PacketWriter,
    algorithms: AlgorithmSet,
    session: JoinHandle<CsshResult<SessionEnd>>,
}

impl Client {
    async fn send(&mut self, message: Message) {
        self.writer.send(&message.encode()).await.unwrap();
    }

    async fn recv(&mut self) -> Message {
        let packet = timeout(Duration::from_secs(10), self.reader.read_packet())
            .await
            .expect("server did not answer")
            .unwrap();
        Message::decode(&packet.payload).unwrap()
    }
}

fn context(config: SshServerConfig) -> SessionContext {
    let factory = |_id: u32| -> Box<dyn ChannelApp> { Box::new(EchoApp { handle: None }) };
    let users = PasswordTable::new().with_user("alice", "secret", false);
    SessionContext {
        channel_counter: ChannelCounter::new(config.server_channels_max),
        config: Arc::new(config),
        host_key: HOST_KEY.clone(),
        auth_policy: Arc::new(users),
        app_factory: Arc::new(factory),
    }
}

/// Swaps the two directions so the client can reuse the server-side transport states.
fn mirror(set: &AlgorithmSet, keys: &KeyMaterial) -> (AlgorithmSet, KeyMaterial) {
    let set = AlgorithmSet {
        encryption_client_to_server: set.encryption_server_to_client,
        encryption_server_to_client: set.encryption_client_to_server,
        mac_client_to_server: set.mac_server_to_client,
        mac_server_to_client: set.mac_client_to_server,
        compression_client_to_server: set.compression_server_to_client,
        compression_server_to_client: set.compression_client_to_server,
        ..*set
    };
    let keys = KeyMaterial {
        iv_client_to_server: keys.iv_server_to_client.clone(),
        iv_server_to_client: keys.iv_client_to_server.clone(),
        enc_client_to_server: keys.enc_server_to_client.clone(),
        enc_server_to_client: keys.enc_client_to_server.clone(),
        mac_client_to_server: keys.mac_server_to_client.clone(),
        mac_server_to_client: keys.mac_client_to_server.clone(),
    };
    (set, keys)
}

/// Runs identification and key exchange; returns a client with keys active.
async fn connect(config: SshServerConfig, offer: &Offer) -> Client {
    let (client_end, server_end) = tokio::io::duplex(1 << 20);
    let controller = SessionController::new(server_end, "duplex", context(config));
    let session = tokio::spawn(controller.run());

    let (read_half, write_half) = tokio::io::split(client_end);
    let mut reader = PacketReader::new(Box::new(read_half));
    let mut writer = PacketWriter::new(Box::new(write_half));

    writer
        .write_raw(format!("{}\r\n", CLIENT_VERSION).as_bytes())
        .await
        .unwrap();
    let server_version = loop {
        let line = reader.read_line(8192).await.unwrap();
        let line = String::from_utf8(line).unwrap();
        if line.starts_with("SSH-") {
            break line.trim_end().to_string();
        }
        assert_eq!(line, "Hello, World!\r\n");
    };
    assert_eq!(server_version, "SSH-2.0-CustomSSH_0.1.0 Custom SSH server");

    let client_kexinit = KexInit::builder()
        .kex([offer.kex])
        .host_key([offer.host_key])
        .encryption([offer.cipher])
        .mac([offer.mac])
        .compression([offer.compression])
        .build();
    let i_c = client_kexinit.to_bytes();
    writer.send(&i_c).await.unwrap();

    let i_s = reader.read_packet().await.unwrap().payload;
    assert!(matches!(Message::decode(&i_s).unwrap(), Message::KexInit(_)));
    let algorithms = AlgorithmRegistry::default()
        .negotiate(&client_kexinit)
        .unwrap();
    assert_eq!(algorithms.kex.name(), offer.kex);

    // The server's DH half works equally well for the client side.
    let dh = DhServerExchange::new(algorithms.kex);
    let e = dh.public_key().clone();
    writer
        .send(&Message::KexdhInit(KexdhInit::new(e.clone())).encode())
        .await
        .unwrap();

    let reply = match Message::decode(&reader.read_packet().await.unwrap().payload).unwrap() {
        Message::KexdhReply(reply) => reply,
        other => panic!("expected KEXDH_REPLY, got {:?}", other),
    };
    assert_eq!(reply.host_key(), HOST_KEY.public_key_bytes().as_slice());

    let k = dh.compute_shared_secret(reply.f()).unwrap();
    let h = exchange_hash(
        algorithms.kex.hash(),
        &ExchangeHashInput {
            client_version: CLIENT_VERSION,
            server_version: &server_version,
            client_kexinit: &i_c,
            server_kexinit: &i_s,
            host_key: reply.host_key(),
            client_public: &e,
            server_public: reply.f(),
            shared_secret: &k,
        },
    );
    assert!(HOST_KEY.verify(&h, reply.signature()).unwrap());

    assert!(matches!(
        Message::decode(&reader.read_packet().await.unwrap().payload).unwrap(),
        Message::NewKeys
    ));
    let keys = KeyMaterial::derive(algorithms.kex.hash(), &k, &h, &h, &algorithms);
    let (client_set, client_keys) = mirror(&algorithms, &keys);
    reader.activate(DirectionState::inbound(&client_set, &client_keys).unwrap());

    writer.send(&Message::NewKeys.encode()).await.unwrap();
    writer.activate(DirectionState::outbound(&client_set, &client_keys).unwrap());

    Client {
        reader,
        writer,
        algorithms,
        session,
    }
}

async fn authenticate(client: &mut Client) {
    client
        .send(Message::ServiceRequest(ServiceRequest::new("ssh-userauth")))
        .await;
    assert!(matches!(client.recv().await, Message::ServiceAccept(a) if a.service_name() == "ssh-userauth"));

    let wrong = AuthRequest::new("alice", "ssh-connection", AuthMethod::password("nope"));
    client.send(Message::UserauthRequest(wrong)).await;
    match client.recv().await {
        Message::UserauthBanner(b) => assert_eq!(b.message(), "Authorized use only"),
        other => panic!("expected banner, got {:?}", other),
    }
    match client.recv().await {
        Message::UserauthFailure(f) => {
            assert!(f.methods_can_continue().iter().any(|m| m == "password"));
            assert!(!f.partial_success());
        }
        other => panic!("expected failure, got {:?}", other),
    }

    let right = AuthRequest::new("alice", "ssh-connection", AuthMethod::password("secret"));
    client.send(Message::UserauthRequest(right)).await;
    assert!(matches!(client.recv().await, Message::UserauthSuccess));

    client
        .send(Message::ServiceRequest(ServiceRequest::new("ssh-connection")))
        .await;
    assert!(matches!(client.recv().await, Message::ServiceAccept(_)));
}

fn strict_config() -> SshServerConfig {
    SshServerConfig::builder()
        .with_auth_required(true)
        .with_userauth_banner("Authorized use only")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_full_session_group14() {
    let mut client = connect(strict_config(), &GROUP14).await;
    authenticate(&mut client).await;

    client
        .send(Message::ChannelOpen(ChannelOpen::new(
            ChannelType::Session,
            3,
            1 << 20,
            32_768,
        )))
        .await;
    let server_channel = match client.recv().await {
        Message::ChannelOpenConfirmation(c) => {
            assert_eq!(c.recipient_channel(), 3);
            c.sender_channel()
        }
        other => panic!("expected confirmation, got {:?}", other),
    };
    assert_eq!(server_channel, 0);

    // A second channel exceeds the per-client limit of one.
    client
        .send(Message::ChannelOpen(ChannelOpen::new(ChannelType::Session, 4, 1024, 1024)))
        .await;
    assert!(matches!(client.recv().await, Message::ChannelOpenFailure(f) if f.reason_code() == 4));

    let pty = ChannelRequestType::PtyReq {
        term: "xterm".to_string(),
        width_chars: 80,
        height_rows: 24,
        width_pixels: 0,
        height_pixels: 0,
        modes: vec![53, 0, 0, 0, 1, 0],
    };
    client
        .send(Message::ChannelRequest(ChannelRequest::new(server_channel, pty, true)))
        .await;
    assert!(matches!(client.recv().await, Message::ChannelSuccess(s) if s.recipient_channel() == 3));

    client
        .send(Message::ChannelRequest(ChannelRequest::new(
            server_channel,
            ChannelRequestType::Shell,
            true,
        )))
        .await;
    // The application greets before the request is acknowledged.
    match client.recv().await {
        Message::ChannelData(d) => assert_eq!(d.data(), b"welcome xterm\r\n"),
        other => panic!("expected greeting, got {:?}", other),
    }
    assert!(matches!(client.recv().await, Message::ChannelSuccess(_)));

    client
        .send(Message::ChannelData(ChannelData::new(server_channel, b"ping".to_vec())))
        .await;
    match client.recv().await {
        Message::ChannelData(d) => {
            assert_eq!(d.recipient_channel(), 3);
            assert_eq!(d.data(), b"ping");
        }
        other => panic!("expected echo, got {:?}", other),
    }

    // Global requests are refused.
    let global = cssh_proto::ssh::connection::GlobalRequest::new("keepalive@openssh.com", true, Vec::new());
    client.send(Message::GlobalRequest(global)).await;
    assert!(matches!(client.recv().await, Message::RequestFailure));

    client.send(Message::ChannelEof(ChannelEof::new(server_channel))).await;
    assert!(matches!(client.recv().await, Message::ChannelEof(_)));
    assert!(matches!(client.recv().await, Message::ChannelClose(c) if c.recipient_channel() == 3));
    client.send(Message::ChannelClose(ChannelClose::new(server_channel))).await;

    client
        .send(Message::Disconnect(Disconnect::new(
            DisconnectReason::ByApplication,
            "done",
        )))
        .await;
    let end = client.session.await.unwrap().unwrap();
    assert_eq!(
        end,
        SessionEnd::PeerDisconnected {
            reason: DisconnectReason::ByApplication as u32,
            description: "done".to_string(),
        }
    );
}

#[tokio::test]
async fn test_group16_with_zlib() {
    let offer = Offer {
        kex: "diffie-hellman-group16-sha512",
        host_key: "rsa-sha2-512",
        cipher: "aes256-cbc",
        mac: "hmac-sha1",
        compression: "zlib",
    };
    let mut client = connect(SshServerConfig::default(), &offer).await;
    assert_eq!(client.algorithms.encryption_server_to_client.name(), "aes256-cbc");

    client
        .send(Message::ServiceRequest(ServiceRequest::new("ssh-userauth")))
        .await;
    assert!(matches!(client.recv().await, Message::ServiceAccept(_)));

    // "none" succeeds when authentication is not required.
    let none = AuthRequest::new("anyone", "ssh-connection", AuthMethod::None);
    client.send(Message::UserauthRequest(none)).await;
    assert!(matches!(client.recv().await, Message::UserauthSuccess));

    client
        .send(Message::ChannelOpen(ChannelOpen::new(ChannelType::Session, 0, 1 << 20, 1 << 15)))
        .await;
    assert!(matches!(client.recv().await, Message::ChannelOpenConfirmation(_)));
    client.writer.shutdown().await.unwrap();
    let end = client.session.await.unwrap().unwrap();
    assert_eq!(end, SessionEnd::ConnectionClosed);
}

#[tokio::test]
async fn test_ssh_rsa_signature_over_group14_sha1() {
    let offer = Offer {
        kex: "diffie-hellman-group14-sha1",
        host_key: "ssh-rsa",
        cipher: "aes128-cbc",
        mac: "hmac-sha1",
        compression: "none",
    };
    let mut client = connect(SshServerConfig::default(), &offer).await;
    client
        .send(Message::ServiceRequest(ServiceRequest::new("ssh-userauth")))
        .await;
    assert!(matches!(client.recv().await, Message::ServiceAccept(_)));
}

#[tokio::test]
async fn test_channel_before_auth_is_fatal() {
    let mut client = connect(strict_config(), &GROUP14).await;
    client
        .send(Message::ChannelOpen(ChannelOpen::new(ChannelType::Session, 0, 1024, 1024)))
        .await;
    match client.recv().await {
        Message::Disconnect(d) => assert_eq!(d.reason_code(), DisconnectReason::ProtocolError as u32),
        other => panic!("expected disconnect, got {:?}", other),
    }
    assert!(matches!(client.session.await.unwrap(), Err(CsshError::Protocol(_))));
}

#[tokio::test]
async fn test_connection_service_needs_auth() {
    let mut client = connect(strict_config(), &GROUP14).await;
    client
        .send(Message::ServiceRequest(ServiceRequest::new("ssh-connection")))
        .await;
    match client.recv().await {
        Message::Disconnect(d) => {
            assert_eq!(d.reason_code(), DisconnectReason::ServiceNotAvailable as u32)
        }
        other => panic!("expected disconnect, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rekey_is_refused() {
    let mut client = connect(SshServerConfig::default(), &GROUP14).await;
    let again = KexInit::builder()
        .kex([GROUP14.kex])
        .host_key([GROUP14.host_key])
        .encryption([GROUP14.cipher])
        .mac([GROUP14.mac])
        .compression([GROUP14.compression])
        .build();
    client.send(Message::KexInit(again)).await;
    match client.recv().await {
        Message::Disconnect(d) => {
            assert_eq!(d.reason_code(), DisconnectReason::KeyExchangeFailed as u32)
        }
        other => panic!("expected disconnect, got {:?}", other),
    }
}

#[tokio::test]
async fn test_bad_mac_disconnects() {
    let mut client = connect(SshServerConfig::default(), &GROUP14).await;
    let mut wire = client
        .writer
        .compile(&Message::ServiceRequest(ServiceRequest::new("ssh-userauth")).encode())
        .unwrap();
    if let Some(last) = wire.last_mut() {
        *last ^= 0x01;
    }
    client.writer.write_raw(&wire).await.unwrap();

    match client.recv().await {
        Message::Disconnect(d) => assert_eq!(d.reason_code(), DisconnectReason::MacError as u32),
        other => panic!("expected disconnect, got {:?}", other),
    }
    assert!(matches!(
        client.session.await.unwrap(),
        Err(CsshError::MacVerification { sequence: 3 })
    ));
}
