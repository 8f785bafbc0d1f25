//! SSH server: configuration, host key setup and the TCP accept loop.
//!
//! # Example
//!
//! ```rust,no_run
//! use cssh_proto::ssh::auth::PasswordTable;
//! use cssh_proto::ssh::channel::{ChannelApp, ChannelHandle};
//! use cssh_proto::ssh::pty::PseudoTerminalConfig;
//! use cssh_proto::ssh::server::{SshServer, SshServerConfig};
//! use cssh_platform::CsshResult;
//! use std::sync::Arc;
//!
//! struct Echo(Option<ChannelHandle>);
//!
//! #[async_trait::async_trait]
//! impl ChannelApp for Echo {
//!     async fn start(&mut self, handle: ChannelHandle, _pty: &PseudoTerminalConfig) -> CsshResult<()> {
//!         self.0 = Some(handle);
//!         Ok(())
//!     }
//!     async fn handle_data(&mut self, data: &[u8]) -> CsshResult<()> {
//!         match &self.0 {
//!             Some(handle) => handle.send_data(data).await,
//!             None => Ok(()),
//!         }
//!     }
//!     async fn stop(&mut self) {}
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> CsshResult<()> {
//! let config = SshServerConfig::builder()
//!     .with_auth_required(true)
//!     .build()?;
//! let users = PasswordTable::new().with_user("admin", "secret", false);
//! let factory = |_id: u32| -> Box<dyn ChannelApp> { Box::new(Echo(None)) };
//!
//! let server = SshServer::bind("127.0.0.1:2222", config, Arc::new(users), Arc::new(factory)).await?;
//! server.serve().await
//! # }
//! ```

use crate::ssh::algorithms::AlgorithmRegistry;
use crate::ssh::auth::AuthPolicy;
use crate::ssh::channel::{ChannelAppFactory, ChannelCounter};
use crate::ssh::hostkey::{HostKey, RsaHostKey};
use crate::ssh::session::{SessionContext, SessionController};
use crate::ssh::version::MAX_VERSION_LENGTH;
use cssh_platform::{CsshError, CsshResult};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Size of the RSA host key generated when no key file is configured.
pub const GENERATED_HOST_KEY_BITS: usize = 2048;

/// SSH server configuration.
#[derive(Debug, Clone)]
pub struct SshServerConfig {
    /// Software version in our identification line
    pub software_version: String,
    /// Comment after the software version
    pub comments: Option<String>,
    /// Lines sent before the identification line
    pub banner_lines: Vec<String>,
    /// PEM host key (PKCS#1 or PKCS#8); a key is generated when unset
    pub host_key_path: Option<PathBuf>,
    /// When false, the "none" authentication method succeeds
    pub auth_required: bool,
    /// USERAUTH_BANNER text
    pub userauth_banner: Option<String>,
    /// Failed authentication attempts before disconnecting
    pub max_auth_attempts: u32,
    /// Channels one client may hold open
    pub client_channels_max: usize,
    /// Channels open across the whole server
    pub server_channels_max: usize,
    /// Receive window advertised per channel
    pub initial_window_size: u32,
    /// Largest channel data packet accepted
    pub maximum_packet_size: u32,
    /// Algorithm catalogue
    pub algorithms: AlgorithmRegistry,
}

impl Default for SshServerConfig {
    fn default() -> Self {
        Self {
            software_version: "CustomSSH_0.1.0".to_string(),
            comments: Some("Custom SSH server".to_string()),
            banner_lines: vec!["Hello, World!".to_string()],
            host_key_path: None,
            auth_required: false,
            userauth_banner: None,
            max_auth_attempts: 6,
            client_channels_max: 1,
            server_channels_max: 1,
            initial_window_size: 1_048_576,
            maximum_packet_size: 16_384,
            algorithms: AlgorithmRegistry::default(),
        }
    }
}

impl SshServerConfig {
    /// Builder starting from the defaults.
    pub fn builder() -> SshServerConfigBuilder {
        SshServerConfigBuilder::new()
    }

    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> CsshResult<()> {
        for line in &self.banner_lines {
            if line.starts_with("SSH-") {
                return Err(CsshError::Config(format!(
                    "Banner line must not start with 'SSH-': {:?}",
                    line
                )));
            }
            if line.contains('\r') || line.contains('\n') {
                return Err(CsshError::Config(
                    "Banner lines must not contain CR or LF".to_string(),
                ));
            }
        }

        let identification = match &self.comments {
            Some(c) => format!("SSH-2.0-{} {}\r\n", self.software_version, c),
            None => format!("SSH-2.0-{}\r\n", self.software_version),
        };
        if identification.len() > MAX_VERSION_LENGTH {
            return Err(CsshError::Config(format!(
                "Identification line is {} bytes (max {})",
                identification.len(),
                MAX_VERSION_LENGTH
            )));
        }
        if self.software_version.is_empty()
            || self.software_version.contains(|c: char| c == '-' || c.is_whitespace())
        {
            return Err(CsshError::Config(format!(
                "Invalid software version: {:?}",
                self.software_version
            )));
        }

        if self.client_channels_max == 0 || self.server_channels_max == 0 {
            return Err(CsshError::Config(
                "Channel limits must be at least 1".to_string(),
            ));
        }
        if self.maximum_packet_size == 0 {
            return Err(CsshError::Config(
                "maximum_packet_size must be nonzero".to_string(),
            ));
        }
        self.algorithms.validate()
    }
}

/// Builder for [`SshServerConfig`]
#[derive(Debug, Default)]
pub struct SshServerConfigBuilder {
    config: SshServerConfig,
}

impl SshServerConfigBuilder {
    /// Create a builder holding the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the software version and comment of the identification line
    pub fn with_software_version(
        mut self,
        software_version: impl Into<String>,
        comments: Option<&str>,
    ) -> Self {
        self.config.software_version = software_version.into();
        self.config.comments = comments.map(str::to_string);
        self
    }

    /// Set the lines sent before the identification line
    pub fn with_banner_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.banner_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Set the host key file
    pub fn with_host_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.host_key_path = Some(path.into());
        self
    }

    /// Require a real authentication method
    pub fn with_auth_required(mut self, required: bool) -> Self {
        self.config.auth_required = required;
        self
    }

    /// Set the USERAUTH_BANNER text
    pub fn with_userauth_banner(mut self, banner: impl Into<String>) -> Self {
        self.config.userauth_banner = Some(banner.into());
        self
    }

    /// Set the number of failed attempts allowed
    pub fn with_max_auth_attempts(mut self, attempts: u32) -> Self {
        self.config.max_auth_attempts = attempts;
        self
    }

    /// Set the per-client and server-wide channel limits
    pub fn with_channel_limits(mut self, per_client: usize, server_wide: usize) -> Self {
        self.config.client_channels_max = per_client;
        self.config.server_channels_max = server_wide;
        self
    }

    /// Set the advertised window and packet size
    pub fn with_window(mut self, initial_window_size: u32, maximum_packet_size: u32) -> Self {
        self.config.initial_window_size = initial_window_size;
        self.config.maximum_packet_size = maximum_packet_size;
        self
    }

    /// Replace the algorithm catalogue
    pub fn with_algorithms(mut self, algorithms: AlgorithmRegistry) -> Self {
        self.config.algorithms = algorithms;
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> CsshResult<SshServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Loads the configured host key or generates one.
pub fn load_host_key(config: &SshServerConfig) -> CsshResult<RsaHostKey> {
    match &config.host_key_path {
        Some(path) => RsaHostKey::load_pem_file(path),
        None => {
            warn!(
                bits = GENERATED_HOST_KEY_BITS,
                "no host key configured, generating an ephemeral key"
            );
            RsaHostKey::generate(GENERATED_HOST_KEY_BITS)
        }
    }
}

/// SSH server listening on one TCP socket.
pub struct SshServer {
    listener: TcpListener,
    context: SessionContext,
}

impl SshServer {
    /// Validates `config`, loads the host key and binds `addr`.
    pub async fn bind(
        addr: &str,
        config: SshServerConfig,
        auth_policy: Arc<dyn AuthPolicy>,
        app_factory: Arc<dyn ChannelAppFactory>,
    ) -> CsshResult<Self> {
        config.validate()?;
        let host_key: Arc<dyn HostKey> = Arc::new(load_host_key(&config)?);
        Self::bind_with_host_key(addr, config, host_key, auth_policy, app_factory).await
    }

    /// Binds `addr` with an already loaded host key.
    pub async fn bind_with_host_key(
        addr: &str,
        config: SshServerConfig,
        host_key: Arc<dyn HostKey>,
        auth_policy: Arc<dyn AuthPolicy>,
        app_factory: Arc<dyn ChannelAppFactory>,
    ) -> CsshResult<Self> {
        config.validate()?;
        let listener = TcpListener::bind(addr).await?;
        info!(
            addr = %listener.local_addr()?,
            fingerprint = %host_key.fingerprint(),
            "SSH server listening"
        );

        let context = SessionContext {
            channel_counter: ChannelCounter::new(config.server_channels_max),
            config: Arc::new(config),
            host_key,
            auth_policy,
            app_factory,
        };
        Ok(Self { listener, context })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> CsshResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Host key fingerprint in OpenSSH format.
    pub fn fingerprint(&self) -> String {
        self.context.host_key.fingerprint()
    }

    /// Shared state handed to every session.
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Waits for one client and returns its unstarted session.
    pub async fn accept(&self) -> CsshResult<(SessionController, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        info!(peer = %peer, "connection accepted");
        let controller = SessionController::new(stream, peer.to_string(), self.context.clone());
        Ok((controller, peer))
    }

    /// Accepts connections forever, one task per connection.
    pub async fn serve(self) -> CsshResult<()> {
        loop {
            let (controller, peer) = match self.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            tokio::spawn(async move {
                if let Err(e) = controller.run().await {
                    warn!(peer = %peer, error = %e, "session failed");
                }
            });
        }
    }
}

impl std::fmt::Debug for SshServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("context", &self.context)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::auth::PasswordTable;
    use crate::ssh::channel::{ChannelApp, ChannelHandle};
    use crate::ssh::pty::PseudoTerminalConfig;
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    struct Nop;

    #[async_trait]
    impl ChannelApp for Nop {
        async fn start(&mut self, _handle: ChannelHandle, _pty: &PseudoTerminalConfig) -> CsshResult<()> {
            Ok(())
        }
        async fn handle_data(&mut self, _data: &[u8]) -> CsshResult<()> {
            Ok(())
        }
        async fn stop(&mut self) {}
    }

    #[test]
    fn test_default_config() {
        let config = SshServerConfig::default();
        assert_eq!(config.software_version, "CustomSSH_0.1.0");
        assert_eq!(config.banner_lines, vec!["Hello, World!"]);
        assert_eq!(config.max_auth_attempts, 6);
        assert_eq!(config.client_channels_max, 1);
        assert_eq!(config.server_channels_max, 1);
        assert_eq!(config.initial_window_size, 1_048_576);
        assert_eq!(config.maximum_packet_size, 16_384);
        assert!(!config.auth_required);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SshServerConfig::builder()
            .with_software_version("Bar", None)
            .with_banner_lines(["one", "two"])
            .with_auth_required(true)
            .with_userauth_banner("Authorized use only")
            .with_channel_limits(4, 16)
            .build()
            .unwrap();
        assert_eq!(config.software_version, "Bar");
        assert_eq!(config.comments, None);
        assert_eq!(config.banner_lines.len(), 2);
        assert_eq!(config.server_channels_max, 16);
        assert_eq!(config.userauth_banner.as_deref(), Some("Authorized use only"));
    }

    #[test]
    fn test_validate_rejects() {
        let cases = [
            SshServerConfig::builder().with_banner_lines(["SSH-2.0-fake"]),
            SshServerConfig::builder().with_banner_lines(["two\r\nlines"]),
            SshServerConfig::builder().with_software_version("x".repeat(260), None),
            SshServerConfig::builder().with_software_version("bad name", None),
            SshServerConfig::builder().with_channel_limits(0, 1),
            SshServerConfig::builder().with_window(1024, 0),
        ];
        for builder in cases {
            assert!(matches!(builder.build(), Err(CsshError::Config(_))));
        }
    }

    #[test]
    fn test_load_host_key_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = SshServerConfig::builder()
            .with_host_key_path(dir.path().join("missing.pem"))
            .build()
            .unwrap();
        assert!(matches!(load_host_key(&config), Err(CsshError::Config(_))));
    }

    #[tokio::test]
    async fn test_accept_and_identify() {
        let key: Arc<dyn HostKey> = Arc::new(RsaHostKey::generate(1024).unwrap());
        let factory = |_id: u32| -> Box<dyn ChannelApp> { Box::new(Nop) };
        let config = SshServerConfig::builder()
            .with_software_version("Bar", None)
            .with_banner_lines(Vec::<String>::new())
            .build()
            .unwrap();
        let server = SshServer::bind_with_host_key(
            "127.0.0.1:0",
            config,
            key,
            Arc::new(PasswordTable::new()),
            Arc::new(factory),
        )
        .await
        .unwrap();
        assert!(server.fingerprint().starts_with("SHA256:"));
        let addr = server.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"SSH-2.0-Foo\r\n").await.unwrap();
            let mut line = vec![0u8; 13];
            stream.read_exact(&mut line).await.unwrap();
            line
        });

        let (controller, _peer) = server.accept().await.unwrap();
        let session = tokio::spawn(controller.run());
        assert_eq!(client.await.unwrap(), b"SSH-2.0-Bar\r\n");
        // Client dropped its socket.
        assert!(session.await.unwrap().is_ok());
    }
}
