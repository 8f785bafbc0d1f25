//! Echo server example.
//!
//! Accepts password logins and runs a line-echo application on every
//! session channel that requests a shell.
//!
//! Usage:
//!   cargo run --example echo_server -- --addr 127.0.0.1:2222 --user alice --password secret
//!
//! Then connect with any SSH client:
//!   ssh -p 2222 -o KexAlgorithms=diffie-hellman-group14-sha256 alice@127.0.0.1

use async_trait::async_trait;
use clap::Parser;
use cssh_platform::CsshResult;
use cssh_proto::ssh::auth::PasswordTable;
use cssh_proto::ssh::channel::{ChannelApp, ChannelHandle};
use cssh_proto::ssh::pty::{PseudoTerminalConfig, WindowSize};
use cssh_proto::ssh::server::{SshServer, SshServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "SSH echo server")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:2222")]
    addr: String,

    /// PEM-encoded RSA host key; a fresh key is generated when absent
    #[arg(long)]
    host_key: Option<PathBuf>,

    /// Accepted user name
    #[arg(long, default_value = "alice")]
    user: String,

    /// Password for `--user`
    #[arg(long, default_value = "secret")]
    password: String,

    /// Allow the "none" method to succeed
    #[arg(long)]
    no_auth: bool,

    /// Concurrent session channels across all clients
    #[arg(long, default_value_t = 8)]
    max_channels: usize,
}

/// Echoes input back, turning CR into CR LF; Ctrl-D closes the channel.
struct LineEcho {
    handle: Option<ChannelHandle>,
}

#[async_trait]
impl ChannelApp for LineEcho {
    async fn start(&mut self, handle: ChannelHandle, pty: &PseudoTerminalConfig) -> CsshResult<()> {
        let term = pty
            .environment()
            .get("TERM")
            .map(String::as_str)
            .unwrap_or("dumb");
        handle
            .send_data(format!("echo server ready ({})\r\n", term).as_bytes())
            .await?;
        self.handle = Some(handle);
        Ok(())
    }

    async fn handle_data(&mut self, data: &[u8]) -> CsshResult<()> {
        let Some(handle) = &self.handle else {
            return Ok(());
        };
        if data.contains(&0x04) {
            handle.send_exit_status(0).await?;
            return handle.close().await;
        }
        let mut out = Vec::with_capacity(data.len() * 2);
        for &byte in data {
            out.push(byte);
            if byte == b'\r' {
                out.push(b'\n');
            }
        }
        handle.send_data(&out).await
    }

    async fn window_changed(&mut self, size: WindowSize) -> CsshResult<()> {
        info!(?size, "window changed");
        Ok(())
    }

    async fn stop(&mut self) {
        info!("echo application stopped");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut builder = SshServerConfig::builder()
        .with_auth_required(!args.no_auth)
        .with_userauth_banner("cssh echo server\r\n")
        .with_channel_limits(1, args.max_channels);
    if let Some(path) = &args.host_key {
        builder = builder.with_host_key_path(path);
    }
    let config = builder.build()?;

    let users = PasswordTable::new().with_user(&args.user, &args.password, false);
    let factory = |_id: u32| -> Box<dyn ChannelApp> { Box::new(LineEcho { handle: None }) };

    let server = SshServer::bind(&args.addr, config, Arc::new(users), Arc::new(factory)).await?;
    println!("Listening on {}", server.local_addr()?);
    println!("Host key fingerprint: {}", server.fingerprint());

    server.serve().await?;
    Ok(())
}
