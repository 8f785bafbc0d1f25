//! SSH channel multiplexing (RFC 4254 Section 5).
//!
//! [`ChannelMultiplexer`] owns the table of open channels for one connection
//! and answers every `CHANNEL_*` message the session loop hands it. Each
//! session channel may run one [`ChannelApp`], created by a
//! [`ChannelAppFactory`] when the client asks for a `shell`. Applications
//! talk back to the client through a cloneable [`ChannelHandle`].
//!
//! # Channel lifecycle
//!
//! ```text
//! Opening -> Open -> ClosingLocal  -> Closed
//!                 -> ClosingRemote -> Closed
//! ```
//!
//! A channel is removed, its application stopped and its id freed only after
//! CLOSE went out in both directions. Our CLOSE is sent at most once, whichever
//! side (the multiplexer or an application) asks for it first.

use crate::ssh::connection::{
    ChannelClose, ChannelData, ChannelEof, ChannelExtendedData, ChannelFailure, ChannelOpen,
    ChannelOpenConfirmation, ChannelOpenFailure, ChannelOpenFailureReason, ChannelRequest,
    ChannelRequestType, ChannelSuccess, ChannelType, ChannelWindowAdjust, EXTENDED_DATA_STDERR,
};
use crate::ssh::message::Message;
use crate::ssh::pty::{PseudoTerminalConfig, WindowSize};
use crate::ssh::transport::PacketSender;
use async_trait::async_trait;
use cssh_platform::{CsshError, CsshResult};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest data chunk per packet, whatever the client advertises.
///
/// Every implementation must accept 32768 bytes of payload data, and the
/// framed packet stays under [`crate::ssh::packet::MAX_PACKET_SIZE`].
pub const MAX_DATA_CHUNK: u32 = 32_768;

/// Channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Accepted, confirmation not yet sent
    Opening,
    /// Open in both directions
    Open,
    /// We sent CLOSE, the peer has not
    ClosingLocal,
    /// The peer sent CLOSE, we have not
    ClosingRemote,
    /// CLOSE sent both ways
    Closed,
}

/// Application attached to a session channel.
///
/// Methods are awaited from the connection's read loop, so long-running work
/// belongs in a task spawned from [`start`](ChannelApp::start).
#[async_trait]
pub trait ChannelApp: Send {
    /// Called once when the client requests a shell.
    async fn start(&mut self, handle: ChannelHandle, pty: &PseudoTerminalConfig) -> CsshResult<()>;

    /// Bytes received on the channel.
    async fn handle_data(&mut self, data: &[u8]) -> CsshResult<()>;

    /// The client changed the terminal size.
    async fn window_changed(&mut self, _size: WindowSize) -> CsshResult<()> {
        Ok(())
    }

    /// The client will send no more data.
    async fn eof(&mut self) -> CsshResult<()> {
        Ok(())
    }

    /// Called once when the channel is torn down.
    async fn stop(&mut self);
}

/// Creates one [`ChannelApp`] per `shell` request.
pub trait ChannelAppFactory: Send + Sync {
    /// Builds the application for channel `channel_id`.
    fn create(&self, channel_id: u32) -> Box<dyn ChannelApp>;
}

impl<F> ChannelAppFactory for F
where
    F: Fn(u32) -> Box<dyn ChannelApp> + Send + Sync,
{
    fn create(&self, channel_id: u32) -> Box<dyn ChannelApp> {
        self(channel_id)
    }
}

/// Server-wide count of open channels, shared by every connection.
#[derive(Debug, Clone)]
pub struct ChannelCounter {
    open: Arc<AtomicUsize>,
    max: usize,
}

impl ChannelCounter {
    /// Counter allowing at most `max` channels at once.
    pub fn new(max: usize) -> Self {
        Self {
            open: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    /// Channels currently open across all connections.
    pub fn open(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    /// Reserves one slot; `false` when the ceiling is reached.
    pub fn try_acquire(&self) -> bool {
        self.open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .is_ok()
    }

    /// Frees one slot.
    pub fn release(&self) {
        let _ = self
            .open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Per-connection channel parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLimits {
    /// Channels one client may hold open
    pub client_channels_max: usize,
    /// Receive window we advertise
    pub initial_window_size: u32,
    /// Largest data packet we accept
    pub maximum_packet_size: u32,
}

impl Default for ChannelLimits {
    fn default() -> Self {
        Self {
            client_channels_max: 1,
            initial_window_size: 1_048_576,
            maximum_packet_size: 16_384,
        }
    }
}

#[derive(Debug, Default)]
struct SharedState {
    local_closed: AtomicBool,
    eof_sent: AtomicBool,
    remote_window: AtomicU32,
}

/// Application-side handle on one channel.
#[derive(Clone)]
pub struct ChannelHandle {
    local_id: u32,
    remote_id: u32,
    chunk_size: u32,
    sender: PacketSender,
    shared: Arc<SharedState>,
}

impl ChannelHandle {
    fn new(
        local_id: u32,
        remote_id: u32,
        remote_window: u32,
        remote_max_packet: u32,
        sender: PacketSender,
    ) -> Self {
        let shared = SharedState {
            remote_window: AtomicU32::new(remote_window),
            ..SharedState::default()
        };
        Self {
            local_id,
            remote_id,
            chunk_size: remote_max_packet.clamp(1, MAX_DATA_CHUNK),
            sender,
            shared: Arc::new(shared),
        }
    }

    /// Our channel number.
    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    /// The client's channel number.
    pub fn remote_id(&self) -> u32 {
        self.remote_id
    }

    /// Window the client has granted us, as last tracked.
    pub fn remote_window(&self) -> u32 {
        self.shared.remote_window.load(Ordering::Acquire)
    }

    /// Whether our CLOSE has been sent.
    pub fn is_closed(&self) -> bool {
        self.shared.local_closed.load(Ordering::Acquire)
    }

    /// Sends CHANNEL_DATA, split into the client's maximum packet size
    /// (at most [`MAX_DATA_CHUNK`]).
    pub async fn send_data(&self, data: &[u8]) -> CsshResult<()> {
        for chunk in data.chunks(self.chunk_size as usize) {
            self.ensure_open()?;
            self.consume_remote_window(chunk.len());
            let message = Message::ChannelData(ChannelData::new(self.remote_id, chunk.to_vec()));
            self.sender.send_message(&message).await?;
        }
        Ok(())
    }

    /// Sends CHANNEL_EXTENDED_DATA of type stderr.
    pub async fn send_stderr(&self, data: &[u8]) -> CsshResult<()> {
        for chunk in data.chunks(self.chunk_size as usize) {
            self.ensure_open()?;
            self.consume_remote_window(chunk.len());
            let message = Message::ChannelExtendedData(ChannelExtendedData::new(
                self.remote_id,
                EXTENDED_DATA_STDERR,
                chunk.to_vec(),
            ));
            self.sender.send_message(&message).await?;
        }
        Ok(())
    }

    /// Sends CHANNEL_EOF once; later calls do nothing.
    pub async fn send_eof(&self) -> CsshResult<()> {
        self.ensure_open()?;
        if self.shared.eof_sent.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.sender
            .send_message(&Message::ChannelEof(ChannelEof::new(self.remote_id)))
            .await
    }

    /// Sends an `exit-status` request without asking for a reply.
    pub async fn send_exit_status(&self, exit_status: u32) -> CsshResult<()> {
        self.ensure_open()?;
        let request = ChannelRequest::new(
            self.remote_id,
            ChannelRequestType::ExitStatus { exit_status },
            false,
        );
        self.sender
            .send_message(&Message::ChannelRequest(request))
            .await
    }

    /// Sends CHANNEL_CLOSE unless it was already sent.
    pub async fn close(&self) -> CsshResult<()> {
        if self.shared.local_closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(channel = self.local_id, "sending close");
        self.sender
            .send_message(&Message::ChannelClose(ChannelClose::new(self.remote_id)))
            .await
    }

    fn ensure_open(&self) -> CsshResult<()> {
        if self.is_closed() {
            return Err(CsshError::Protocol(format!(
                "Channel {} is closed",
                self.local_id
            )));
        }
        Ok(())
    }

    fn consume_remote_window(&self, len: usize) {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        let _ = self
            .shared
            .remote_window
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                Some(w.saturating_sub(len))
            });
    }

    fn grow_remote_window(&self, bytes: u32) {
        let _ = self
            .shared
            .remote_window
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                Some(w.saturating_add(bytes))
            });
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("local_id", &self.local_id)
            .field("remote_id", &self.remote_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One session channel.
struct Channel {
    handle: ChannelHandle,
    opened: bool,
    remote_closed: bool,
    local_window: u32,
    pty: PseudoTerminalConfig,
    app: Option<Box<dyn ChannelApp>>,
}

impl Channel {
    fn state(&self) -> ChannelState {
        match (self.handle.is_closed(), self.remote_closed) {
            (true, true) => ChannelState::Closed,
            (true, false) => ChannelState::ClosingLocal,
            (false, true) => ChannelState::ClosingRemote,
            (false, false) if self.opened => ChannelState::Open,
            (false, false) => ChannelState::Opening,
        }
    }
}

/// Channel table for one connection.
pub struct ChannelMultiplexer {
    sender: PacketSender,
    factory: Arc<dyn ChannelAppFactory>,
    counter: ChannelCounter,
    limits: ChannelLimits,
    channels: BTreeMap<u32, Channel>,
}

impl ChannelMultiplexer {
    /// Creates an empty table sending through `sender`.
    pub fn new(
        sender: PacketSender,
        factory: Arc<dyn ChannelAppFactory>,
        counter: ChannelCounter,
        limits: ChannelLimits,
    ) -> Self {
        Self {
            sender,
            factory,
            counter,
            limits,
            channels: BTreeMap::new(),
        }
    }

    /// Number of channels in the table.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is open.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// State of channel `id`, if present.
    pub fn state(&self, id: u32) -> Option<ChannelState> {
        self.channels.get(&id).map(Channel::state)
    }

    /// Terminal settings of channel `id`, if present.
    pub fn pty(&self, id: u32) -> Option<&PseudoTerminalConfig> {
        self.channels.get(&id).map(|c| &c.pty)
    }

    /// Application handle of channel `id`, if present.
    pub fn handle(&self, id: u32) -> Option<ChannelHandle> {
        self.channels.get(&id).map(|c| c.handle.clone())
    }

    /// Handles one connection-layer message.
    ///
    /// # Errors
    ///
    /// Returns [`CsshError::Protocol`] for messages naming an unknown channel
    /// or that a server never receives. Transport failures propagate.
    pub async fn handle_message(&mut self, message: Message) -> CsshResult<()> {
        match message {
            Message::ChannelOpen(open) => self.handle_open(&open).await,
            Message::ChannelRequest(request) => self.handle_request(request).await,
            Message::ChannelData(data) => {
                let recipient = data.recipient_channel();
                self.handle_data(recipient, data.into_data()).await
            }
            Message::ChannelExtendedData(data) => self.handle_extended_data(&data).await,
            Message::ChannelWindowAdjust(adjust) => self.handle_window_adjust(&adjust),
            Message::ChannelEof(eof) => self.handle_eof(eof.recipient_channel()).await,
            Message::ChannelClose(close) => self.handle_close(close.recipient_channel()).await,
            Message::ChannelSuccess(m) => {
                debug!(channel = m.recipient_channel(), "peer channel success");
                Ok(())
            }
            Message::ChannelFailure(m) => {
                debug!(channel = m.recipient_channel(), "peer channel failure");
                Ok(())
            }
            other => Err(CsshError::Protocol(format!(
                "Unexpected {} on the connection layer",
                other.message_type()
            ))),
        }
    }

    /// Answers CHANNEL_OPEN with a confirmation or a failure.
    pub async fn handle_open(&mut self, open: &ChannelOpen) -> CsshResult<()> {
        match self.open_channel(open) {
            Ok(id) => {
                let confirmation = ChannelOpenConfirmation::new(
                    open.sender_channel(),
                    id,
                    self.limits.initial_window_size,
                    self.limits.maximum_packet_size,
                );
                self.sender
                    .send_message(&Message::ChannelOpenConfirmation(confirmation))
                    .await?;
                if let Some(channel) = self.channels.get_mut(&id) {
                    channel.opened = true;
                }
                info!(channel = id, peer_channel = open.sender_channel(), "channel opened");
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                let reason = match e {
                    CsshError::ChannelLimitExceeded => ChannelOpenFailureReason::ResourceShortage,
                    CsshError::UnsupportedChannelType(ref name) if is_prohibited(name) => {
                        ChannelOpenFailureReason::AdministrativelyProhibited
                    }
                    _ => ChannelOpenFailureReason::UnknownChannelType,
                };
                warn!(channel_type = open.channel_type().name(), error = %e, "channel open rejected");
                let failure = ChannelOpenFailure::new(open.sender_channel(), reason);
                self.sender
                    .send_message(&Message::ChannelOpenFailure(failure))
                    .await
            }
            Err(e) => Err(e),
        }
    }

    fn open_channel(&mut self, open: &ChannelOpen) -> CsshResult<u32> {
        if self.channels.len() >= self.limits.client_channels_max {
            return Err(CsshError::ChannelLimitExceeded);
        }
        if !self.counter.try_acquire() {
            return Err(CsshError::ChannelLimitExceeded);
        }
        if *open.channel_type() != ChannelType::Session {
            self.counter.release();
            return Err(CsshError::UnsupportedChannelType(
                open.channel_type().name().to_string(),
            ));
        }

        let Some(id) = (0..self.limits.client_channels_max as u32)
            .find(|id| !self.channels.contains_key(id))
        else {
            self.counter.release();
            return Err(CsshError::ChannelLimitExceeded);
        };

        let handle = ChannelHandle::new(
            id,
            open.sender_channel(),
            open.initial_window_size(),
            open.maximum_packet_size(),
            self.sender.clone(),
        );
        self.channels.insert(
            id,
            Channel {
                handle,
                opened: false,
                remote_closed: false,
                local_window: self.limits.initial_window_size,
                pty: PseudoTerminalConfig::new(),
                app: None,
            },
        );
        Ok(id)
    }

    /// Dispatches CHANNEL_REQUEST and replies when `want_reply` is set.
    pub async fn handle_request(&mut self, request: ChannelRequest) -> CsshResult<()> {
        let id = request.recipient_channel();
        let factory = Arc::clone(&self.factory);
        let channel = self.channel_mut(id)?;
        let name = request.request_type().name().to_string();

        let outcome = match request.request_type() {
            ChannelRequestType::PtyReq {
                term,
                width_chars,
                height_rows,
                width_pixels,
                height_pixels,
                modes,
            } => channel.pty.apply_pty_request(
                term,
                *width_chars,
                *height_rows,
                *width_pixels,
                *height_pixels,
                modes,
            ),
            ChannelRequestType::Env { name, value } => {
                channel.pty.set_env(name.as_str(), value.as_str());
                Ok(())
            }
            ChannelRequestType::Shell => start_app(channel, factory.as_ref()).await,
            ChannelRequestType::WindowChange {
                width_chars,
                height_rows,
                width_pixels,
                height_pixels,
            } => match channel.pty.set_window_size(
                *width_chars,
                *height_rows,
                *width_pixels,
                *height_pixels,
            ) {
                Ok(size) => match channel.app.as_mut() {
                    Some(app) => app.window_changed(size).await,
                    None => Ok(()),
                },
                Err(e) => Err(e),
            },
            _ => Err(CsshError::UnsupportedRequestType(name.clone())),
        };

        let remote_id = channel.handle.remote_id();
        let reply = match outcome {
            Ok(()) => {
                debug!(channel = id, request = %name, "channel request accepted");
                Message::ChannelSuccess(ChannelSuccess::new(remote_id))
            }
            Err(e) => {
                warn!(channel = id, request = %name, error = %e, "channel request failed");
                Message::ChannelFailure(ChannelFailure::new(remote_id))
            }
        };

        if request.want_reply() {
            self.sender.send_message(&reply).await?;
        }
        Ok(())
    }

    /// Delivers CHANNEL_DATA to the application and refills our window.
    pub async fn handle_data(&mut self, id: u32, data: Vec<u8>) -> CsshResult<()> {
        let limits = self.limits;
        let channel = self.channel_mut(id)?;
        let handle = channel.handle.clone();
        consume_local_window(channel, data.len(), &limits);

        let delivered = match channel.app.as_mut() {
            Some(app) if !channel.handle.is_closed() => app.handle_data(&data).await,
            _ => {
                debug!(channel = id, len = data.len(), "dropping data without a running application");
                Ok(())
            }
        };
        let adjust = refill_local_window(channel, &limits);

        if let Some(adjust) = adjust {
            self.sender
                .send_message(&Message::ChannelWindowAdjust(adjust))
                .await?;
        }
        if let Err(e) = delivered {
            warn!(channel = id, error = %e, "application failed, closing channel");
            handle.close().await?;
        }
        Ok(())
    }

    async fn handle_extended_data(&mut self, data: &ChannelExtendedData) -> CsshResult<()> {
        let limits = self.limits;
        let id = data.recipient_channel();
        let channel = self.channel_mut(id)?;
        consume_local_window(channel, data.data().len(), &limits);
        debug!(channel = id, code = data.data_type_code(), len = data.data().len(), "ignoring extended data");
        if let Some(adjust) = refill_local_window(channel, &limits) {
            self.sender
                .send_message(&Message::ChannelWindowAdjust(adjust))
                .await?;
        }
        Ok(())
    }

    fn handle_window_adjust(&mut self, adjust: &ChannelWindowAdjust) -> CsshResult<()> {
        let channel = self.channel_mut(adjust.recipient_channel())?;
        channel.handle.grow_remote_window(adjust.bytes_to_add());
        debug!(
            channel = adjust.recipient_channel(),
            window = channel.handle.remote_window(),
            "remote window adjusted"
        );
        Ok(())
    }

    /// Handles CHANNEL_EOF: notify the application, answer EOF and CLOSE.
    pub async fn handle_eof(&mut self, id: u32) -> CsshResult<()> {
        let channel = self.channel_mut(id)?;
        if let Some(app) = channel.app.as_mut() {
            if let Err(e) = app.eof().await {
                warn!(channel = id, error = %e, "application eof handler failed");
            }
        }
        let handle = channel.handle.clone();
        if !handle.is_closed() {
            handle.send_eof().await?;
        }
        handle.close().await
    }

    /// Handles CHANNEL_CLOSE: answer with our CLOSE if needed, then tear down.
    pub async fn handle_close(&mut self, id: u32) -> CsshResult<()> {
        let channel = self.channel_mut(id)?;
        channel.remote_closed = true;
        let handle = channel.handle.clone();
        handle.close().await?;
        self.finalize(id).await;
        Ok(())
    }

    /// Stops every application and frees every channel.
    pub async fn shutdown(&mut self) {
        let ids: Vec<u32> = self.channels.keys().copied().collect();
        for id in ids {
            self.finalize(id).await;
        }
    }

    async fn finalize(&mut self, id: u32) {
        if let Some(mut channel) = self.channels.remove(&id) {
            if let Some(mut app) = channel.app.take() {
                app.stop().await;
            }
            self.counter.release();
            info!(channel = id, "channel closed");
        }
    }

    fn channel_mut(&mut self, id: u32) -> CsshResult<&mut Channel> {
        self.channels
            .get_mut(&id)
            .ok_or_else(|| CsshError::Protocol(format!("Unknown channel {}", id)))
    }
}

impl Drop for ChannelMultiplexer {
    fn drop(&mut self) {
        for _ in 0..self.channels.len() {
            self.counter.release();
        }
    }
}

impl std::fmt::Debug for ChannelMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMultiplexer")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

fn is_prohibited(channel_type: &str) -> bool {
    matches!(channel_type, "x11" | "forwarded-tcpip" | "direct-tcpip")
}

async fn start_app(channel: &mut Channel, factory: &dyn ChannelAppFactory) -> CsshResult<()> {
    if channel.app.is_some() {
        return Err(CsshError::Protocol(format!(
            "Channel {} already runs an application",
            channel.handle.local_id()
        )));
    }
    let mut app = factory.create(channel.handle.local_id());
    app.start(channel.handle.clone(), &channel.pty).await?;
    channel.app = Some(app);
    Ok(())
}

fn consume_local_window(channel: &mut Channel, len: usize, limits: &ChannelLimits) {
    let len = u32::try_from(len).unwrap_or(u32::MAX);
    if len > channel.local_window {
        warn!(
            channel = channel.handle.local_id(),
            len,
            window = channel.local_window,
            "peer exceeded the receive window"
        );
    }
    if len > limits.maximum_packet_size {
        warn!(channel = channel.handle.local_id(), len, "peer exceeded the maximum packet size");
    }
    channel.local_window = channel.local_window.saturating_sub(len);
}

fn refill_local_window(channel: &mut Channel, limits: &ChannelLimits) -> Option<ChannelWindowAdjust> {
    if channel.remote_closed || channel.local_window >= limits.initial_window_size / 2 {
        return None;
    }
    let bytes_to_add = limits.initial_window_size - channel.local_window;
    channel.local_window = limits.initial_window_size;
    Some(ChannelWindowAdjust::new(channel.handle.remote_id(), bytes_to_add))
}
