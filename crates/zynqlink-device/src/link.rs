//! Connection to a single device.
//!
//! [`DeviceLink`] owns at most one [`Transport`] and moves through
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected
//!                     |
//!                     +-> Failed -> Disconnected
//! ```
//!
//! Only its own methods change the state, and every change is published as
//! [`LinkEvent::ConnectionStateChanged`]. Any network failure on an active
//! link tears the connection down before the error is returned, so the
//! caller may call [`connect`](DeviceLink::connect) again straight away.
//!
//! A link is not shared: `send` and `receive_one` take `&mut self`. To read
//! and write concurrently, hand the link to
//! [`spawn_receive_loop`](crate::io::spawn_receive_loop), which becomes the
//! single owner that serializes commands.

use std::time::Duration;

use bytes::BytesMut;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use zynqlink_core::error::{Error, Result};
use zynqlink_core::events::LinkEvent;
use zynqlink_core::transport::Transport;
use zynqlink_core::types::{Address, ConnectionState};
use zynqlink_transport::{DEFAULT_CONNECT_TIMEOUT, TcpTransport};

use crate::codec::{self, DEFAULT_MAX_FRAME_LEN, FrameDecoder};
use crate::commands::Command;

/// Broadcast channel capacity for link events.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Bytes requested from the transport per read.
const READ_CHUNK: usize = 8192;

/// Options for a [`DeviceLink`].
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Timeout applied by [`DeviceLink::connect`].
    pub connect_timeout: Duration,
    /// Largest inbound frame body accepted.
    pub max_frame_len: usize,
    /// Capacity of the event channel created for the link.
    pub event_capacity: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// A framed JSON connection to one device.
pub struct DeviceLink {
    transport: Option<Box<dyn Transport>>,
    peer: Option<Address>,
    state: ConnectionState,
    /// Inbound bytes not yet assembled into a frame.
    read_buf: BytesMut,
    decoder: FrameDecoder,
    connect_timeout: Duration,
    event_tx: broadcast::Sender<LinkEvent>,
}

impl DeviceLink {
    /// A disconnected link with default options.
    pub fn new() -> Self {
        Self::with_options(LinkOptions::default())
    }

    /// A disconnected link with its own event channel.
    pub fn with_options(options: LinkOptions) -> Self {
        let (event_tx, _) = broadcast::channel(options.event_capacity.max(1));
        Self::with_event_sender(options, event_tx)
    }

    /// A disconnected link publishing onto an existing event channel, so one
    /// subscriber can follow discovery and the link together.
    pub fn with_event_sender(options: LinkOptions, event_tx: broadcast::Sender<LinkEvent>) -> Self {
        DeviceLink {
            transport: None,
            peer: None,
            state: ConnectionState::Disconnected,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            decoder: FrameDecoder::with_max_len(options.max_frame_len),
            connect_timeout: options.connect_timeout,
            event_tx,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The device this link is connected to, if any.
    pub fn peer(&self) -> Option<Address> {
        self.peer
    }

    /// Subscribe to this link's events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    /// A sender onto this link's event channel.
    pub fn event_sender(&self) -> broadcast::Sender<LinkEvent> {
        self.event_tx.clone()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Connect to `address` using the configured connect timeout.
    pub async fn connect(&mut self, address: Address) -> Result<()> {
        self.connect_with_timeout(address, self.connect_timeout).await
    }

    /// Connect to `address`, giving up after `timeout`.
    ///
    /// An existing connection is closed first. On failure the link reports
    /// `Failed`, settles in `Disconnected`, and returns [`Error::Connect`].
    pub async fn connect_with_timeout(&mut self, address: Address, timeout: Duration) -> Result<()> {
        if self.transport.is_some() {
            tracing::debug!(old = ?self.peer, new = %address, "Replacing existing connection");
            self.teardown().await;
        }

        self.set_state(ConnectionState::Connecting);
        tracing::debug!(addr = %address, timeout_ms = timeout.as_millis() as u64, "Connecting to device");

        match TcpTransport::connect_with_timeout(address.socket_addr(), timeout).await {
            Ok(transport) => {
                self.install(Box::new(transport), address);
                tracing::info!(addr = %address, "Device link connected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(addr = %address, error = %e, "Device connect failed");
                self.set_state(ConnectionState::Failed);
                self.set_state(ConnectionState::Disconnected);
                Err(match e {
                    Error::Connect(_) => e,
                    other => Error::Connect(other.to_string()),
                })
            }
        }
    }

    /// Adopt an already-connected transport.
    ///
    /// Used for tests and for transports other than plain TCP. An existing
    /// connection is closed first.
    pub async fn attach(&mut self, transport: Box<dyn Transport>, address: Address) {
        if self.transport.is_some() {
            self.teardown().await;
        }
        self.set_state(ConnectionState::Connecting);
        self.install(transport, address);
        tracing::debug!(addr = %address, "Transport attached to device link");
    }

    fn install(&mut self, transport: Box<dyn Transport>, address: Address) {
        self.transport = Some(transport);
        self.peer = Some(address);
        self.read_buf.clear();
        self.set_state(ConnectionState::Connected);
    }

    /// Close the connection. Does nothing when already disconnected.
    pub async fn disconnect(&mut self) {
        if self.transport.is_none() && self.state == ConnectionState::Disconnected {
            return;
        }
        tracing::info!(addr = ?self.peer, "Disconnecting device link");
        self.teardown().await;
    }

    /// Leave the current instrument mode and disconnect.
    ///
    /// The `exitins` command is best effort: a send failure is logged and
    /// the link is closed regardless.
    pub async fn close_instrument(&mut self) {
        if self.is_connected() {
            if let Err(e) = self.send(&Command::ExitInstrument).await {
                tracing::debug!(error = %e, "exitins not delivered during close");
            }
        }
        self.disconnect().await;
    }

    async fn teardown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                tracing::debug!(error = %e, "Error closing transport");
            }
        }
        self.peer = None;
        self.read_buf.clear();
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "Link state changed");
        self.state = state;
        let _ = self
            .event_tx
            .send(LinkEvent::ConnectionStateChanged { state });
    }

    // -----------------------------------------------------------------------
    // I/O
    // -----------------------------------------------------------------------

    /// Send one command.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        tracing::debug!(cmd_type = command.cmd_type(), "Sending command");
        self.send_json(command).await
    }

    /// Send any serializable payload as one frame.
    ///
    /// Fails with [`Error::NotConnected`] outside `Connected` without
    /// touching the transport, and with [`Error::Encoding`] (link untouched)
    /// if the payload cannot be framed. A write failure disconnects the link
    /// and returns [`Error::Send`].
    pub async fn send_json<T: Serialize + ?Sized>(&mut self, payload: &T) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let frame = codec::encode(payload)?;
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;

        let result = transport.send(&frame).await;
        match result {
            Ok(()) => {
                tracing::trace!(len = frame.len(), "Frame sent");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Send failed, disconnecting");
                self.teardown().await;
                Err(match e {
                    Error::Send(_) => e,
                    other => Error::Send(other.to_string()),
                })
            }
        }
    }

    /// Wait for the next whole frame.
    ///
    /// - `Ok(Some(value))`: a frame arrived.
    /// - `Ok(None)`: the device closed the connection on a frame boundary;
    ///   the link is now `Disconnected`.
    /// - [`Error::Decode`]: the frame was not JSON. It has been consumed and
    ///   the link stays connected.
    /// - [`Error::Framing`] / [`Error::Receive`]: the link is now
    ///   `Disconnected`.
    /// - [`Error::NotConnected`]: called outside `Connected`; no I/O done.
    ///
    /// Cancel-safe: partially received frames stay buffered in the link, so
    /// dropping this future (e.g. in `tokio::select!`) loses nothing.
    pub async fn receive_one(&mut self) -> Result<Option<Value>> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.decoder.decode(&mut self.read_buf) {
                Ok(Some(payload)) => {
                    let _ = self.event_tx.send(LinkEvent::MessageReceived {
                        payload: payload.clone(),
                    });
                    return Ok(Some(payload));
                }
                Ok(None) => {}
                Err(e @ Error::Decode(_)) => {
                    tracing::warn!(error = %e, "Discarding undecodable frame");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Framing error, disconnecting");
                    self.teardown().await;
                    return Err(e);
                }
            }

            let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
            let result = transport.receive(&mut chunk).await;
            match result {
                Ok(0) => {
                    let leftover = self.decoder.finish(&self.read_buf);
                    match &leftover {
                        Ok(()) => tracing::info!(addr = ?self.peer, "Device closed the connection"),
                        Err(e) => tracing::warn!(error = %e, "Device closed the connection mid-frame"),
                    }
                    self.teardown().await;
                    return leftover.map(|()| None);
                }
                Ok(n) => {
                    tracing::trace!(bytes = n, "Received data");
                    self.read_buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Receive failed, disconnecting");
                    self.teardown().await;
                    return Err(match e {
                        Error::Receive(_) => e,
                        other => Error::Receive(other.to_string()),
                    });
                }
            }
        }
    }
}

impl Default for DeviceLink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("state", &self.state)
            .field("peer", &self.peer)
            .field("buffered", &self.read_buf.len())
            .finish()
    }
}
