//! DeviceLinkBuilder -- fluent builder for constructing [`DeviceLink`]s.
//!
//! Separates configuration from construction so callers can set the
//! address, timeouts, and event channel before the TCP connection is made.
//!
//! # Example
//!
//! ```no_run
//! use zynqlink_device::builder::DeviceLinkBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> zynqlink_core::Result<()> {
//! let link = DeviceLinkBuilder::new()
//!     .host("192.168.1.40")
//!     .connect_timeout(Duration::from_secs(2))
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::sync::broadcast;

use zynqlink_core::error::{Error, Result};
use zynqlink_core::events::LinkEvent;
use zynqlink_core::transport::Transport;
use zynqlink_core::types::{Address, DEFAULT_PORT};

use crate::link::{DeviceLink, LinkOptions};

/// Fluent builder for [`DeviceLink`].
pub struct DeviceLinkBuilder {
    host: Option<String>,
    port: u16,
    options: LinkOptions,
    event_tx: Option<broadcast::Sender<LinkEvent>>,
}

impl DeviceLinkBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        DeviceLinkBuilder {
            host: None,
            port: DEFAULT_PORT,
            options: LinkOptions::default(),
            event_tx: None,
        }
    }

    /// Set the device's IPv4 address, optionally with `:port`.
    ///
    /// Parsed when the link is built.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.trim().to_string());
        self
    }

    /// Set address and port from a discovery result.
    pub fn address(mut self, address: Address) -> Self {
        self.host = Some(address.ip().to_string());
        self.port = address.port();
        self
    }

    /// Set the device port (default: 6401).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connect timeout (default: 5s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Set the largest inbound frame accepted (default: 64 MiB).
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.options.max_frame_len = len;
        self
    }

    /// Set the event channel capacity (default: 256). Ignored when
    /// [`events`](Self::events) supplies a channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.options.event_capacity = capacity;
        self
    }

    /// Publish link events on an existing channel.
    pub fn events(mut self, event_tx: broadcast::Sender<LinkEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// The resolved device address.
    ///
    /// A port given in the host string wins over [`port`](Self::port).
    pub fn resolve_address(&self) -> Result<Address> {
        let host = self.host.as_deref().ok_or_else(|| {
            Error::Validation("host is required: call .host() or .address() before .build()".into())
        })?;
        match host.parse::<Ipv4Addr>() {
            Ok(ip) => Ok(Address::with_port(ip, self.port)),
            Err(_) => host.parse::<Address>(),
        }
    }

    /// Build a disconnected link carrying this configuration.
    pub fn build_disconnected(self) -> DeviceLink {
        match self.event_tx {
            Some(event_tx) => DeviceLink::with_event_sender(self.options, event_tx),
            None => DeviceLink::with_options(self.options),
        }
    }

    /// Connect to the device and return the link.
    ///
    /// Requires that [`host()`](Self::host) or [`address()`](Self::address)
    /// has been called.
    pub async fn build(self) -> Result<DeviceLink> {
        let address = self.resolve_address()?;
        let mut link = self.build_disconnected();
        link.connect(address).await?;
        Ok(link)
    }

    /// Build a link over an already-connected transport.
    ///
    /// This is the primary entry point for testing: pass a `MockTransport`.
    /// Without a host, the link reports `127.0.0.1` on the configured port
    /// as its peer.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<DeviceLink> {
        let address = match self.host {
            Some(_) => self.resolve_address()?,
            None => Address::with_port(Ipv4Addr::LOCALHOST, self.port),
        };
        let mut link = self.build_disconnected();
        link.attach(transport, address).await;
        Ok(link)
    }
}

impl Default for DeviceLinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
