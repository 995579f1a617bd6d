//! TCP transport for device communication.
//!
//! This module provides [`TcpTransport`], which implements the [`Transport`]
//! trait over a Tokio [`TcpStream`], and [`TcpProber`], the [`Prober`] used
//! by LAN discovery to check whether a host accepts connections on the
//! device port.
//!
//! # Example
//!
//! ```no_run
//! use zynqlink_transport::TcpTransport;
//! use zynqlink_core::transport::Transport;
//!
//! # async fn example() -> zynqlink_core::Result<()> {
//! let mut transport = TcpTransport::connect("192.168.1.40:6401".parse().unwrap()).await?;
//! transport.send(&[0, 0, 0, 2, b'{', b'}']).await?;
//!
//! let mut buf = [0u8; 4096];
//! let n = transport.receive(&mut buf).await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use zynqlink_core::error::{Error, Result};
use zynqlink_core::probe::Prober;
use zynqlink_core::transport::Transport;
use zynqlink_core::types::Address;

/// Default connection timeout (5 seconds).
///
/// The device sits on the same LAN as the client, so anything slower than
/// this means it is not there.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP transport for device communication.
///
/// The connection is established eagerly via [`connect`](TcpTransport::connect)
/// or [`connect_with_timeout`](TcpTransport::connect_with_timeout).
#[derive(Debug)]
pub struct TcpTransport {
    /// The underlying TCP stream, `None` after `close()` is called.
    stream: Option<TcpStream>,
    /// The peer address for logging.
    addr: SocketAddr,
}

impl TcpTransport {
    /// Connect to a TCP endpoint using the default timeout.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect to a TCP endpoint with a specified timeout.
    ///
    /// Every failure mode (refused, unreachable, timed out) is reported as
    /// [`Error::Connect`].
    pub async fn connect_with_timeout(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        tracing::debug!(
            addr = %addr,
            timeout_ms = timeout.as_millis(),
            "Connecting to TCP endpoint"
        );

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %addr, "TCP connection timed out");
                Error::Connect(format!(
                    "timed out after {} ms: {}",
                    timeout.as_millis(),
                    addr
                ))
            })?
            .map_err(|e| {
                tracing::error!(addr = %addr, error = %e, "TCP connection failed");
                map_connect_error(e, addr)
            })?;

        // Commands are tiny and latency matters more than throughput.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(
                addr = %addr,
                error = %e,
                "Failed to set TCP_NODELAY (continuing anyway)"
            );
        }

        tracing::info!(addr = %addr, "TCP connection established");

        Ok(Self {
            stream: Some(stream),
            addr,
        })
    }

    /// Wrap an existing `TcpStream` as a `TcpTransport`.
    ///
    /// Used when the connection was accepted from a listener (tests, a
    /// device simulator) rather than dialled here.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let addr = stream.peer_addr()?;
        tracing::debug!(addr = %addr, "Wrapping existing TCP stream");
        Ok(Self {
            stream: Some(stream),
            addr,
        })
    }

    /// The peer address this transport is connected to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let addr = self.addr;
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        let written = async {
            stream.write_all(data).await?;
            stream.flush().await
        };
        match written.await {
            Ok(()) => {
                tracing::trace!(%addr, bytes = data.len(), "Wrote to device");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(%addr, error = %e, "Write to device failed");
                Err(Error::Send(e.to_string()))
            }
        }
    }

    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let addr = self.addr;
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        // `read` on a TcpStream is cancel-safe: nothing is consumed unless
        // it returns.
        let n = stream.read(buf).await.map_err(|e| {
            tracing::warn!(%addr, error = %e, "Read from device failed");
            Error::Receive(e.to_string())
        })?;
        if n == 0 {
            tracing::debug!(%addr, "Device sent EOF");
        } else {
            tracing::trace!(%addr, bytes = n, "Read from device");
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        // The peer may already be gone; a failed FIN is not worth reporting.
        if let Err(e) = stream.shutdown().await {
            tracing::debug!(addr = %self.addr, error = %e, "TCP shutdown failed");
        }
        tracing::debug!(addr = %self.addr, "TCP transport closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Map a connection-time I/O error to [`Error::Connect`].
fn map_connect_error(e: std::io::Error, addr: SocketAddr) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Connect(format!("connection refused: {}", addr))
        }
        _ => Error::Connect(format!("{}: {}", addr, e)),
    }
}

/// [`Prober`] that attempts a real TCP connect and drops it straight away.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, addr: Address, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect(addr.socket_addr())).await {
            Ok(Ok(_stream)) => {
                tracing::debug!(addr = %addr, "Probe accepted");
                true
            }
            Ok(Err(e)) => {
                tracing::trace!(addr = %addr, error = %e, "Probe refused");
                false
            }
            Err(_) => {
                tracing::trace!(addr = %addr, "Probe timed out");
                false
            }
        }
    }
}
