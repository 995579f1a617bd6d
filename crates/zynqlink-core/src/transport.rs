//! Transport trait for device communication.
//!
//! The [`Transport`] trait abstracts over the byte stream to a device. The
//! TCP implementation lives in `zynqlink-transport`; the frame codec and
//! device link in `zynqlink-device` operate on a `Transport` rather than a
//! socket, so they can be driven by `MockTransport` from the
//! `zynqlink-test-harness` crate in unit tests.

use async_trait::async_trait;

use crate::error::Result;

/// Asynchronous byte-stream transport to a device.
///
/// Implementations handle only raw bytes. Framing and JSON are the concern
/// of the frame codec that consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the device.
    ///
    /// Implementations must write every byte before returning, retrying
    /// short writes internally.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes into the provided buffer.
    ///
    /// Waits until at least one byte is available. Returns `Ok(0)` when the
    /// peer has closed the stream. Must be cancel-safe: dropping the future
    /// before it completes must not lose bytes.
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Close the transport.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    /// Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently open.
    fn is_connected(&self) -> bool;
}
