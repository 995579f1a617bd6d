//! Mock transport for deterministic testing of the frame codec and link.
//!
//! [`MockTransport`] implements the [`Transport`] trait over a scripted
//! queue of inbound bytes. It records everything sent through it so tests
//! can assert on the exact frames a link wrote, and it can deliver inbound
//! data in arbitrarily small chunks to exercise partial-read assembly.
//!
//! # Example
//!
//! ```
//! use zynqlink_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! mock.push_frame(&serde_json::json!({"waveform": [2048, 2047], "sample_rate": 1000}));
//! let log = mock.log();
//! // ... hand `mock` to a DeviceLink, then inspect `log.sent_frames()` ...
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use zynqlink_core::error::{Error, Result};
use zynqlink_core::transport::Transport;

/// One scripted inbound event.
#[derive(Debug, Clone)]
enum Inbound {
    /// Bytes the device "sends".
    Bytes(Vec<u8>),
    /// A read failure.
    Error(String),
}

/// What `receive()` does once the inbound script is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Report a clean peer close (`Ok(0)`).
    Close,
    /// Never return, like an idle socket. Cancellation still works.
    Hang,
}

/// Shared record of the I/O a [`MockTransport`] performed.
///
/// Obtained with [`MockTransport::log`] before the transport is moved into
/// the code under test.
#[derive(Debug, Default)]
pub struct MockLog {
    sent: Vec<Vec<u8>>,
    send_calls: usize,
    receive_calls: usize,
    closed: bool,
}

/// Cloneable handle to a [`MockLog`].
#[derive(Debug, Clone, Default)]
pub struct MockLogHandle(Arc<Mutex<MockLog>>);

impl MockLogHandle {
    fn lock(&self) -> MutexGuard<'_, MockLog> {
        // A poisoned log only means another test thread panicked mid-update.
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every buffer passed to a successful `send()`, in order.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// The JSON bodies of every frame sent, in order.
    ///
    /// # Panics
    ///
    /// Panics if a sent buffer is not exactly one well-formed frame.
    pub fn sent_frames(&self) -> Vec<serde_json::Value> {
        self.lock()
            .sent
            .iter()
            .map(|buf| {
                assert!(buf.len() >= 4, "sent buffer shorter than a frame header");
                let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                assert_eq!(len, buf.len() - 4, "frame length prefix mismatch");
                serde_json::from_slice(&buf[4..]).expect("frame body is not JSON")
            })
            .collect()
    }

    /// Number of `send()` calls that reached the transport.
    pub fn send_calls(&self) -> usize {
        self.lock().send_calls
    }

    /// Number of `receive()` calls that reached the transport.
    pub fn receive_calls(&self) -> usize {
        self.lock().receive_calls
    }

    /// Whether `close()` has been called.
    pub fn closed(&self) -> bool {
        self.lock().closed
    }
}

/// A mock [`Transport`] for testing without a device.
#[derive(Debug)]
pub struct MockTransport {
    inbound: VecDeque<Inbound>,
    /// Bytes of the current inbound chunk not yet handed out.
    pending: Vec<u8>,
    /// Upper bound on bytes returned per `receive()` call.
    chunk_size: Option<usize>,
    end: StreamEnd,
    connected: bool,
    /// Sends allowed through before failing, and the failure message.
    fail_sends: Option<(usize, String)>,
    log: MockLogHandle,
}

impl MockTransport {
    /// Create a new mock transport in the connected state with an empty
    /// script that ends in a clean close.
    pub fn new() -> Self {
        MockTransport {
            inbound: VecDeque::new(),
            pending: Vec::new(),
            chunk_size: None,
            end: StreamEnd::Close,
            connected: true,
            fail_sends: None,
            log: MockLogHandle::default(),
        }
    }

    /// Queue raw bytes for the code under test to receive.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.inbound.push_back(Inbound::Bytes(bytes.to_vec()));
    }

    /// Queue one length-prefixed JSON frame.
    pub fn push_frame(&mut self, body: &serde_json::Value) {
        let json = body.to_string();
        let mut frame = Vec::with_capacity(json.len() + 4);
        frame.extend_from_slice(&(json.len() as u32).to_be_bytes());
        frame.extend_from_slice(json.as_bytes());
        self.inbound.push_back(Inbound::Bytes(frame));
    }

    /// Queue a read error; `receive()` returns [`Error::Receive`] when it
    /// reaches this point of the script.
    pub fn push_error(&mut self, message: &str) {
        self.inbound.push_back(Inbound::Error(message.to_string()));
    }

    /// Hand out at most `n` bytes per `receive()` call.
    pub fn chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = Some(n.max(1));
        self
    }

    /// Choose what happens after the script runs out.
    pub fn end_with(mut self, end: StreamEnd) -> Self {
        self.end = end;
        self
    }

    /// Make every subsequent `send()` fail with [`Error::Send`].
    pub fn fail_sends(&mut self, message: &str) {
        self.fail_sends_after(0, message);
    }

    /// Let `n` more sends succeed, then fail every one after with
    /// [`Error::Send`].
    pub fn fail_sends_after(&mut self, n: usize, message: &str) {
        let sent = self.log.lock().sent.len();
        self.fail_sends = Some((sent + n, message.to_string()));
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// A handle on the I/O record that outlives moving the transport.
    pub fn log(&self) -> MockLogHandle {
        self.log.clone()
    }

    /// Return a reference to all data that has been sent through this transport.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.log.sent_data()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let mut log = self.log.lock();
        log.send_calls += 1;
        if let Some((allowed, message)) = &self.fail_sends {
            if log.sent.len() >= *allowed {
                return Err(Error::Send(message.clone()));
            }
        }
        log.sent.push(data.to_vec());
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.log.lock().receive_calls += 1;

        while self.pending.is_empty() {
            match self.inbound.pop_front() {
                Some(Inbound::Bytes(bytes)) => self.pending = bytes,
                Some(Inbound::Error(message)) => return Err(Error::Receive(message)),
                None => match self.end {
                    StreamEnd::Close => return Ok(0),
                    StreamEnd::Hang => std::future::pending::<()>().await,
                },
            }
        }

        let limit = self.chunk_size.unwrap_or(usize::MAX).min(buf.len());
        let n = self.pending.len().min(limit);
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending.clear();
        self.log.lock().closed = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn mock_transport_delivers_scripted_bytes() {
        let mut mock = MockTransport::new();
        mock.push_bytes(&[0xAA, 0xBB, 0xCC]);

        let mut buf = [0u8; 64];
        let n = mock.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0xBB, 0xCC]);

        // Script exhausted: clean close.
        assert_eq!(mock.receive(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mock_transport_push_frame_prefixes_length() {
        let mut mock = MockTransport::new();
        mock.push_frame(&json!({"a": 1}));

        let mut buf = [0u8; 64];
        let n = mock.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 7]);
        assert_eq!(&buf[4..n], br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn mock_transport_chunked_receive() {
        let mut mock = MockTransport::new().chunk_size(2);
        mock.push_bytes(&[1, 2, 3, 4, 5]);

        let mut buf = [0u8; 64];
        let mut seen = Vec::new();
        loop {
            let n = mock.receive(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            assert!(n <= 2);
            seen.extend_from_slice(&buf[..n]);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn mock_transport_scripted_error() {
        let mut mock = MockTransport::new();
        mock.push_error("connection reset by peer");

        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf).await;
        assert!(matches!(result, Err(Error::Receive(msg)) if msg.contains("reset")));
    }

    #[tokio::test]
    async fn mock_transport_hangs_when_asked() {
        let mut mock = MockTransport::new().end_with(StreamEnd::Hang);
        let mut buf = [0u8; 8];
        let result = tokio::time::timeout(Duration::from_millis(20), mock.receive(&mut buf)).await;
        assert!(result.is_err(), "receive should still be pending");
    }

    #[tokio::test]
    async fn mock_transport_tracks_sent_data() {
        let mut mock = MockTransport::new();
        let log = mock.log();

        mock.send(&[0, 0, 0, 2, b'{', b'}']).await.unwrap();
        mock.send(&[0, 0, 0, 4, b'[', b'1', b']', b' ']).await.unwrap();

        assert_eq!(log.send_calls(), 2);
        assert_eq!(mock.sent_data().len(), 2);
        assert_eq!(log.sent_frames(), vec![json!({}), json!([1])]);
    }

    #[tokio::test]
    async fn mock_transport_failing_sends() {
        let mut mock = MockTransport::new();
        let log = mock.log();
        mock.fail_sends("broken pipe");

        let result = mock.send(&[1]).await;
        assert!(matches!(result, Err(Error::Send(_))));
        assert_eq!(log.send_calls(), 1);
        assert!(log.sent_data().is_empty());
    }

    #[tokio::test]
    async fn mock_transport_fails_after_allowed_sends() {
        let mut mock = MockTransport::new();
        let log = mock.log();
        mock.send(&[1]).await.unwrap();
        mock.fail_sends_after(1, "reset by peer");

        mock.send(&[2]).await.unwrap();
        let result = mock.send(&[3]).await;
        assert!(matches!(result, Err(Error::Send(msg)) if msg == "reset by peer"));
        assert_eq!(log.sent_data(), vec![vec![1], vec![2]]);
        assert_eq!(log.send_calls(), 3);
    }

    #[tokio::test]
    async fn mock_transport_disconnect() {
        let mut mock = MockTransport::new();
        let log = mock.log();
        assert!(mock.is_connected());

        mock.close().await.unwrap();
        assert!(!mock.is_connected());
        assert!(log.closed());

        let result = mock.send(&[0x01]).await;
        assert!(matches!(result, Err(Error::NotConnected)));

        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf).await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(log.receive_calls(), 0);
    }

    #[tokio::test]
    async fn mock_transport_set_connected() {
        let mut mock = MockTransport::new();
        mock.set_connected(false);
        assert!(!mock.is_connected());

        let result = mock.send(&[0x01]).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }
}
