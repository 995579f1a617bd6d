//! Mock device for socket-level testing.
//!
//! [`MockDevice`] is a loopback TCP listener that plays a scripted
//! conversation with a single client, speaking the same length-prefixed
//! JSON framing as the real instrument. It lets `DeviceLink` and the
//! receive loop be tested end to end over a real `TcpStream` without
//! hardware.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use zynqlink_test_harness::MockDevice;
//!
//! # async fn example() -> zynqlink_core::Result<()> {
//! let mut device = MockDevice::new().await?;
//!
//! // The client switches to the scope, the device answers with one frame.
//! device.expect_frame(json!({"cmd_type": "switch", "instrument": "scope"}));
//! device.send_frame(json!({"waveform": [2048, 0], "sample_rate": 1000}));
//! device.start();
//!
//! let addr = device.addr();
//! // ... connect a DeviceLink to `addr` ...
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use zynqlink_core::error::Result;

/// One step of the scripted conversation.
#[derive(Debug, Clone)]
enum Step {
    /// Read one frame from the client and compare its JSON body.
    Expect(Value),
    /// Write one well-formed frame.
    Send(Value),
    /// Write raw bytes, for malformed or partial frames.
    SendRaw(Vec<u8>),
    /// Hang up immediately.
    Close,
}

/// A scripted single-client device on a random loopback port.
///
/// Steps run in the order they were added once
/// [`start`](MockDevice::start) is called. When the script ends without an
/// explicit [`close`](MockDevice::close) step, the device keeps the
/// connection open until the client hangs up.
pub struct MockDevice {
    listener: Option<TcpListener>,
    addr: SocketAddr,
    steps: Vec<Step>,
    server_handle: Option<JoinHandle<std::result::Result<(), String>>>,
}

impl MockDevice {
    /// Bind a new mock device on `127.0.0.1` with an OS-assigned port.
    ///
    /// The listener is bound immediately, so clients may connect as soon
    /// as this returns; the script starts once [`start`](MockDevice::start)
    /// is called.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        Ok(Self {
            listener: Some(listener),
            addr,
            steps: Vec::new(),
            server_handle: None,
        })
    }

    /// Expect the client to send a frame whose JSON body equals `body`.
    pub fn expect_frame(&mut self, body: Value) {
        self.steps.push(Step::Expect(body));
    }

    /// Send one length-prefixed JSON frame to the client.
    pub fn send_frame(&mut self, body: Value) {
        self.steps.push(Step::Send(body));
    }

    /// Send raw bytes to the client.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.steps.push(Step::SendRaw(bytes.to_vec()));
    }

    /// Close the connection at this point of the script.
    pub fn close(&mut self) {
        self.steps.push(Step::Close);
    }

    /// The address the device listens on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The port the device listens on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Start the device, accepting a single client and running the script.
    ///
    /// This spawns a background task. Call [`wait`](MockDevice::wait) to
    /// block until the script has run and check for errors.
    pub fn start(&mut self) {
        let _ = self.start_with_ready();
    }

    /// Start the device and return a channel that fires once the script
    /// task is running.
    pub fn start_with_ready(&mut self) -> oneshot::Receiver<()> {
        let listener = self.listener.take();
        let steps = std::mem::take(&mut self.steps);
        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let listener = listener.ok_or_else(|| "mock device already started".to_string())?;
            let _ = ready_tx.send(());

            let (mut stream, _) = listener
                .accept()
                .await
                .map_err(|e| format!("failed to accept connection: {}", e))?;

            for (i, step) in steps.into_iter().enumerate() {
                match step {
                    Step::Expect(expected) => {
                        let got = read_frame(&mut stream)
                            .await
                            .map_err(|e| format!("step {}: {}", i, e))?;
                        if got != expected {
                            return Err(format!(
                                "step {}: frame mismatch: expected {}, got {}",
                                i, expected, got
                            ));
                        }
                    }
                    Step::Send(body) => {
                        write_all(&mut stream, &encode(&body))
                            .await
                            .map_err(|e| format!("step {}: {}", i, e))?;
                    }
                    Step::SendRaw(bytes) => {
                        write_all(&mut stream, &bytes)
                            .await
                            .map_err(|e| format!("step {}: {}", i, e))?;
                    }
                    Step::Close => return Ok(()),
                }
            }

            // Hold the connection until the client hangs up.
            let mut sink = [0u8; 1024];
            loop {
                match stream.read(&mut sink).await {
                    Ok(0) | Err(_) => return Ok(()),
                    Ok(_) => continue,
                }
            }
        });

        self.server_handle = Some(handle);
        ready_rx
    }

    /// Wait for the device task to complete and return any errors.
    ///
    /// Call this after the client has finished its interactions to verify
    /// that every expected frame arrived.
    pub async fn wait(self) -> std::result::Result<(), String> {
        if let Some(handle) = self.server_handle {
            handle
                .await
                .map_err(|e| format!("device task panicked: {}", e))?
        } else {
            Ok(())
        }
    }
}

/// Encode `body` with the 4-byte big-endian length prefix.
pub fn encode(body: &Value) -> Vec<u8> {
    let json = body.to_string();
    let mut frame = Vec::with_capacity(json.len() + 4);
    frame.extend_from_slice(&(json.len() as u32).to_be_bytes());
    frame.extend_from_slice(json.as_bytes());
    frame
}

async fn read_frame(stream: &mut TcpStream) -> std::result::Result<Value, String> {
    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|e| format!("reading frame header: {}", e))?;
    let len = u32::from_be_bytes(header) as usize;

    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|e| format!("reading {}-byte frame body: {}", len, e))?;

    serde_json::from_slice(&body).map_err(|e| format!("frame body is not JSON: {}", e))
}

async fn write_all(stream: &mut TcpStream, bytes: &[u8]) -> std::result::Result<(), String> {
    stream
        .write_all(bytes)
        .await
        .map_err(|e| format!("write error: {}", e))?;
    stream
        .flush()
        .await
        .map_err(|e| format!("flush error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mock_device_plays_script() {
        let mut device = MockDevice::new().await.unwrap();
        device.expect_frame(json!({"cmd_type": "exitins"}));
        device.send_frame(json!({"ok": true}));
        device.close();
        device.start();

        let mut client = TcpStream::connect(device.addr()).await.unwrap();
        client
            .write_all(&encode(&json!({"cmd_type": "exitins"})))
            .await
            .unwrap();

        let reply = read_frame(&mut client).await.unwrap();
        assert_eq!(reply, json!({"ok": true}));

        device.wait().await.unwrap();
    }

    #[tokio::test]
    async fn mock_device_reports_mismatch() {
        let mut device = MockDevice::new().await.unwrap();
        device.expect_frame(json!({"cmd_type": "exitins"}));
        let ready = device.start_with_ready();
        ready.await.unwrap();

        let mut client = TcpStream::connect(device.addr()).await.unwrap();
        client
            .write_all(&encode(&json!({"cmd_type": "switch"})))
            .await
            .unwrap();

        let err = device.wait().await.unwrap_err();
        assert!(err.contains("mismatch"), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn mock_device_holds_until_client_hangs_up() {
        let mut device = MockDevice::new().await.unwrap();
        device.send_raw(&[0, 0, 0]);
        device.start();

        let mut client = TcpStream::connect(device.addr()).await.unwrap();
        let mut buf = [0u8; 3];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0, 0, 0]);
        drop(client);

        device.wait().await.unwrap();
    }

    #[test]
    fn encode_prefixes_length() {
        let frame = encode(&json!([1, 2]));
        assert_eq!(&frame[..4], &[0, 0, 0, 5]);
        assert_eq!(&frame[4..], b"[1,2]");
    }
}
