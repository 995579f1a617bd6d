//! Transport implementations for zynqlink.
//!
//! This crate provides the Tokio-backed implementations of the traits in
//! `zynqlink-core`:
//!
//! - [`TcpTransport`]: the byte stream to a device on its TCP port
//! - [`TcpProber`]: the connect-and-drop reachability check used by discovery
//!
//! # Example
//!
//! ```no_run
//! use zynqlink_transport::TcpTransport;
//! use zynqlink_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> zynqlink_core::Result<()> {
//! let addr = "192.168.1.40:6401".parse().unwrap();
//! let mut transport = TcpTransport::connect_with_timeout(addr, Duration::from_secs(2)).await?;
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod tcp;

pub use tcp::{DEFAULT_CONNECT_TIMEOUT, TcpProber, TcpTransport};
