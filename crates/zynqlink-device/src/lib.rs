//! Device protocol for zynqlink.
//!
//! This crate implements the client side of the instrument-control device
//! protocol: length-prefixed JSON frames over TCP port 6401. It provides:
//!
//! - **Frame codec** ([`codec`]) -- 4-byte big-endian length prefix plus
//!   UTF-8 JSON, with a streaming reader and an incremental decoder.
//! - **Commands** ([`commands`]) -- `switch`, `update`, and `exitins`
//!   payloads with parameter validation.
//! - **Waveform decoding** ([`waveform`]) -- telemetry parsing and 12-bit ADC
//!   code to volts conversion.
//! - **DeviceLink** ([`link`]) -- the connection state machine.
//! - **Receive loop** ([`io`]) -- a dedicated task that streams telemetry
//!   and serializes outbound commands.
//! - **Sessions** ([`session`]) -- scope and generator instrument flows.
//! - **Discovery** ([`discovery`]) -- concurrent /24 port scan.
//! - **DeviceLinkBuilder** ([`builder`]) -- fluent link configuration.
//!
//! # Example
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use zynqlink_core::LinkEvent;
//! use zynqlink_device::{DeviceLinkBuilder, ReceiveOptions, Scanner, ScopeSession};
//!
//! # async fn example() -> zynqlink_core::Result<()> {
//! let devices = Scanner::new().scan().await?;
//! if let Some(addr) = devices.first() {
//!     let link = DeviceLinkBuilder::new().address(*addr).build().await?;
//!     let mut events = link.subscribe();
//!
//!     let cancel = CancellationToken::new();
//!     let scope = ScopeSession::start(link, ReceiveOptions::default(), &cancel).await?;
//!     while let Ok(event) = events.recv().await {
//!         if let LinkEvent::WaveformReceived { waveform } = event {
//!             println!("{} samples, {:?} Vpp", waveform.len(), waveform.peak_to_peak());
//!             break;
//!         }
//!     }
//!     scope.stop().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod codec;
pub mod commands;
pub mod discovery;
pub mod io;
pub mod link;
pub mod session;
pub mod waveform;

pub use builder::DeviceLinkBuilder;
pub use codec::{FrameDecoder, decode_body, encode, read_frame};
pub use commands::{Amplitude, AmplitudeFormat, Command, CommandBuilder, WaveformShape};
pub use discovery::{ScanOptions, Scanner, local_ipv4};
pub use io::{LinkIo, ReceiveOptions, spawn_receive_loop};
pub use link::{DeviceLink, LinkOptions};
pub use session::{GeneratorSession, ScopeSession, SessionError};
pub use waveform::{SampleCoding, TelemetryMessage, WaveformDecoder};
