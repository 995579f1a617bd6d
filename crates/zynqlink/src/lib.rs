//! # zynqlink -- Async client for FPGA instrument boards
//!
//! `zynqlink` talks to a small FPGA board that exposes two instruments over
//! the LAN: an oscilloscope that streams sampled waveforms, and a signal
//! generator that is programmed with shape, frequency, and amplitude.
//!
//! ## Quick Start
//!
//! Find a board on the local /24 and read one waveform from its scope:
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use zynqlink::LinkEvent;
//! use zynqlink::device::{DeviceLinkBuilder, ReceiveOptions, Scanner, ScopeSession};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let devices = Scanner::new().scan().await?;
//!     let Some(addr) = devices.first().copied() else {
//!         anyhow::bail!("no device found");
//!     };
//!
//!     let link = DeviceLinkBuilder::new().address(addr).build().await?;
//!     let mut events = link.subscribe();
//!     let cancel = CancellationToken::new();
//!     let scope = ScopeSession::start(link, ReceiveOptions::default(), &cancel).await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let LinkEvent::WaveformReceived { waveform } = event {
//!             println!("{} samples at {} Hz", waveform.len(), waveform.sample_rate_hz);
//!             break;
//!         }
//!     }
//!     scope.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                   | Purpose                                              |
//! |-------------------------|------------------------------------------------------|
//! | `zynqlink-core`         | [`Transport`], [`Prober`], events, types, errors     |
//! | `zynqlink-transport`    | Tokio TCP transport and reachability prober          |
//! | `zynqlink-device`       | Frame codec, commands, link, receive loop, discovery |
//! | **`zynqlink`**          | This facade crate -- re-exports everything           |
//!
//! ## Wire Protocol
//!
//! Every message in either direction is a frame: a 4-byte big-endian length
//! followed by that many bytes of UTF-8 JSON. Commands carry a `cmd_type`
//! of `switch`, `update`, or `exitins`; scope telemetry is an object with a
//! `waveform` array of signed ADC codes and an optional `sample_rate`.
//!
//! ## Events
//!
//! The link, receive loop, and scanner publish [`LinkEvent`]s on a broadcast
//! channel. A UI that must stay on one thread can implement
//! [`PresentationObserver`] and hand it to [`spawn_observer`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use zynqlink::{ConnectionState, PresentationObserver, spawn_observer};
//! use zynqlink::device::DeviceLink;
//!
//! struct StatusBar;
//!
//! impl PresentationObserver for StatusBar {
//!     fn on_connection_state_changed(&self, state: ConnectionState) {
//!         println!("link is {state}");
//!     }
//! }
//!
//! # fn example(link: &DeviceLink) {
//! let _forwarder = spawn_observer(link.subscribe(), Arc::new(StatusBar));
//! # }
//! ```

pub use zynqlink_core::*;

/// TCP transport and reachability prober.
///
/// Provides [`TcpTransport`](transport::TcpTransport) and
/// [`TcpProber`](transport::TcpProber).
pub mod transport {
    pub use zynqlink_transport::*;
}

/// Device protocol: codec, commands, link state machine, sessions, and
/// discovery.
pub mod device {
    pub use zynqlink_device::*;
}
