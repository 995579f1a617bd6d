//! zynqlink-core: Core traits, types, and error definitions for zynqlink.
//!
//! This crate defines the transport-agnostic pieces the rest of the
//! workspace builds on. Presentation layers depend on these types (events,
//! observer, waveform) without pulling in sockets or the wire codec.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel to a device
//! - [`Prober`] -- reachability check used by LAN discovery
//! - [`LinkEvent`] / [`PresentationObserver`] -- notifications for the UI
//! - [`Address`], [`ConnectionState`], [`Waveform`] -- shared data model
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod observer;
pub mod probe;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use zynqlink_core::*`.
pub use error::{Error, ErrorKind, Result};
pub use events::LinkEvent;
pub use observer::{PresentationObserver, spawn_observer};
pub use probe::Prober;
pub use transport::Transport;
pub use types::*;
