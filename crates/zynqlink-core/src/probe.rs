//! Reachability probe used by LAN discovery.
//!
//! Discovery only needs a yes/no answer per host: did something accept a
//! TCP connection on the device port within the timeout? The [`Prober`]
//! trait isolates that question so the scanner's fan-out and merge logic can
//! be tested with `MockProber` instead of real sockets.

use std::time::Duration;

use async_trait::async_trait;

use crate::types::Address;

/// Answers whether a device is listening at an address.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Return `true` if `addr` accepted a connection within `timeout`.
    ///
    /// Refusals, timeouts, and errors all return `false`; a probe never
    /// fails loudly.
    async fn probe(&self, addr: Address, timeout: Duration) -> bool;
}
