//! zynqlink-test-harness: Mock transports, probers, and devices for testing
//! zynqlink without hardware.
//!
//! - [`MockTransport`] scripts inbound bytes and records outbound frames for
//!   deterministic unit tests of the codec and link.
//! - [`MockProber`] answers discovery probes from a fixed host set.
//! - [`MockDevice`] is a loopback TCP server that plays a scripted frame
//!   conversation with a single client.

pub mod mock_device;
pub mod mock_probe;
pub mod mock_transport;

pub use mock_device::MockDevice;
pub use mock_probe::MockProber;
pub use mock_transport::{MockLogHandle, MockTransport, StreamEnd};
