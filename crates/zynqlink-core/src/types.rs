//! Core types shared by every zynqlink crate.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// TCP port the device listens on by convention.
pub const DEFAULT_PORT: u16 = 6401;

/// Sample rate assumed when a telemetry message does not carry one.
pub const DEFAULT_SAMPLE_RATE_HZ: u64 = 64_000_000;

/// Network location of a candidate or connected device.
///
/// Ordered by IP then port so that discovery results sort naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    ip: Ipv4Addr,
    port: u16,
}

impl Address {
    /// An address on the default device port.
    pub const fn new(ip: Ipv4Addr) -> Self {
        Address {
            ip,
            port: DEFAULT_PORT,
        }
    }

    /// An address on an explicit port.
    pub const fn with_port(ip: Ipv4Addr, port: u16) -> Self {
        Address { ip, port }
    }

    /// The IPv4 host.
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// The TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The address as a socket address for connecting.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<SocketAddrV4> for Address {
    fn from(addr: SocketAddrV4) -> Self {
        Address::with_port(*addr.ip(), addr.port())
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parse `"a.b.c.d"` (default port) or `"a.b.c.d:port"`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(ip) = s.parse::<Ipv4Addr>() {
            return Ok(Address::new(ip));
        }
        s.parse::<SocketAddrV4>()
            .map(Address::from)
            .map_err(|_| Error::Validation(format!("not an IPv4 address: {s:?}")))
    }
}

/// Lifecycle state of a device link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection. The initial state, and the state after any failure.
    #[default]
    Disconnected,
    /// A TCP connect is in flight.
    Connecting,
    /// Connected; commands may be sent and frames received.
    Connected,
    /// The last connect attempt failed. Transient: the link settles back in
    /// `Disconnected` right after reporting it.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Instrument personality the device can be switched into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    /// Oscilloscope: the device streams waveform telemetry.
    Scope,
    /// Signal generator: the device accepts waveform parameters.
    Generator,
}

impl Instrument {
    /// Name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Instrument::Scope => "scope",
            Instrument::Generator => "generator",
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Instrument {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scope" | "oscilloscope" => Ok(Instrument::Scope),
            "generator" | "gen" => Ok(Instrument::Generator),
            other => Err(Error::Validation(format!("unknown instrument: {other}"))),
        }
    }
}

/// A decoded waveform: sample voltages in arrival order plus the rate they
/// were captured at.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Sample voltages, same order and length as the raw ADC codes.
    pub volts: Vec<f64>,
    /// Capture rate in hertz.
    pub sample_rate_hz: u64,
}

impl Waveform {
    /// Create a waveform from decoded voltages.
    pub fn new(volts: Vec<f64>, sample_rate_hz: u64) -> Self {
        Waveform {
            volts,
            sample_rate_hz,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.volts.len()
    }

    /// Whether the waveform has no samples.
    pub fn is_empty(&self) -> bool {
        self.volts.is_empty()
    }

    /// Peak-to-peak voltage (max − min), or `None` for an empty waveform.
    pub fn peak_to_peak(&self) -> Option<f64> {
        let mut iter = self.volts.iter().copied();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
        Some(max - min)
    }

    /// Time span covered by the samples, or `None` when the sample rate is 0.
    pub fn duration(&self) -> Option<Duration> {
        if self.sample_rate_hz == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            self.volts.len() as f64 / self.sample_rate_hz as f64,
        ))
    }
}
