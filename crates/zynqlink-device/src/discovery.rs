//! LAN discovery by TCP port scan.
//!
//! The device does not announce itself, so discovery tries a TCP connect to
//! the device port on every host of the local /24 and keeps the ones that
//! answer. Probes run concurrently (bounded by a semaphore) with a short
//! per-host timeout, so a whole scan takes roughly one probe timeout.
//!
//! # Usage
//!
//! ```no_run
//! use zynqlink_device::discovery::Scanner;
//!
//! # async fn example() -> zynqlink_core::Result<()> {
//! let devices = Scanner::new().scan().await?;
//! for addr in &devices {
//!     println!("device at {addr}");
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;

use zynqlink_core::error::{Error, Result};
use zynqlink_core::events::LinkEvent;
use zynqlink_core::probe::Prober;
use zynqlink_core::types::{Address, DEFAULT_PORT};
use zynqlink_transport::TcpProber;

/// Per-host connect timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound on probes in flight.
pub const DEFAULT_MAX_CONCURRENCY: usize = 256;

/// Destination used to ask the OS which interface routes outward. A UDP
/// `connect` only selects a route; no packet is sent.
const ROUTE_PROBE: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 80);

/// Options for a subnet scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Device port to probe.
    pub port: u16,
    /// How long each host gets to accept.
    pub probe_timeout: Duration,
    /// Maximum probes in flight at once.
    pub max_concurrency: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Determine this machine's primary IPv4 address.
///
/// Fails with [`Error::NoLocalAddress`] when there is no outward route or
/// the only address is loopback.
pub async fn local_ipv4() -> Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| {
            tracing::debug!(error = %e, "Failed to bind route probe socket");
            Error::NoLocalAddress
        })?;
    socket.connect(ROUTE_PROBE).await.map_err(|e| {
        tracing::debug!(error = %e, "No outward route");
        Error::NoLocalAddress
    })?;
    let local = socket.local_addr().map_err(|_| Error::NoLocalAddress)?;
    usable_local(local)
}

fn usable_local(addr: SocketAddr) -> Result<Ipv4Addr> {
    match addr {
        SocketAddr::V4(v4) if !v4.ip().is_loopback() && !v4.ip().is_unspecified() => Ok(*v4.ip()),
        _ => Err(Error::NoLocalAddress),
    }
}

/// Every host address (`.1` to `.254`) in the /24 containing `local`.
pub fn subnet_hosts(local: Ipv4Addr, port: u16) -> impl Iterator<Item = Address> {
    let [a, b, c, _] = local.octets();
    (1..=254u8).map(move |d| Address::with_port(Ipv4Addr::new(a, b, c, d), port))
}

/// Concurrent subnet scanner.
///
/// Generic over the [`Prober`] so tests can substitute a fake; the default
/// probes with real TCP connects.
pub struct Scanner<P = TcpProber> {
    prober: Arc<P>,
    options: ScanOptions,
    event_tx: Option<broadcast::Sender<LinkEvent>>,
}

impl Scanner<TcpProber> {
    /// A scanner using TCP connects and default options.
    pub fn new() -> Self {
        Self::with_prober(TcpProber)
    }
}

impl Default for Scanner<TcpProber> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Prober + 'static> Scanner<P> {
    /// A scanner using `prober` and default options.
    pub fn with_prober(prober: P) -> Self {
        Scanner {
            prober: Arc::new(prober),
            options: ScanOptions::default(),
            event_tx: None,
        }
    }

    /// Replace the scan options.
    pub fn options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    /// Publish [`LinkEvent::DeviceListUpdated`] on `event_tx` after each scan.
    pub fn events(mut self, event_tx: broadcast::Sender<LinkEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn prober(&self) -> &P {
        &self.prober
    }

    pub fn scan_options(&self) -> &ScanOptions {
        &self.options
    }

    /// Find the local address, then scan its /24.
    ///
    /// Only a failure to determine the local address is an error; hosts that
    /// do not answer are simply absent from the result.
    pub async fn scan(&self) -> Result<BTreeSet<Address>> {
        let local = local_ipv4().await?;
        tracing::debug!(local = %local, "Local address resolved");
        Ok(self.scan_subnet(local).await)
    }

    /// Probe every host of the /24 containing `local`.
    ///
    /// Each probe runs as its own task and reports only its own result; the
    /// set is assembled after every task has finished.
    pub async fn scan_subnet(&self, local: Ipv4Addr) -> BTreeSet<Address> {
        let ScanOptions {
            port,
            probe_timeout,
            max_concurrency,
        } = self.options;
        tracing::debug!(
            subnet = %format!("{}/24", Ipv4Addr::from(u32::from(local) & 0xFFFF_FF00)),
            port,
            timeout_ms = probe_timeout.as_millis() as u64,
            max_concurrency,
            "Scanning subnet"
        );

        let permits = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut probes = JoinSet::new();

        for addr in subnet_hosts(local, port) {
            let prober = Arc::clone(&self.prober);
            let permits = Arc::clone(&permits);
            probes.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                prober.probe(addr, probe_timeout).await.then_some(addr)
            });
        }

        let mut found = BTreeSet::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(Some(addr)) => {
                    tracing::debug!(addr = %addr, "Device answered");
                    found.insert(addr);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Probe task failed"),
            }
        }

        tracing::info!(count = found.len(), "Discovery complete");
        if let Some(event_tx) = &self.event_tx {
            let _ = event_tx.send(LinkEvent::DeviceListUpdated {
                addresses: found.clone(),
            });
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zynqlink_test_harness::MockProber;

    const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 168, 7, 50);
    const HOST_A: Ipv4Addr = Ipv4Addr::new(192, 168, 7, 20);
    const HOST_C: Ipv4Addr = Ipv4Addr::new(192, 168, 7, 201);

    #[test]
    fn subnet_hosts_cover_one_to_254() {
        let hosts: Vec<Address> = subnet_hosts(LOCAL, 6401).collect();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts[0], Address::new(Ipv4Addr::new(192, 168, 7, 1)));
        assert_eq!(hosts[253], Address::new(Ipv4Addr::new(192, 168, 7, 254)));
        assert!(hosts.iter().all(|a| a.port() == 6401));
    }

    #[test]
    fn usable_local_rejects_loopback() {
        let lo: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert!(matches!(usable_local(lo), Err(Error::NoLocalAddress)));
        let any: SocketAddr = "0.0.0.0:5000".parse().unwrap();
        assert!(matches!(usable_local(any), Err(Error::NoLocalAddress)));
        let v6: SocketAddr = "[::1]:5000".parse().unwrap();
        assert!(matches!(usable_local(v6), Err(Error::NoLocalAddress)));

        let lan: SocketAddr = "10.1.2.3:5000".parse().unwrap();
        assert_eq!(usable_local(lan).unwrap(), Ipv4Addr::new(10, 1, 2, 3));
    }

    #[tokio::test]
    async fn local_ipv4_is_never_loopback() {
        // Depends on the host's routing table; either outcome is valid.
        match local_ipv4().await {
            Ok(ip) => assert!(!ip.is_loopback() && !ip.is_unspecified()),
            Err(e) => assert!(matches!(e, Error::NoLocalAddress)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scan_finds_exactly_the_listening_hosts() {
        let scanner = Scanner::with_prober(MockProber::new([HOST_C, HOST_A]));

        let start = tokio::time::Instant::now();
        let found = scanner.scan_subnet(LOCAL).await;
        let elapsed = start.elapsed();

        let expected: BTreeSet<Address> = [Address::new(HOST_A), Address::new(HOST_C)].into();
        assert_eq!(found, expected);
        assert_eq!(scanner.prober().probed().len(), 254);
        // Every probe ran at once, so the scan takes one probe timeout.
        assert!(elapsed < DEFAULT_PROBE_TIMEOUT * 2, "scan took {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn scan_respects_concurrency_cap() {
        let scanner = Scanner::with_prober(MockProber::new([HOST_A])).options(ScanOptions {
            max_concurrency: 16,
            ..ScanOptions::default()
        });

        let start = tokio::time::Instant::now();
        let found = scanner.scan_subnet(LOCAL).await;

        assert_eq!(found.len(), 1);
        assert!(scanner.prober().max_in_flight() <= 16);
        assert!(scanner.prober().max_in_flight() > 1);
        // 254 probes through 16 slots is at least 15 timeout rounds.
        assert!(start.elapsed() >= DEFAULT_PROBE_TIMEOUT * 15);
    }

    #[tokio::test(start_paused = true)]
    async fn scan_uses_configured_port_and_publishes_event() {
        let (event_tx, mut rx) = broadcast::channel(4);
        let scanner = Scanner::with_prober(MockProber::new([HOST_A]).refuse_fast())
            .options(ScanOptions {
                port: 7000,
                ..ScanOptions::default()
            })
            .events(event_tx);
        assert_eq!(scanner.scan_options().port, 7000);

        let found = scanner.scan_subnet(LOCAL).await;
        assert_eq!(
            found.into_iter().collect::<Vec<_>>(),
            vec![Address::with_port(HOST_A, 7000)]
        );

        match rx.try_recv().unwrap() {
            LinkEvent::DeviceListUpdated { addresses } => {
                assert!(addresses.contains(&Address::with_port(HOST_A, 7000)));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_network_yields_empty_set() {
        let scanner = Scanner::with_prober(MockProber::new(std::iter::empty()));
        assert!(scanner.scan_subnet(LOCAL).await.is_empty());
    }

    #[tokio::test]
    async fn tcp_scanner_finds_loopback_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let scanner = Scanner::new().options(ScanOptions {
            port,
            probe_timeout: Duration::from_millis(500),
            max_concurrency: 64,
        });
        let found = scanner.scan_subnet(Ipv4Addr::LOCALHOST).await;
        assert!(found.contains(&Address::with_port(Ipv4Addr::LOCALHOST, port)));
    }
}
