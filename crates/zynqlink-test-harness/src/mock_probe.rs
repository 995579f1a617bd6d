//! Mock reachability prober for discovery tests.
//!
//! [`MockProber`] answers `true` for a fixed set of hosts and behaves like a
//! silent network for everyone else: it sleeps for the full probe timeout
//! before answering `false`. It also records how many probes were in flight
//! at once so tests can check the scanner's concurrency cap.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use zynqlink_core::probe::Prober;
use zynqlink_core::types::Address;

/// A [`Prober`] with scripted answers.
#[derive(Debug, Default)]
pub struct MockProber {
    listening: HashSet<Ipv4Addr>,
    /// How long an accepting host takes to answer.
    accept_delay: Duration,
    /// Whether unreachable hosts answer immediately or after the timeout.
    refuse_fast: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    probed: Mutex<Vec<Address>>,
}

impl MockProber {
    /// Create a prober for which exactly `listening` accept connections.
    pub fn new(listening: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        MockProber {
            listening: listening.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Delay before a listening host answers.
    pub fn accept_delay(mut self, delay: Duration) -> Self {
        self.accept_delay = delay;
        self
    }

    /// Make non-listening hosts refuse immediately instead of timing out.
    pub fn refuse_fast(mut self) -> Self {
        self.refuse_fast = true;
        self
    }

    /// Highest number of probes that ran concurrently.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every address probed, in call order.
    pub fn probed(&self) -> Vec<Address> {
        self.probed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Prober for MockProber {
    async fn probe(&self, addr: Address, timeout: Duration) -> bool {
        self.probed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(addr);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let reachable = self.listening.contains(&addr.ip());
        let wait = if reachable {
            self.accept_delay.min(timeout)
        } else if self.refuse_fast {
            Duration::ZERO
        } else {
            timeout
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reachable && self.accept_delay < timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn mock_prober_answers_from_listening_set() {
        let prober = MockProber::new([Ipv4Addr::new(10, 0, 0, 7)]);
        let timeout = Duration::from_millis(100);

        assert!(prober.probe(Address::new(Ipv4Addr::new(10, 0, 0, 7)), timeout).await);
        assert!(!prober.probe(Address::new(Ipv4Addr::new(10, 0, 0, 8)), timeout).await);
        assert_eq!(prober.probed().len(), 2);
        assert_eq!(prober.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mock_prober_slow_host_counts_as_timeout() {
        let prober =
            MockProber::new([Ipv4Addr::new(10, 0, 0, 7)]).accept_delay(Duration::from_millis(500));
        let reachable = prober
            .probe(Address::new(Ipv4Addr::new(10, 0, 0, 7)), Duration::from_millis(100))
            .await;
        assert!(!reachable);
    }
}
