//! Presentation-layer observer interface.
//!
//! GUI toolkits usually insist that widgets are touched from one thread.
//! Rather than call into the toolkit from I/O tasks, the core publishes
//! [`LinkEvent`]s and [`spawn_observer`] drains them on a task of its own,
//! invoking a [`PresentationObserver`] for each. The observer implementation
//! decides how to marshal the call onto its UI thread (post to an event
//! loop, push into a queue it polls, request a repaint, ...).

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::events::LinkEvent;
use crate::types::{Address, ConnectionState};

/// Callbacks the presentation layer implements to receive core events.
///
/// All methods have empty default bodies so an observer only overrides
/// what it renders. Implementations must be cheap and non-blocking; they run
/// on the forwarding task.
pub trait PresentationObserver: Send + Sync {
    /// A discovery pass completed with this set of reachable devices.
    fn on_device_list_updated(&self, _addresses: &BTreeSet<Address>) {}

    /// A waveform was decoded from telemetry.
    fn on_waveform_received(&self, _samples: &[f64], _sample_rate_hz: u64) {}

    /// The link changed state.
    fn on_connection_state_changed(&self, _state: ConnectionState) {}
}

/// Forward every event from `events` to `observer` until the channel closes.
///
/// Lagged receivers log how many events were skipped and keep going.
pub fn spawn_observer(
    mut events: broadcast::Receiver<LinkEvent>,
    observer: Arc<dyn PresentationObserver>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => event.dispatch(observer.as_ref()),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Presentation observer lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("Event channel closed, observer forwarding stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Waveform;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl PresentationObserver for Recorder {
        fn on_device_list_updated(&self, addresses: &BTreeSet<Address>) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("devices:{}", addresses.len()));
        }

        fn on_waveform_received(&self, samples: &[f64], sample_rate_hz: u64) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("waveform:{}@{}", samples.len(), sample_rate_hz));
        }

        fn on_connection_state_changed(&self, state: ConnectionState) {
            self.calls.lock().unwrap().push(format!("state:{state}"));
        }
    }

    #[test]
    fn dispatch_routes_each_variant() {
        let recorder = Recorder::default();

        let mut devices = BTreeSet::new();
        devices.insert(Address::new(Ipv4Addr::new(10, 0, 0, 9)));
        LinkEvent::DeviceListUpdated { addresses: devices }.dispatch(&recorder);
        LinkEvent::WaveformReceived {
            waveform: Waveform::new(vec![0.0, 1.0], 64_000_000),
        }
        .dispatch(&recorder);
        LinkEvent::ConnectionStateChanged {
            state: ConnectionState::Connected,
        }
        .dispatch(&recorder);
        LinkEvent::MessageReceived {
            payload: serde_json::json!({"ack": true}),
        }
        .dispatch(&recorder);

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec!["devices:1", "waveform:2@64000000", "state:connected"]
        );
    }

    #[tokio::test]
    async fn spawn_observer_forwards_until_closed() {
        let (tx, rx) = broadcast::channel(16);
        let recorder = Arc::new(Recorder::default());
        let handle = spawn_observer(rx, recorder.clone());

        tx.send(LinkEvent::ConnectionStateChanged {
            state: ConnectionState::Connecting,
        })
        .unwrap();
        tx.send(LinkEvent::ConnectionStateChanged {
            state: ConnectionState::Connected,
        })
        .unwrap();
        drop(tx);

        handle.await.unwrap();
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(*calls, vec!["state:connecting", "state:connected"]);
    }
}
