//! Asynchronous link event types.
//!
//! Events are emitted through a [`tokio::sync::broadcast`] channel when the
//! link changes state, a frame arrives, or a discovery pass finishes. The
//! presentation layer subscribes to these instead of being called from the
//! I/O tasks directly.

use std::collections::BTreeSet;

use crate::observer::PresentationObserver;
use crate::types::{Address, ConnectionState, Waveform};

/// An event emitted by the device communication core.
///
/// Delivery is best effort through a bounded broadcast channel; a consumer
/// that falls behind sees `RecvError::Lagged` and misses the oldest events.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A discovery pass finished.
    DeviceListUpdated {
        /// Every host that accepted a connection on the device port.
        addresses: BTreeSet<Address>,
    },

    /// A telemetry frame was decoded into volts.
    WaveformReceived {
        /// The decoded samples and their sample rate.
        waveform: Waveform,
    },

    /// The link moved to a new connection state.
    ConnectionStateChanged {
        /// The state just entered.
        state: ConnectionState,
    },

    /// A frame arrived on the link, before any interpretation.
    MessageReceived {
        /// The frame's JSON body.
        payload: serde_json::Value,
    },
}

impl LinkEvent {
    /// Hand this event to the matching observer callback.
    ///
    /// `MessageReceived` has no callback in the presentation contract and
    /// is ignored here.
    pub fn dispatch(&self, observer: &dyn PresentationObserver) {
        match self {
            LinkEvent::DeviceListUpdated { addresses } => {
                observer.on_device_list_updated(addresses);
            }
            LinkEvent::WaveformReceived { waveform } => {
                observer.on_waveform_received(&waveform.volts, waveform.sample_rate_hz);
            }
            LinkEvent::ConnectionStateChanged { state } => {
                observer.on_connection_state_changed(*state);
            }
            LinkEvent::MessageReceived { .. } => {}
        }
    }
}
