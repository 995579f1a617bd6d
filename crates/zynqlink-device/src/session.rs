//! Instrument sessions.
//!
//! The device runs one instrument at a time. A session switches it into a
//! mode, drives that mode, and leaves it again with `exitins`:
//!
//! - [`ScopeSession`]: switch to `scope`, then stream waveforms through the
//!   receive loop until stopped.
//! - [`GeneratorSession`]: switch to `generator`, then push `update`
//!   commands. The device sends nothing back in this mode.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use zynqlink_core::error::{Error, Result};
use zynqlink_core::events::LinkEvent;
use zynqlink_core::types::Instrument;

use crate::commands::{Amplitude, Command, CommandBuilder, WaveformShape};
use crate::io::{LinkIo, ReceiveOptions, spawn_receive_loop};
use crate::link::DeviceLink;

/// A session step that failed, handing back the link it was given.
///
/// The link is already torn down if the failure was on the network, but it
/// still carries its event channel, so subscribers stay attached and the
/// caller can reconnect it.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SessionError {
    pub error: Error,
    pub link: DeviceLink,
}

impl SessionError {
    /// Recover the link, discarding the error.
    pub fn into_link(self) -> DeviceLink {
        self.link
    }
}

impl From<SessionError> for Error {
    fn from(e: SessionError) -> Self {
        e.error
    }
}

/// An oscilloscope session.
pub struct ScopeSession {
    io: LinkIo,
}

impl ScopeSession {
    /// Switch the device to scope mode and start streaming.
    ///
    /// The receive loop always sends `exitins` before closing the link,
    /// whatever `options.exit_on_stop` says.
    pub async fn start(
        mut link: DeviceLink,
        options: ReceiveOptions,
        cancel: &CancellationToken,
    ) -> std::result::Result<Self, SessionError> {
        let switch = Command::Switch {
            instrument: Instrument::Scope,
        };
        if let Err(error) = link.send(&switch).await {
            return Err(SessionError { error, link });
        }
        tracing::info!(addr = ?link.peer(), "Scope session started");

        let options = ReceiveOptions {
            exit_on_stop: true,
            ..options
        };
        Ok(ScopeSession {
            io: spawn_receive_loop(link, options, cancel),
        })
    }

    /// Subscribe to waveform and state events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.io.subscribe()
    }

    /// Whether the device is still streaming to us.
    pub fn is_running(&self) -> bool {
        self.io.is_running()
    }

    /// Send a command through the session's dispatch queue.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.io.send(command).await
    }

    /// Leave scope mode, close the link, and return it.
    pub async fn stop(self) -> Result<DeviceLink> {
        let link = self.io.shutdown().await?;
        tracing::info!("Scope session stopped");
        Ok(link)
    }
}

/// A signal generator session.
pub struct GeneratorSession {
    link: DeviceLink,
    builder: CommandBuilder,
}

impl GeneratorSession {
    /// Switch the device to generator mode.
    pub async fn start(
        mut link: DeviceLink,
        builder: CommandBuilder,
    ) -> std::result::Result<Self, SessionError> {
        if let Err(error) = link
            .send(&builder.switch_instrument(Instrument::Generator))
            .await
        {
            return Err(SessionError { error, link });
        }
        tracing::info!(addr = ?link.peer(), "Generator session started");
        Ok(GeneratorSession { link, builder })
    }

    /// Program the generator output.
    ///
    /// An out-of-range frequency fails with a validation error before
    /// anything is sent.
    pub async fn apply(
        &mut self,
        shape: WaveformShape,
        frequency_hz: u64,
        amplitude: Amplitude,
    ) -> Result<()> {
        let command = self
            .builder
            .update_generator(shape, frequency_hz, amplitude)?;
        tracing::debug!(%shape, frequency_hz, %amplitude, "Updating generator");
        self.link.send(&command).await
    }

    /// The underlying link.
    pub fn link(&self) -> &DeviceLink {
        &self.link
    }

    /// Leave generator mode and return the still-connected link.
    pub async fn finish(mut self) -> std::result::Result<DeviceLink, SessionError> {
        match self.link.send(&self.builder.exit_instrument()).await {
            Ok(()) => {
                tracing::info!("Generator session finished");
                Ok(self.link)
            }
            Err(error) => Err(SessionError {
                error,
                link: self.link,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use serde_json::json;
    use zynqlink_core::types::{Address, ConnectionState};
    use zynqlink_test_harness::{MockDevice, MockTransport, StreamEnd};

    use crate::commands::AmplitudeFormat;

    async fn attached(mock: MockTransport) -> DeviceLink {
        let mut link = DeviceLink::new();
        link.attach(Box::new(mock), Address::new(Ipv4Addr::new(10, 0, 0, 3)))
            .await;
        link
    }

    #[tokio::test]
    async fn generator_session_command_sequence() {
        let mock = MockTransport::new();
        let log = mock.log();
        let link = attached(mock).await;

        let builder = CommandBuilder::new().amplitude_format(AmplitudeFormat::Ratio);
        let mut session = GeneratorSession::start(link, builder).await.unwrap();
        session
            .apply(WaveformShape::Triangle, 20_000, Amplitude::Half)
            .await
            .unwrap();

        let err = session
            .apply(WaveformShape::Sine, 0, Amplitude::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(session.link().is_connected());

        let link = session.finish().await.unwrap();
        assert!(link.is_connected());
        assert_eq!(
            log.sent_frames(),
            vec![
                json!({"cmd_type": "switch", "instrument": "generator"}),
                json!({"cmd_type": "update", "waveform": 1, "frequency": 20000, "amplitude": "1/2"}),
                json!({"cmd_type": "exitins"}),
            ]
        );
    }

    #[tokio::test]
    async fn failed_switch_hands_back_link() {
        let mut mock = MockTransport::new();
        mock.fail_sends("broken pipe");
        let link = attached(mock).await;
        let mut rx = link.subscribe();

        let cancel = CancellationToken::new();
        let err = ScopeSession::start(link, ReceiveOptions::default(), &cancel)
            .await
            .err()
            .unwrap();
        assert!(matches!(err.error, Error::Send(_)));
        let mut link = err.into_link();
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(matches!(
            rx.try_recv().unwrap(),
            LinkEvent::ConnectionStateChanged {
                state: ConnectionState::Disconnected
            }
        ));

        // Same link, same subscribers, fresh connection.
        let retry = MockTransport::new().end_with(StreamEnd::Hang);
        let log = retry.log();
        link.attach(Box::new(retry), Address::new(Ipv4Addr::new(10, 0, 0, 3)))
            .await;
        assert!(matches!(
            rx.try_recv().unwrap(),
            LinkEvent::ConnectionStateChanged {
                state: ConnectionState::Connecting
            }
        ));

        let session = ScopeSession::start(link, ReceiveOptions::default(), &cancel)
            .await
            .map_err(|e| e.error)
            .unwrap();
        session.stop().await.unwrap();
        assert_eq!(
            log.sent_frames()[0],
            json!({"cmd_type": "switch", "instrument": "scope"})
        );
    }

    #[tokio::test]
    async fn failed_exit_hands_back_link() {
        let mut mock = MockTransport::new();
        mock.fail_sends_after(1, "reset by peer");
        let log = mock.log();
        let link = attached(mock).await;
        let mut rx = link.subscribe();

        let session = GeneratorSession::start(link, CommandBuilder::new())
            .await
            .map_err(|e| e.error)
            .unwrap();
        let err = session.finish().await.unwrap_err();

        assert!(matches!(err.error, Error::Send(_)));
        assert_eq!(err.to_string(), err.error.to_string());
        assert!(!err.link.is_connected());
        assert!(log.closed());
        assert_eq!(
            log.sent_frames(),
            vec![json!({"cmd_type": "switch", "instrument": "generator"})]
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            LinkEvent::ConnectionStateChanged {
                state: ConnectionState::Disconnected
            }
        ));

        let as_error: Error = err.into();
        assert!(as_error.is_user_visible());
    }

    #[tokio::test]
    async fn scope_session_requires_connected_link() {
        let cancel = CancellationToken::new();
        let result = ScopeSession::start(DeviceLink::new(), ReceiveOptions::default(), &cancel).await;
        let err = result.err().unwrap();
        assert!(matches!(err.error, Error::NotConnected));
        assert_eq!(err.link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn scope_session_streams_and_exits() {
        let mut mock = MockTransport::new().end_with(StreamEnd::Hang);
        mock.push_frame(&json!({"waveform": [1024, -1024], "sample_rate": 2000}));
        let log = mock.log();
        let link = attached(mock).await;
        let mut rx = link.subscribe();

        let cancel = CancellationToken::new();
        let session = ScopeSession::start(link, ReceiveOptions::default(), &cancel)
            .await
            .unwrap();
        assert!(session.is_running());

        let waveform = loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if let LinkEvent::WaveformReceived { waveform } = event {
                break waveform;
            }
        };
        assert_eq!(waveform.volts, vec![2.5, -2.5]);
        assert_eq!(waveform.peak_to_peak(), Some(5.0));

        let link = session.stop().await.unwrap();
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert_eq!(
            log.sent_frames(),
            vec![
                json!({"cmd_type": "switch", "instrument": "scope"}),
                json!({"cmd_type": "exitins"}),
            ]
        );
    }

    #[tokio::test]
    async fn scope_session_over_tcp() {
        let mut device = MockDevice::new().await.unwrap();
        device.expect_frame(json!({"cmd_type": "switch", "instrument": "scope"}));
        device.send_frame(json!({"waveform": [2048, 2048], "sample_rate": 100}));
        device.expect_frame(json!({"cmd_type": "exitins"}));
        device.start();

        let mut link = DeviceLink::new();
        link.connect(Address::with_port(Ipv4Addr::LOCALHOST, device.port()))
            .await
            .unwrap();
        let mut rx = link.subscribe();

        let cancel = CancellationToken::new();
        let session = ScopeSession::start(link, ReceiveOptions::default(), &cancel)
            .await
            .unwrap();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, LinkEvent::WaveformReceived { .. }) {
                break;
            }
        }

        cancel.cancel();
        session.stop().await.unwrap();
        device.wait().await.unwrap();
    }
}
