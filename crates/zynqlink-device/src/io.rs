//! Receive loop and command dispatch for an active link.
//!
//! [`spawn_receive_loop`] moves a connected [`DeviceLink`] into a dedicated
//! Tokio task. That task is the only thing touching the link from then on:
//! it reads telemetry, decodes waveforms, and publishes
//! [`LinkEvent::WaveformReceived`], while commands from any number of
//! callers are funnelled to it through [`LinkIo::send`] and written one at
//! a time.
//!
//! The loop stops when the shared [`CancellationToken`] fires, when
//! [`LinkIo::shutdown`] is called, when the device hangs up, or on a link
//! error. On the way out it closes the link (optionally sending `exitins`
//! first) and hands it back through [`LinkIo::shutdown`].

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use zynqlink_core::error::{Error, Result};
use zynqlink_core::events::LinkEvent;

use crate::commands::Command;
use crate::link::DeviceLink;
use crate::waveform::{TelemetryMessage, WaveformDecoder};

/// Options for the receive loop.
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// Decoder applied to telemetry frames.
    pub decoder: WaveformDecoder,
    /// Send `exitins` before closing the link on shutdown.
    pub exit_on_stop: bool,
    /// Depth of the command queue.
    pub command_capacity: usize,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            decoder: WaveformDecoder::default(),
            exit_on_stop: false,
            command_capacity: 32,
        }
    }
}

/// A command handed to the loop.
struct Request {
    command: Command,
    reply: oneshot::Sender<Result<()>>,
}

/// Handle to a running receive loop.
pub struct LinkIo {
    cmd_tx: mpsc::Sender<Request>,
    /// Child of the caller's token; cancelling it stops only this loop.
    cancel: CancellationToken,
    event_tx: broadcast::Sender<LinkEvent>,
    task: JoinHandle<DeviceLink>,
}

impl LinkIo {
    /// Queue `command` and wait until it has been written.
    ///
    /// Returns [`Error::NotConnected`] once the loop has stopped.
    pub async fn send(&self, command: Command) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Request { command, reply })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Subscribe to the link's events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop and recover the (now disconnected) link.
    pub async fn shutdown(self) -> Result<DeviceLink> {
        self.cancel.cancel();
        self.task.await.map_err(|e| {
            tracing::error!(error = %e, "Receive loop task failed");
            Error::NotConnected
        })
    }
}

/// Spawn the receive loop for `link`.
///
/// `cancel` is the caller's stop signal; the loop also stops on its own
/// when the link drops.
pub fn spawn_receive_loop(
    link: DeviceLink,
    options: ReceiveOptions,
    cancel: &CancellationToken,
) -> LinkIo {
    let (cmd_tx, cmd_rx) = mpsc::channel(options.command_capacity.max(1));
    let cancel = cancel.child_token();
    let event_tx = link.event_sender();

    let task = tokio::spawn(receive_loop(
        link,
        options,
        event_tx.clone(),
        cmd_rx,
        cancel.clone(),
    ));

    LinkIo {
        cmd_tx,
        cancel,
        event_tx,
        task,
    }
}

/// The loop itself.
///
/// `select!` is biased so that a pending cancellation wins over queued
/// commands, and queued commands win over the next read.
async fn receive_loop(
    mut link: DeviceLink,
    options: ReceiveOptions,
    event_tx: broadcast::Sender<LinkEvent>,
    mut cmd_rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) -> DeviceLink {
    debug!(addr = ?link.peer(), "Receive loop started");

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("Receive loop cancelled");
                break;
            }

            request = cmd_rx.recv() => {
                let Some(Request { command, reply }) = request else {
                    debug!("All command senders dropped, stopping receive loop");
                    break;
                };
                let result = link.send(&command).await;
                let lost = result.is_err() && !link.is_connected();
                let _ = reply.send(result);
                if lost {
                    break;
                }
            }

            frame = link.receive_one() => {
                match frame {
                    Ok(Some(payload)) => publish_waveform(payload, &options.decoder, &event_tx),
                    Ok(None) => {
                        debug!("Device hung up, stopping receive loop");
                        break;
                    }
                    Err(Error::Decode(_)) => {
                        // Frame consumed; the link is still usable.
                    }
                    Err(e) if cancel.is_cancelled() => {
                        debug!(error = %e, "Read ended by shutdown");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Receive loop stopped by link error");
                        break;
                    }
                }
            }
        }
    }

    if link.is_connected() {
        if options.exit_on_stop {
            link.close_instrument().await;
        } else {
            link.disconnect().await;
        }
    }
    debug!("Receive loop finished");
    link
}

/// Decode a telemetry frame and publish it. Frames without samples are
/// acknowledgements or status and are skipped.
fn publish_waveform(
    payload: serde_json::Value,
    decoder: &WaveformDecoder,
    event_tx: &broadcast::Sender<LinkEvent>,
) {
    match TelemetryMessage::from_value(payload) {
        Ok(Some(message)) if !message.waveform.is_empty() => {
            let waveform = decoder.decode_telemetry(&message);
            tracing::trace!(
                samples = waveform.len(),
                sample_rate = waveform.sample_rate_hz,
                "Waveform decoded"
            );
            let _ = event_tx.send(LinkEvent::WaveformReceived { waveform });
        }
        Ok(_) => tracing::trace!("Frame without samples skipped"),
        Err(e) => tracing::warn!(error = %e, "Ignoring malformed telemetry"),
    }
}
