//! Oscilloscope streaming example.
//!
//! Connects to a board, switches it to scope mode, and prints a summary of
//! every waveform until Ctrl-C. The scope is left cleanly with `exitins`.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p zynqlink --example scope_monitor -- 192.168.1.40
//! ```

use tokio_util::sync::CancellationToken;

use zynqlink::LinkEvent;
use zynqlink::device::{DeviceLinkBuilder, ReceiveOptions, ScopeSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let host = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: scope_monitor <host>"))?;

    let link = DeviceLinkBuilder::new().host(&host).build().await?;
    let mut events = link.subscribe();

    let cancel = CancellationToken::new();
    let scope = ScopeSession::start(link, ReceiveOptions::default(), &cancel).await?;
    println!("Streaming from {host}, press Ctrl-C to stop.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(LinkEvent::WaveformReceived { waveform }) => {
                    println!(
                        "{:>6} samples  {:>10} Hz  {:>7.3} Vpp",
                        waveform.len(),
                        waveform.sample_rate_hz,
                        waveform.peak_to_peak().unwrap_or(0.0)
                    );
                }
                Ok(LinkEvent::ConnectionStateChanged { state }) => {
                    println!("link {state}");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    println!("(skipped {n} events)");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    scope.stop().await?;
    println!("\nScope stopped.");
    Ok(())
}
