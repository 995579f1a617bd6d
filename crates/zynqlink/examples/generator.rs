//! Signal generator example.
//!
//! Switches a board to generator mode and steps a sine wave through a few
//! frequencies and amplitudes before leaving the instrument.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p zynqlink --example generator -- 192.168.1.40
//! ```

use std::time::Duration;

use zynqlink::device::{Amplitude, CommandBuilder, DeviceLinkBuilder, GeneratorSession, WaveformShape};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let host = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: generator <host>"))?;

    let link = DeviceLinkBuilder::new().host(&host).build().await?;
    let mut generator = GeneratorSession::start(link, CommandBuilder::new()).await?;

    let steps = [
        (1_000, Amplitude::Full),
        (10_000, Amplitude::Half),
        (100_000, Amplitude::Quarter),
        (1_000_000, Amplitude::Eighth),
    ];
    for (frequency_hz, amplitude) in steps {
        println!(
            "sine {frequency_hz} Hz at {amplitude} ({:.3} V)",
            amplitude.volts()
        );
        generator
            .apply(WaveformShape::Sine, frequency_hz, amplitude)
            .await?;
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let mut link = generator.finish().await?;
    link.disconnect().await;
    println!("Done.");
    Ok(())
}
