//! LAN discovery example.
//!
//! Probes TCP port 6401 on every host of the local /24 and lists the
//! devices that accept a connection.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p zynqlink --example discover
//! ```

use std::time::Duration;

use zynqlink::device::{ScanOptions, Scanner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let local = zynqlink::device::local_ipv4().await?;
    println!("Scanning {local}/24 for devices on port 6401...\n");

    let scanner = Scanner::new().options(ScanOptions {
        probe_timeout: Duration::from_millis(200),
        ..ScanOptions::default()
    });
    let devices = scanner.scan_subnet(local).await;

    if devices.is_empty() {
        println!("No devices found.");
        println!("\nTroubleshooting:");
        println!("  - Verify the board is powered on and connected to the LAN");
        println!("  - Check that TCP port 6401 is not blocked by a firewall");
        println!("  - Ensure your computer is on the same /24 as the board");
        return Ok(());
    }

    println!("Found {} device(s):", devices.len());
    for (i, addr) in devices.iter().enumerate() {
        println!("  [{}] {}", i + 1, addr);
    }
    Ok(())
}
