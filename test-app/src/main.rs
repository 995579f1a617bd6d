// zynqlink test application -- CLI tool for exercising LAN discovery, the
// oscilloscope stream, and the signal generator against a real board or a
// mock transport.
//
// Usage:
//   zynqlink-test-app discover
//   zynqlink-test-app --host 192.168.1.40 scope --count 10
//   zynqlink-test-app --discover scope --duration 30
//   zynqlink-test-app --host 192.168.1.40 generate --shape square --frequency 10000 --amplitude 1/4
//   zynqlink-test-app --host 192.168.1.40 send '{"cmd_type": "exitins"}'
//   zynqlink-test-app --mock -v scope --count 5
//   zynqlink-test-app --mock generate --frequency 62500000 --ratio

use std::collections::BTreeSet;
use std::f64::consts::TAU;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rand::Rng;
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use zynqlink::device::{
    Amplitude, AmplitudeFormat, CommandBuilder, DeviceLink, DeviceLinkBuilder, GeneratorSession,
    ReceiveOptions, SampleCoding, ScanOptions, Scanner, ScopeSession, WaveformDecoder,
    WaveformShape,
};
use zynqlink::{
    Address, ConnectionState, DEFAULT_PORT, LinkEvent, PresentationObserver, spawn_observer,
};
use zynqlink_test_harness::{MockLogHandle, MockTransport, StreamEnd};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// zynqlink test application -- exercises a board from the command line.
#[derive(Parser)]
#[command(name = "zynqlink-test-app", version, about)]
struct Cli {
    /// Device IPv4 address, optionally with `:port` (e.g. 192.168.1.40).
    #[arg(long, global = true)]
    host: Option<String>,

    /// Device TCP port.
    #[arg(long, default_value_t = DEFAULT_PORT, global = true)]
    port: u16,

    /// Connect timeout in milliseconds.
    #[arg(long, default_value_t = 5000, global = true)]
    connect_timeout_ms: u64,

    /// Scan the local /24 and connect to the first device that answers.
    #[arg(long, global = true, conflicts_with = "host")]
    discover: bool,

    /// Use a mock transport with synthetic telemetry instead of a board.
    /// Useful for verifying CLI wiring without hardware.
    #[arg(long, global = true, conflicts_with_all = ["host", "discover"])]
    mock: bool,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` wins if set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the local /24 for devices listening on the device port.
    Discover {
        /// Per-host connect timeout in milliseconds.
        #[arg(long, default_value_t = 100)]
        timeout_ms: u64,

        /// Maximum probes in flight.
        #[arg(long, default_value_t = 256)]
        concurrency: usize,
    },

    /// Switch to the oscilloscope and print waveforms as they arrive.
    Scope {
        /// Stop after this many waveforms (0 = no limit).
        #[arg(long, default_value_t = 0)]
        count: usize,

        /// Duration in seconds (0 = run until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,

        /// Treat samples as offset-binary (2048 = 0 V) instead of signed.
        #[arg(long)]
        offset_binary: bool,
    },

    /// Switch to the signal generator and program its output.
    Generate {
        /// Waveform: sine, triangle, sawtooth, square (or 0..=3).
        #[arg(long, default_value = "sine")]
        shape: WaveformShape,

        /// Frequency in hertz (1..=62500000).
        #[arg(long)]
        frequency: u64,

        /// Amplitude ratio: 1, 1/2, 1/4, 1/8, 1/16.
        #[arg(long, default_value = "1")]
        amplitude: Amplitude,

        /// Send the amplitude as ratio text instead of a step index.
        #[arg(long)]
        ratio: bool,

        /// Seconds to keep the output running before leaving the generator
        /// (0 = until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        hold: u64,
    },

    /// Send one raw JSON frame and print whatever comes back.
    Send {
        /// JSON payload, e.g. '{"cmd_type": "switch", "instrument": "scope"}'.
        payload: String,

        /// Seconds to listen for replies.
        #[arg(long, default_value_t = 2)]
        listen: u64,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Default filter directives for a `-v` count.
fn log_filter(verbose: u8) -> String {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    format!("warn,zynqlink={level},zynqlink_device={level},zynqlink_test_app={level}")
}

/// Install the tracing subscriber. `RUST_LOG` takes precedence over `-v`.
fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn format_frequency(hz: u64) -> String {
    match hz {
        0..1_000 => format!("{hz} Hz"),
        1_000..1_000_000 => format!("{:.3} kHz", hz as f64 / 1_000.0),
        _ => format!("{:.6} MHz", hz as f64 / 1_000_000.0),
    }
}

/// Wait for Ctrl-C, or for `secs` seconds when non-zero.
async fn wait_for_stop(secs: u64) {
    if secs > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    } else {
        tokio::signal::ctrl_c().await.ok();
    }
}

/// Prints core events to the console.
struct ConsolePresenter;

impl PresentationObserver for ConsolePresenter {
    fn on_device_list_updated(&self, addresses: &BTreeSet<Address>) {
        println!("[devices] {} found", addresses.len());
    }

    fn on_waveform_received(&self, samples: &[f64], sample_rate_hz: u64) {
        let (min, max) = samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });
        println!(
            "[waveform] {:>6} samples @ {:<14} min {:>7.3} V  max {:>7.3} V",
            samples.len(),
            format_frequency(sample_rate_hz),
            min,
            max
        );
    }

    fn on_connection_state_changed(&self, state: ConnectionState) {
        println!("[link] {state}");
    }
}

// ---------------------------------------------------------------------------
// Connection setup
// ---------------------------------------------------------------------------

/// Open a link from the CLI options, or over `mock` when `--mock` is set.
async fn open_link(cli: &Cli, mock: Option<MockTransport>) -> Result<DeviceLink> {
    let builder = DeviceLinkBuilder::new()
        .port(cli.port)
        .connect_timeout(Duration::from_millis(cli.connect_timeout_ms));

    if let Some(mock) = mock {
        debug!("using mock transport");
        return Ok(builder.build_with_transport(Box::new(mock)).await?);
    }

    let builder = if let Some(host) = &cli.host {
        builder.host(host)
    } else if cli.discover {
        let devices = Scanner::new()
            .options(ScanOptions {
                port: cli.port,
                ..ScanOptions::default()
            })
            .scan()
            .await
            .context("LAN discovery failed")?;
        let addr = devices
            .first()
            .copied()
            .context("no device answered on the local network")?;
        println!("Discovered device at {addr}");
        info!(%addr, found = devices.len(), "using first discovered device");
        builder.address(addr)
    } else {
        bail!("--host, --discover, or --mock is required for this command");
    };

    let link = builder.build().await.context("failed to connect to device")?;
    info!(peer = ?link.peer(), "connected");
    Ok(link)
}

/// A mock board that streams `frames` noisy sine waves, then hangs up.
fn mock_scope_transport(frames: usize) -> MockTransport {
    let mut rng = rand::thread_rng();
    let mut mock = MockTransport::new().chunk_size(512).end_with(StreamEnd::Close);
    for _ in 0..frames {
        let cycles = rng.gen_range(1.0..4.0);
        let codes: Vec<i64> = (0..256)
            .map(|i| {
                let phase = TAU * cycles * i as f64 / 256.0;
                (1500.0 * phase.sin()) as i64 + rng.gen_range(-20..=20)
            })
            .collect();
        mock.push_frame(&json!({ "waveform": codes, "sample_rate": 1_000_000 }));
    }
    mock
}

fn print_sent_frames(log: &MockLogHandle) {
    println!("\nFrames sent to mock transport:");
    for frame in log.sent_frames() {
        println!("  {frame}");
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_discover(port: u16, timeout_ms: u64, concurrency: usize) -> Result<()> {
    let local = zynqlink::device::local_ipv4()
        .await
        .context("could not determine the local network")?;
    println!("Scanning {local}/24 on port {port} ({timeout_ms} ms per host)...");
    println!();

    let devices = Scanner::new()
        .options(ScanOptions {
            port,
            probe_timeout: Duration::from_millis(timeout_ms),
            max_concurrency: concurrency,
        })
        .scan_subnet(local)
        .await;
    info!(%local, port, found = devices.len(), "scan complete");

    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }

    println!("{:<16}  Port", "IP Address");
    println!("{:<16}  {}", "-".repeat(16), "-".repeat(5));
    for addr in &devices {
        println!("{:<16}  {}", addr.ip(), addr.port());
    }
    println!();
    println!("{} device(s) found.", devices.len());
    Ok(())
}

async fn cmd_scope(link: DeviceLink, count: usize, duration_secs: u64, coding: SampleCoding) -> Result<()> {
    let mut event_rx = link.subscribe();
    let presenter = spawn_observer(link.subscribe(), Arc::new(ConsolePresenter));

    let cancel = CancellationToken::new();
    let options = ReceiveOptions {
        decoder: WaveformDecoder::new().coding(coding),
        ..ReceiveOptions::default()
    };
    let scope = ScopeSession::start(link, options, &cancel)
        .await
        .map_err(zynqlink::Error::from)?;

    info!(?coding, count, duration_secs, "scope started");
    println!("Streaming scope telemetry (Ctrl-C to stop)...");

    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));
    let mut received = 0usize;

    loop {
        let sleep_until = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep_until(sleep_until) => {
                if deadline.is_some() {
                    println!("Scope duration elapsed.");
                    break;
                }
            }
            event = event_rx.recv() => match event {
                Ok(LinkEvent::WaveformReceived { .. }) => {
                    received += 1;
                    if count > 0 && received >= count {
                        break;
                    }
                }
                Ok(LinkEvent::ConnectionStateChanged { state: ConnectionState::Disconnected }) => {
                    println!("Device closed the connection.");
                    break;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    println!("[warning] missed {n} events (consumer too slow)");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    // Dropping the returned link closes the event channel, which ends the
    // presenter task.
    drop(scope.stop().await?);
    presenter.await.ok();
    info!(received, "scope stopped");
    println!("{received} waveform(s) received.");
    Ok(())
}

async fn cmd_generate(
    link: DeviceLink,
    shape: WaveformShape,
    frequency_hz: u64,
    amplitude: Amplitude,
    ratio: bool,
    hold_secs: Option<u64>,
) -> Result<()> {
    let format = if ratio {
        AmplitudeFormat::Ratio
    } else {
        AmplitudeFormat::Index
    };
    let builder = CommandBuilder::new().amplitude_format(format);

    // Validate before switching so a typo does not disturb the board.
    builder.update_generator(shape, frequency_hz, amplitude)?;

    let mut generator = GeneratorSession::start(link, builder)
        .await
        .map_err(zynqlink::Error::from)?;
    generator.apply(shape, frequency_hz, amplitude).await?;
    info!(%shape, frequency_hz, %amplitude, ?format, "generator configured");
    println!(
        "Generating {shape} at {} with amplitude {amplitude} ({:.3} V peak)",
        format_frequency(frequency_hz),
        amplitude.volts()
    );

    if let Some(secs) = hold_secs {
        println!("Holding output (Ctrl-C to stop)...");
        wait_for_stop(secs).await;
    }

    let mut link = generator.finish().await.map_err(zynqlink::Error::from)?;
    link.disconnect().await;
    debug!("generator released");
    println!("Generator stopped.");
    Ok(())
}

async fn cmd_send(mut link: DeviceLink, payload: &str, listen_secs: u64) -> Result<()> {
    let value: Value = serde_json::from_str(payload).context("payload is not valid JSON")?;
    link.send_json(&value).await?;
    debug!(%value, "raw frame sent");
    println!("Sent: {value}");

    let deadline = Instant::now() + Duration::from_secs(listen_secs);
    loop {
        match tokio::time::timeout_at(deadline, link.receive_one()).await {
            Ok(Ok(Some(frame))) => println!("Received: {frame}"),
            Ok(Ok(None)) => {
                println!("Device closed the connection.");
                break;
            }
            Ok(Err(e)) if !e.is_user_visible() => println!("[warning] {e}"),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => break,
        }
    }

    link.disconnect().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Discover {
            timeout_ms,
            concurrency,
        } => cmd_discover(cli.port, *timeout_ms, *concurrency).await,
        Command::Scope {
            count,
            duration,
            offset_binary,
        } => {
            let frames = if *count == 0 { 5 } else { (*count).min(20) };
            let mock = cli.mock.then(|| mock_scope_transport(frames));
            let link = open_link(&cli, mock).await?;
            let coding = if *offset_binary {
                SampleCoding::OffsetBinary
            } else {
                SampleCoding::Signed
            };
            cmd_scope(link, *count, *duration, coding).await
        }
        Command::Generate {
            shape,
            frequency,
            amplitude,
            ratio,
            hold,
        } => {
            let mock = cli.mock.then(MockTransport::new);
            let log = mock.as_ref().map(MockTransport::log);
            let link = open_link(&cli, mock).await?;
            // A mock board has nothing to hold the output for.
            let hold = (!cli.mock).then_some(*hold);
            let result = cmd_generate(link, *shape, *frequency, *amplitude, *ratio, hold).await;
            if let Some(log) = &log {
                print_sent_frames(log);
            }
            result
        }
        Command::Send { payload, listen } => {
            let mock = cli.mock.then(|| {
                let mut mock = MockTransport::new().end_with(StreamEnd::Close);
                mock.push_frame(&json!({ "waveform": [0, 1024, 2047, 1024, 0], "sample_rate": 1000 }));
                mock
            });
            let link = open_link(&cli, mock).await?;
            cmd_send(link, payload, *listen).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<zynqlink::Error>() {
                Some(err) if err.is_user_visible() => eprintln!("Link error: {e:#}"),
                Some(_) => eprintln!("Invalid input: {e:#}"),
                None => eprintln!("Error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
