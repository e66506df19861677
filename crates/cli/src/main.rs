//! rfstream command line tool
//!
//! Diagnostic front end for the driver: probe devices, inspect an opened
//! device, and capture RX samples to a file. The mock backend can stand in
//! for hardware with `--backend mock`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{DriverConfig, StreamSettings, setup_logging};
use driver::backend::MockBackend;
use driver::{BackendRegistry, Device, Module, StreamConfig};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rfstream")]
#[command(author, version, about = "Probe and stream from an rfstream radio")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Also register the mock backend (no hardware required)
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List devices visible to the registered backends
    Probe,
    /// Open the first device and print its identity
    Info,
    /// Receive samples into a file as interleaved little-endian i16 I/Q
    Rx {
        /// Number of complex samples to capture
        #[arg(short, long, default_value_t = 1_048_576)]
        count: usize,
        /// Output file
        #[arg(short, long, value_name = "PATH")]
        out: PathBuf,
    },
    /// Write the default configuration file and exit
    SaveConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::SaveConfig = args.command {
        let config = DriverConfig::default();
        let path = DriverConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = match args.config {
        Some(ref path) => DriverConfig::load(Some(path.clone()))
            .context("Failed to load configuration")?,
        None => DriverConfig::load_or_default(),
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    setup_logging(log_level).context("Failed to set up logging")?;

    let mut registry = BackendRegistry::with_defaults();
    if args.mock {
        registry.register(Box::new(MockBackend::new()));
    }

    match args.command {
        Command::Probe => probe(&registry),
        Command::Info => print_info(&registry),
        Command::Rx { count, out } => capture(&registry, &config.stream, count, &out),
        Command::SaveConfig => unreachable!("handled above"),
    }
}

fn probe(registry: &BackendRegistry) -> Result<()> {
    let devices = registry.probe_all();
    if devices.is_empty() {
        println!("No devices found");
        return Ok(());
    }
    for dev in devices {
        println!(
            "{}  bus {:03} addr {:03}  {:04x}:{:04x}  serial {}",
            dev.backend,
            dev.bus_number,
            dev.address,
            dev.vendor_id,
            dev.product_id,
            dev.serial.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn print_info(registry: &BackendRegistry) -> Result<()> {
    let device = Device::open_first(registry).context("Failed to open a device")?;
    let info = device.info();
    println!("backend: {}", info.backend);
    println!("bus:     {:03}:{:03}", info.bus_number, info.address);
    println!("id:      {:04x}:{:04x}", info.vendor_id, info.product_id);
    println!("serial:  {}", info.serial.as_deref().unwrap_or("-"));
    println!("speed:   {}", device.speed().context("Failed to query device speed")?);
    Ok(())
}

fn capture(
    registry: &BackendRegistry,
    settings: &StreamSettings,
    count: usize,
    out: &PathBuf,
) -> Result<()> {
    let mut device = Device::open_first(registry).context("Failed to open a device")?;
    device
        .sync_config(Module::Rx, stream_config(settings))
        .context("Failed to configure the RX stream")?;

    let file = File::create(out)
        .with_context(|| format!("Failed to create output file: {}", out.display()))?;
    let mut writer = BufWriter::new(file);

    info!(count, "starting capture");
    let timeout = Duration::from_millis(settings.timeout_ms.max(1000));
    let chunk = settings.buffer_size;
    let mut samples = vec![0i16; chunk * 2];
    let mut bytes = vec![0u8; chunk * 4];
    let mut remaining = count;

    while remaining > 0 {
        let n = remaining.min(chunk);
        device
            .sync_rx(&mut samples[..n * 2], None, timeout)
            .context("RX failed")?;
        wire::pack_sc16q11(&samples[..n * 2], &mut bytes[..n * 4])
            .context("sample conversion failed")?;
        writer.write_all(&bytes[..n * 4])?;
        remaining -= n;
    }
    writer.flush()?;

    info!("capture complete: {} samples -> {}", count, out.display());
    Ok(())
}

fn stream_config(settings: &StreamSettings) -> StreamConfig {
    StreamConfig {
        format: settings.format,
        num_buffers: settings.num_buffers,
        samples_per_buffer: settings.buffer_size,
        num_transfers: settings.num_transfers,
        timeout: Duration::from_millis(settings.timeout_ms),
    }
}
