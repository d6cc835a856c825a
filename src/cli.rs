//! CLI commands: device listing and live capture.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use packet_viewer_lib::decode::{PacketDecoder, SummaryDecoder};
use packet_viewer_lib::device::types::DeviceId;
use packet_viewer_lib::settings::store::SettingsStore;
use packet_viewer_lib::settings::types::{Settings, SettingsOverrides};
use packet_viewer_lib::view::{JsonLinesSink, LogSink};
use packet_viewer_lib::{create_backend, CapturePipeline, PresentationSink};

/// How captured packets are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One summary line per packet through the log
    Log,
    /// One JSON object per packet on stdout
    Json,
}

pub struct CaptureOptions {
    pub device: Option<String>,
    pub config: Option<PathBuf>,
    pub format: OutputFormat,
    pub duration: Option<u64>,
    pub dummy: bool,
    pub overrides: SettingsOverrides,
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn load_settings(config: Option<&Path>) -> Result<Settings, Box<dyn std::error::Error>> {
    match config {
        Some(path) => Ok(SettingsStore::load(path)?),
        None => Ok(Settings::default()),
    }
}

/// List all capture devices
pub fn list_devices(config: Option<&Path>, dummy: bool) -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_settings(config)?;
    let backend = create_backend(&settings, dummy);
    let devices = backend.enumerate_devices()?;

    if devices.is_empty() {
        println!("No capture devices found.");
        if !cfg!(feature = "pcap") {
            println!("Built without the `pcap` feature; use --dummy for a simulated device.");
        }
        return Ok(());
    }

    println!("Available devices:");
    println!();
    for (index, device) in devices.iter().enumerate() {
        let loopback = if device.is_loopback { " (loopback)" } else { "" };
        println!("  [{index}] {}{loopback}", device.name);
        if let Some(description) = &device.description {
            println!("      {description}");
        }
    }
    Ok(())
}

/// Capture from a device until Ctrl+C, the duration, or a device fault.
pub fn capture(options: CaptureOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = load_settings(options.config.as_deref())?;
    settings.apply(&options.overrides);
    let backend = create_backend(&settings, options.dummy);

    let id = match options.device {
        Some(name) => DeviceId::new(name),
        None => backend
            .enumerate_devices()?
            .into_iter()
            .next()
            .map(|d| d.id)
            .ok_or("no capture devices found")?,
    };
    let device = backend.device(&id)?;

    let decoder: Arc<dyn PacketDecoder> = Arc::new(SummaryDecoder::new());
    let sink: Arc<dyn PresentationSink> = match options.format {
        OutputFormat::Log => Arc::new(LogSink::new(decoder)),
        OutputFormat::Json => Arc::new(JsonLinesSink::new(std::io::stdout(), decoder)),
    };
    let mut pipeline = CapturePipeline::new(sink, settings.pipeline_config());

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = Arc::clone(&stop_flag);
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    pipeline.start(device)?;
    eprintln!("Capturing on {id}... (press Ctrl+C to stop)");

    let start = Instant::now();
    let limit = options.duration.map(Duration::from_secs);
    loop {
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }
        if limit.is_some_and(|limit| start.elapsed() >= limit) {
            break;
        }
        pipeline.check_health()?;
        std::thread::sleep(POLL_INTERVAL);
    }

    pipeline.stop()?;

    let packets = pipeline.packets();
    let diagnostics = pipeline.diagnostics();
    eprintln!(
        "{} packets captured ({} bytes, {:.1} packets/s)",
        packets.len(),
        diagnostics.total_bytes,
        diagnostics.fps
    );
    if let Some(statistics) = pipeline.statistics() {
        eprintln!(
            "Device: {} received, {} dropped, {} dropped by interface",
            statistics.received, statistics.dropped, statistics.interface_dropped
        );
    }
    if diagnostics.publish_failures > 0 {
        eprintln!("{} output failures", diagnostics.publish_failures);
    }
    Ok(())
}
