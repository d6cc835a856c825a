use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

use cli::{CaptureOptions, OutputFormat};
use packet_viewer_lib::settings::types::SettingsOverrides;

#[derive(Parser)]
#[command(name = "packet-viewer")]
#[command(about = "Live network packet viewer")]
#[command(version)]
struct Cli {
    /// Log debug detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (JSON); defaults are used when omitted or missing
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use the simulated capture device
    #[arg(long, global = true)]
    dummy: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List capture devices
    List,

    /// Capture and print packets until Ctrl+C
    Capture {
        /// Device name (from 'packet-viewer list'); the first device if omitted
        #[arg(short, long)]
        device: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Log)]
        format: OutputFormat,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Bytes captured per packet (overrides the settings file)
        #[arg(long)]
        snaplen: Option<i32>,

        /// Do not put the interface in promiscuous mode
        #[arg(long)]
        no_promiscuous: bool,

        /// Minimum milliseconds between device statistics refreshes
        #[arg(long)]
        statistics_interval_ms: Option<u64>,

        /// Worker sleep in milliseconds when no packets are queued
        #[arg(long)]
        idle_interval_ms: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG overrides the level picked from the flags
    let default_level = match (&cli.command, cli.verbose) {
        (_, true) => "debug",
        (
            Commands::Capture {
                format: OutputFormat::Log,
                ..
            },
            false,
        ) => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(cli.verbose)
        .init();

    match cli.command {
        Commands::List => cli::list_devices(cli.config.as_deref(), cli.dummy),
        Commands::Capture {
            device,
            format,
            duration,
            snaplen,
            no_promiscuous,
            statistics_interval_ms,
            idle_interval_ms,
        } => cli::capture(CaptureOptions {
            device,
            config: cli.config,
            format,
            duration,
            dummy: cli.dummy,
            overrides: SettingsOverrides {
                idle_interval_ms,
                statistics_interval_ms,
                snaplen,
                promiscuous: no_promiscuous.then_some(false),
            },
        }),
    }
}
