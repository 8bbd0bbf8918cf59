// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use wamera::Config;
use wamera::constants::{app_info, capture};
use wamera::media::pipeline as gst_pipeline;

mod cli;

#[derive(Parser)]
#[command(name = "wamera")]
#[command(about = "Stream a webcam over RTMP and record it in fixed-length segments")]
#[command(version = app_info::version())]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Append logs to this file as well as stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture, stream and record until interrupted
    Run(cli::RunArgs),

    /// List capture devices and their formats
    List,

    /// Show a device's current format
    Info {
        /// Capture device path
        #[arg(short, long, default_value = capture::DEFAULT_DEVICE)]
        device: PathBuf,
    },

    /// List installed H.264 encoders
    Encoders,
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to override, e.g. RUST_LOG=wamera=debug
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_filter(filter());

    let file = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry().with(stderr).with(file).try_init()?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None => Ok(Config::default()),
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        tracing::error!(error = %e, "wamera failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(file) = cli.log_file {
        config.log_file = Some(file);
    }

    init_logging(&config.log_level, config.log_file.as_deref())?;
    tracing::info!(version = app_info::version(), "Starting wamera");

    gst_pipeline::init()?;
    gst_pipeline::set_debug_threshold(&config.log_level);

    match cli.command {
        Commands::Run(args) => {
            args.apply(&mut config)?;
            let summary = cli::run_pipeline(&config, args.frames)?;
            println!(
                "Captured {} frames ({} dropped), encoded {} units, completed {} segments",
                summary.frames_captured,
                summary.frames_dropped,
                summary.units_encoded,
                summary.segments_completed
            );
            Ok(())
        }
        Commands::List => cli::list_devices(),
        Commands::Info { device } => cli::show_device(&device),
        Commands::Encoders => cli::list_encoders(),
    }
}
