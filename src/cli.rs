// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Running the capture/stream/record pipeline
//! - Listing capture devices and probing their current format
//! - Listing installed H.264 encoders

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};
use wamera::backends::capture::v4l2_utils::{self, DeviceInfo};
use wamera::backends::capture::{CaptureBufferRing, V4l2Device};
use wamera::constants::format_bitrate;
use wamera::media::encoders::enumerate_h264_encoders;
use wamera::media::pipeline as gst_pipeline;
use wamera::pipelines::{Destination, GstMuxerFactory, GstTranscoder, PipelineDriver, RunSummary};
use wamera::storage::{self, SegmentNamer};
use wamera::{Config, ContainerKind, PixelFormat, SinkFailurePolicy};

/// Flags of `wamera run` that override the configuration file
#[derive(Debug, Default, Clone, clap::Args)]
pub struct RunArgs {
    /// Capture device path
    #[arg(short, long)]
    pub device: Option<PathBuf>,

    /// Capture width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Capture height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Capture pixel format (mjpeg or yuyv)
    #[arg(long)]
    pub format: Option<String>,

    /// Capture frame rate
    #[arg(long)]
    pub fps: Option<u32>,

    /// Live stream URL, e.g. rtmp://host/app/key
    #[arg(long)]
    pub live_url: Option<String>,

    /// Do not stream live even if a URL is configured
    #[arg(long, conflicts_with = "live_url")]
    pub no_live: bool,

    /// Directory for recording segments
    #[arg(long)]
    pub record_dir: Option<PathBuf>,

    /// Do not record segments
    #[arg(long, conflicts_with = "record_dir")]
    pub no_record: bool,

    /// Segment length in seconds
    #[arg(long)]
    pub segment_secs: Option<f64>,

    /// Target bit-rate in kbps (default: derived from resolution)
    #[arg(long)]
    pub bitrate_kbps: Option<u32>,

    /// H.264 encoder element to use (see `wamera encoders`)
    #[arg(long)]
    pub encoder: Option<String>,

    /// Stop after this many captured frames
    #[arg(long)]
    pub frames: Option<u64>,

    /// Keep running when one sink fails as long as another remains
    #[arg(long)]
    pub isolate_sinks: bool,
}

impl RunArgs {
    /// Apply the flags on top of `config`
    pub fn apply(&self, config: &mut Config) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(device) = &self.device {
            config.device.path = device.clone();
        }
        if let Some(width) = self.width {
            config.stream.width = width;
        }
        if let Some(height) = self.height {
            config.stream.height = height;
        }
        if let Some(format) = &self.format {
            config.stream.pixel_format = PixelFormat::from_name(format)
                .ok_or_else(|| format!("Unknown pixel format: {}", format))?;
        }
        if let Some(fps) = self.fps {
            config.stream.framerate = fps;
        }
        if let Some(url) = &self.live_url {
            config.live.url = Some(url.clone());
        }
        if self.no_live {
            config.live.url = None;
        }
        if let Some(dir) = &self.record_dir {
            config.recording.enabled = true;
            config.recording.directory = dir.clone();
        }
        if self.no_record {
            config.recording.enabled = false;
        }
        if let Some(secs) = self.segment_secs {
            config.recording.segment_duration_secs = secs;
        }
        if let Some(kbps) = self.bitrate_kbps {
            config.stream.bitrate_kbps = Some(kbps);
        }
        if let Some(encoder) = &self.encoder {
            config.encoder.element = Some(encoder.clone());
        }
        if self.isolate_sinks {
            config.sink_failure_policy = SinkFailurePolicy::Isolate;
        }
        Ok(())
    }
}

/// Open every stage and run until Ctrl-C, the frame limit, or a fatal error
pub fn run_pipeline(
    config: &Config,
    max_frames: Option<u64>,
) -> Result<RunSummary, Box<dyn std::error::Error>> {
    config.validate()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            if shutdown.swap(true, Ordering::Relaxed) {
                warn!("Second interrupt, exiting immediately");
                std::process::exit(130);
            }
        })?;
    }

    let requested = config.requested_format()?;
    let device = V4l2Device::open(&config.device.path, &requested)?;
    let negotiated = device.format();
    let stream = config.stream_config(&negotiated)?;
    info!(
        device = %config.device.path.display(),
        width = stream.width(),
        height = stream.height(),
        format = %stream.pixel_format(),
        fps = stream.frame_rate(),
        bitrate = %format_bitrate(stream.bit_rate_kbps()),
        "Stream configured"
    );

    let ring = CaptureBufferRing::open(device, config.device.slot_count)?.with_frame_size(
        stream
            .pixel_format()
            .frame_size(stream.width(), stream.height()),
    );
    let transcoder = GstTranscoder::open(
        &stream,
        config.encoder.element.as_deref(),
        Duration::from_millis(config.encoder.codec_timeout_ms),
    )?;

    let mut driver = PipelineDriver::new(
        stream,
        ring,
        transcoder,
        Box::new(GstMuxerFactory),
        config.sink_failure_policy,
    );

    if let Some(url) = &config.live.url {
        driver.open_live(Destination::parse(url), config.live.container)?;
    }
    if config.recording.enabled {
        storage::ensure_dir(&config.recording.directory)?;
        driver.enable_recording(SegmentNamer::new(
            &config.recording.directory,
            &config.recording.file_prefix,
            config.recording.container,
        ));
    }

    driver.start()?;
    Ok(driver.run(&shutdown, max_frames)?)
}

fn print_device(device: &DeviceInfo) {
    println!("  {} - {}", device.path.display(), device.card);
    println!("      Driver: {} ({})", device.driver, device.bus);
    if !device.can_stream {
        println!("      Warning: no streaming I/O support");
    }
    for format in &device.formats {
        let marker = if format.supported { "" } else { " (unsupported)" };
        println!("      {} - {}{}", format.fourcc, format.description, marker);

        let sizes: Vec<String> = format
            .sizes
            .iter()
            .map(|size| {
                let rates: Vec<String> = size
                    .frame_rates()
                    .iter()
                    .map(|r| format!("{:.2}", r).trim_end_matches('0').trim_end_matches('.').to_string())
                    .collect();
                if rates.is_empty() {
                    format!("{}x{}", size.width, size.height)
                } else {
                    format!("{}x{}@{}", size.width, size.height, rates.join("/"))
                }
            })
            .collect();
        if !sizes.is_empty() {
            println!("          {}", sizes.join(", "));
        }
    }
}

/// List all capture devices with their formats
pub fn list_devices() -> Result<(), Box<dyn std::error::Error>> {
    let devices = v4l2_utils::list_capture_devices();

    if devices.is_empty() {
        println!("No capture devices found.");
        return Ok(());
    }

    println!("Available capture devices:");
    println!();
    for device in &devices {
        print_device(device);
        println!();
    }
    Ok(())
}

/// Show a device's current format without changing it
pub fn show_device(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let info = v4l2_utils::describe_device(path)?;
    let (fourcc, current) = v4l2_utils::current_format(path)?;

    println!("{} - {}", path.display(), info.card);
    match current {
        Some(format) => println!(
            "  Current: {}x{} {} @ {:.3} fps (interval {})",
            format.width,
            format.height,
            format.pixel_format,
            format.time_base.rate(),
            format.time_base
        ),
        None => println!("  Current: {} (not supported for capture)", fourcc),
    }
    if !info.can_capture {
        println!("  Not a video capture device");
    }
    Ok(())
}

/// List installed H.264 encoders, preferred first
pub fn list_encoders() -> Result<(), Box<dyn std::error::Error>> {
    gst_pipeline::init()?;
    let encoders = enumerate_h264_encoders();

    if encoders.is_empty() {
        println!("No H.264 encoders found.");
        return Ok(());
    }

    println!("Available H.264 encoders (preferred first):");
    for encoder in &encoders {
        let kind = if encoder.is_hardware { "HW" } else { "SW" };
        println!("  {:<14} {} [{}]", encoder.element_name, encoder.display_name, kind);
    }
    println!();
    println!(
        "Muxers: flv {}, mp4 {}, matroska {}",
        availability(ContainerKind::Flv.muxer_name()),
        availability(ContainerKind::Mp4.muxer_name()),
        availability(ContainerKind::Matroska.muxer_name()),
    );
    Ok(())
}

fn availability(element: &str) -> &'static str {
    if gst_pipeline::element_available(element) {
        "yes"
    } else {
        "missing"
    }
}
