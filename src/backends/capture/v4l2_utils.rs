// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 device discovery and format enumeration

use super::CaptureFormat;
use crate::errors::{PipelineError, PipelineResult};
use crate::media::formats::PixelFormat;
use crate::media::time_base::TimeBase;
use std::path::{Path, PathBuf};
use tracing::debug;
use v4l::capability::Flags;
use v4l::prelude::*;
use v4l::video::Capture;

/// Capabilities and formats of one capture node
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub driver: String,
    pub card: String,
    pub bus: String,
    pub can_capture: bool,
    pub can_stream: bool,
    pub formats: Vec<FormatInfo>,
}

/// One pixel format and the frame sizes offered for it
#[derive(Debug, Clone)]
pub struct FormatInfo {
    pub fourcc: String,
    pub description: String,
    /// Whether the pipeline can transcode this format
    pub supported: bool,
    pub sizes: Vec<FrameSizeInfo>,
}

#[derive(Debug, Clone)]
pub struct FrameSizeInfo {
    pub width: u32,
    pub height: u32,
    /// Discrete frame intervals; empty when the device reports a range
    pub intervals: Vec<TimeBase>,
}

impl FrameSizeInfo {
    /// Frame rates for display, highest first
    pub fn frame_rates(&self) -> Vec<f64> {
        let mut rates: Vec<f64> = self.intervals.iter().map(|tb| tb.rate()).collect();
        rates.sort_by(|a, b| b.total_cmp(a));
        rates
    }
}

/// All `/dev/video*` nodes that can capture video
pub fn list_capture_devices() -> Vec<DeviceInfo> {
    let mut devices: Vec<DeviceInfo> = v4l::context::enum_devices()
        .into_iter()
        .filter_map(|node| match describe_device(node.path()) {
            Ok(info) if info.can_capture => Some(info),
            Ok(_) => None,
            Err(e) => {
                debug!(path = %node.path().display(), error = %e, "Skipping device");
                None
            }
        })
        .collect();
    devices.sort_by(|a, b| a.path.cmp(&b.path));
    devices
}

/// Query capabilities and enumerate formats, sizes and intervals
pub fn describe_device(path: &Path) -> PipelineResult<DeviceInfo> {
    let dev = Device::with_path(path).map_err(|e| {
        PipelineError::Device(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let caps = dev.query_caps().map_err(|e| {
        PipelineError::Device(format!("Failed to query {}: {}", path.display(), e))
    })?;

    let can_capture = caps.capabilities.contains(Flags::VIDEO_CAPTURE);
    let mut formats = Vec::new();

    if can_capture {
        for desc in dev.enum_formats().unwrap_or_default() {
            let sizes = enumerate_sizes(&dev, desc.fourcc);
            formats.push(FormatInfo {
                fourcc: desc.fourcc.to_string(),
                description: desc.description.clone(),
                supported: PixelFormat::from_fourcc(&desc.fourcc.repr).is_some(),
                sizes,
            });
        }
    }

    Ok(DeviceInfo {
        path: path.to_path_buf(),
        driver: caps.driver,
        card: caps.card,
        bus: caps.bus,
        can_capture,
        can_stream: caps.capabilities.contains(Flags::STREAMING),
        formats,
    })
}

fn enumerate_sizes(dev: &Device, fourcc: v4l::FourCC) -> Vec<FrameSizeInfo> {
    let mut sizes = Vec::new();
    let Ok(frame_sizes) = dev.enum_framesizes(fourcc) else {
        return sizes;
    };

    for size in frame_sizes {
        match size.size {
            v4l::framesize::FrameSizeEnum::Discrete(discrete) => {
                let intervals = dev
                    .enum_frameintervals(fourcc, discrete.width, discrete.height)
                    .map(|intervals| {
                        intervals
                            .into_iter()
                            .filter_map(|interval| match interval.interval {
                                v4l::frameinterval::FrameIntervalEnum::Discrete(frac) => {
                                    TimeBase::new(frac.numerator, frac.denominator)
                                }
                                _ => None,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                sizes.push(FrameSizeInfo {
                    width: discrete.width,
                    height: discrete.height,
                    intervals,
                });
            }
            v4l::framesize::FrameSizeEnum::Stepwise(step) => {
                // Report the bounds; any size in between is accepted
                for (width, height) in [
                    (step.min_width, step.min_height),
                    (step.max_width, step.max_height),
                ] {
                    sizes.push(FrameSizeInfo {
                        width,
                        height,
                        intervals: Vec::new(),
                    });
                }
            }
        }
    }
    sizes
}

/// Current format and frame interval without changing anything
pub fn current_format(path: &Path) -> PipelineResult<(String, Option<CaptureFormat>)> {
    let dev = Device::with_path(path).map_err(|e| {
        PipelineError::Device(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let format = dev
        .format()
        .map_err(|e| PipelineError::Device(format!("Failed to read format: {}", e)))?;
    let params = dev
        .params()
        .map_err(|e| PipelineError::Device(format!("Failed to read frame interval: {}", e)))?;

    let capture = PixelFormat::from_fourcc(&format.fourcc.repr).and_then(|pixel_format| {
        TimeBase::new(params.interval.numerator, params.interval.denominator).map(|time_base| {
            CaptureFormat {
                width: format.width,
                height: format.height,
                pixel_format,
                time_base,
            }
        })
    });
    Ok((format.fourcc.to_string(), capture))
}
