// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline configuration
//!
//! [`Config`] is the user-facing, serde-backed settings file. Every field has a
//! default so a partial JSON file (or none at all) is valid. Once the capture
//! device has negotiated its format, [`Config::stream_config`] freezes the
//! effective values into an immutable [`StreamConfig`].

use crate::backends::capture::CaptureFormat;
use crate::constants::{BitratePreset, capture, stream, timing};
use crate::errors::{PipelineError, PipelineResult};
use crate::media::formats::{ContainerKind, PixelFormat};
use crate::media::time_base::TimeBase;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to do when an output sink fails to open or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkFailurePolicy {
    /// Any sink failure stops the pipeline
    #[default]
    Abort,
    /// A failing segment is skipped until the next boundary; a failing live
    /// sink is dropped while recording continues
    Isolate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Device node, e.g. `/dev/video0`
    pub path: PathBuf,
    /// Number of mmap slots shared with the driver
    pub slot_count: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(capture::DEFAULT_DEVICE),
            slot_count: capture::DEFAULT_SLOT_COUNT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Requested frames per second
    pub framerate: u32,
    /// Used when `bitrate_kbps` is unset
    pub bitrate_preset: BitratePreset,
    /// Explicit target bitrate
    pub bitrate_kbps: Option<u32>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            width: stream::DEFAULT_WIDTH,
            height: stream::DEFAULT_HEIGHT,
            pixel_format: PixelFormat::Mjpeg,
            framerate: stream::DEFAULT_FRAMERATE,
            bitrate_preset: BitratePreset::default(),
            bitrate_kbps: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSettings {
    /// Live destination (e.g. `rtmp://host/app/key`); no live sink when unset
    pub url: Option<String>,
    pub container: ContainerKind,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            url: None,
            container: ContainerKind::Flv,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub enabled: bool,
    pub directory: PathBuf,
    /// Length of one recording segment in seconds
    pub segment_duration_secs: f64,
    pub container: ContainerKind,
    /// File name prefix, followed by the wall-clock timestamp
    pub file_prefix: String,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: crate::storage::default_recording_dir(),
            segment_duration_secs: stream::DEFAULT_SEGMENT_SECS as f64,
            container: ContainerKind::Mp4,
            file_prefix: stream::DEFAULT_FILE_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Force a specific GStreamer encoder element (e.g. `x264enc`)
    pub element: Option<String>,
    /// How long to wait for a codec output before treating it as "not ready"
    pub codec_timeout_ms: u64,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            element: None,
            codec_timeout_ms: timing::CODEC_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceSettings,
    pub stream: StreamSettings,
    pub live: LiveSettings,
    pub recording: RecordingSettings,
    pub encoder: EncoderSettings,
    pub sink_failure_policy: SinkFailurePolicy,
    /// Append-only plain-text log file
    pub log_file: Option<PathBuf>,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceSettings::default(),
            stream: StreamSettings::default(),
            live: LiveSettings::default(),
            recording: RecordingSettings::default(),
            encoder: EncoderSettings::default(),
            sink_failure_policy: SinkFailurePolicy::default(),
            log_file: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load a JSON configuration file
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            PipelineError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Check the settings for values the pipeline cannot run with
    pub fn validate(&self) -> PipelineResult<()> {
        let slots = self.device.slot_count;
        if !(capture::MIN_SLOT_COUNT..=capture::MAX_SLOT_COUNT).contains(&slots) {
            return Err(PipelineError::Config(format!(
                "slot_count must be between {} and {}, got {}",
                capture::MIN_SLOT_COUNT,
                capture::MAX_SLOT_COUNT,
                slots
            )));
        }
        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(PipelineError::Config(format!(
                "Invalid resolution {}x{}",
                self.stream.width, self.stream.height
            )));
        }
        if self.stream.framerate == 0 {
            return Err(PipelineError::Config("framerate must be positive".into()));
        }
        if self.stream.bitrate_kbps == Some(0) {
            return Err(PipelineError::Config("bitrate_kbps must be positive".into()));
        }
        let secs = self.recording.segment_duration_secs;
        if self.recording.enabled {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(PipelineError::Config(format!(
                    "segment_duration_secs must be positive, got {}",
                    secs
                )));
            }
            self.segment_duration()?;
        }
        if self.live.url.is_none() && !self.recording.enabled {
            return Err(PipelineError::Config(
                "Nothing to do: no live URL and recording disabled".into(),
            ));
        }
        if self.recording.enabled && self.recording.container == ContainerKind::Flv {
            return Err(PipelineError::Config(
                "Recording segments must use a file container (mp4 or matroska)".into(),
            ));
        }
        Ok(())
    }

    /// Segment length as a [`Duration`]; negative or NaN values count as zero
    pub fn segment_duration(&self) -> PipelineResult<Duration> {
        let secs = self.recording.segment_duration_secs;
        Duration::try_from_secs_f64(if secs > 0.0 { secs } else { 0.0 }).map_err(|e| {
            PipelineError::Config(format!("segment_duration_secs {} is out of range: {}", secs, e))
        })
    }

    /// The capture format to request from the device
    pub fn requested_format(&self) -> PipelineResult<CaptureFormat> {
        let time_base = TimeBase::from_fps(self.stream.framerate)
            .ok_or_else(|| PipelineError::Config("framerate must be positive".into()))?;
        Ok(CaptureFormat {
            width: self.stream.width,
            height: self.stream.height,
            pixel_format: self.stream.pixel_format,
            time_base,
        })
    }

    /// Freeze the effective stream parameters from what the device negotiated
    pub fn stream_config(&self, negotiated: &CaptureFormat) -> PipelineResult<StreamConfig> {
        let bit_rate_kbps = self.stream.bitrate_kbps.unwrap_or_else(|| {
            self.stream
                .bitrate_preset
                .bitrate_kbps(negotiated.width, negotiated.height)
        });
        StreamConfig::new(
            negotiated.width,
            negotiated.height,
            negotiated.pixel_format,
            negotiated.time_base,
            self.segment_duration()?,
            bit_rate_kbps,
        )
    }
}

/// Immutable stream parameters shared by every stage of a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamConfig {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    time_base: TimeBase,
    segment_duration: Duration,
    bit_rate_kbps: u32,
}

impl StreamConfig {
    pub fn new(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        time_base: TimeBase,
        segment_duration: Duration,
        bit_rate_kbps: u32,
    ) -> PipelineResult<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::Config(format!(
                "Invalid resolution {}x{}",
                width, height
            )));
        }
        if time_base.num == 0 || time_base.den == 0 {
            return Err(PipelineError::Config(format!(
                "Invalid time base {}",
                time_base
            )));
        }
        Ok(Self {
            width,
            height,
            pixel_format,
            time_base,
            segment_duration,
            bit_rate_kbps,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Encoder time base: one tick per frame
    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    pub fn segment_duration(&self) -> Duration {
        self.segment_duration
    }

    pub fn bit_rate_kbps(&self) -> u32 {
        self.bit_rate_kbps
    }

    /// Frames per second, the reciprocal of the time base
    pub fn frame_rate(&self) -> f64 {
        self.time_base.rate()
    }

    /// Integral frame rate for elements that only take whole numbers
    pub fn frame_rate_rounded(&self) -> u32 {
        (self.frame_rate().round() as u32).max(1)
    }

    /// Frames per recording segment, `round(frame_rate * segment_duration)`
    ///
    /// Never less than 1: a segment shorter than one frame rotates on every
    /// frame.
    pub fn frames_per_segment(&self) -> u64 {
        let frames = (self.frame_rate() * self.segment_duration.as_secs_f64()).round();
        if frames.is_finite() && frames >= 1.0 {
            frames as u64
        } else {
            1
        }
    }
}
