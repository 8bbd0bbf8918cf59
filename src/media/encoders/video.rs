// SPDX-License-Identifier: GPL-3.0-only

//! H.264 encoder selection and the GStreamer encoder pipeline

use super::{EncodedPacket, Encoder};
use crate::config::StreamConfig;
use crate::errors::{PipelineError, PipelineResult};
use crate::media::Receive;
use crate::media::decoders::pipeline::raw_caps;
use crate::media::pipeline::{self as gst_pipeline, AppPipeline};
use crate::media::time_base::TimeBase;
use gstreamer as gst;
use gstreamer::prelude::*;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Candidate H.264 encoders: element, display name, hardware, priority
const H264_ENCODERS: &[(&str, &str, bool, u32)] = &[
    ("vah264enc", "VA-API H.264 (HW)", true, 40),
    ("vaapih264enc", "VA-API H.264 (HW)", true, 41),
    ("nvh264enc", "NVIDIA H.264 (HW)", true, 42),
    ("v4l2h264enc", "V4L2 H.264 (HW)", true, 45),
    ("x264enc", "x264 H.264 (SW)", false, 50),
    ("openh264enc", "OpenH264 H.264 (SW)", false, 51),
];

/// An installed H.264 encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    pub element_name: String,
    pub display_name: String,
    pub is_hardware: bool,
    /// Lower is preferred
    pub priority: u32,
}

/// Enumerate installed H.264 encoders sorted by priority
pub fn enumerate_h264_encoders() -> Vec<EncoderInfo> {
    if gst_pipeline::init().is_err() {
        return Vec::new();
    }

    let mut available: Vec<EncoderInfo> = H264_ENCODERS
        .iter()
        .filter(|(element, ..)| gst_pipeline::element_available(element))
        .map(|(element, display, hw, priority)| EncoderInfo {
            element_name: element.to_string(),
            display_name: display.to_string(),
            is_hardware: *hw,
            priority: *priority,
        })
        .collect();

    available.sort_by_key(|e| e.priority);
    available
}

/// Pick an encoder, honouring an explicit element name when given
pub fn select_h264_encoder(preferred: Option<&str>) -> PipelineResult<EncoderInfo> {
    let available = enumerate_h264_encoders();

    if let Some(name) = preferred {
        return available
            .into_iter()
            .find(|e| e.element_name == name)
            .ok_or_else(|| {
                PipelineError::CodecUnavailable(format!("Encoder {} is not installed", name))
            });
    }

    available
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::CodecUnavailable("No H.264 encoder installed".into()))
}

fn set_uint(element: &gst::Element, name: &str, value: u32) {
    match element.find_property(name) {
        Some(pspec) if pspec.value_type() == u32::static_type() => {
            element.set_property(name, value)
        }
        Some(pspec) if pspec.value_type() == i32::static_type() => {
            element.set_property(name, value.min(i32::MAX as u32) as i32)
        }
        _ => debug!(property = name, "Encoder lacks integer property"),
    }
}

fn set_str(element: &gst::Element, name: &str, value: &str) {
    if element.find_property(name).is_some() {
        element.set_property_from_str(name, value);
    } else {
        debug!(property = name, "Encoder lacks property");
    }
}

fn set_bool(element: &gst::Element, name: &str, value: bool) {
    match element.find_property(name) {
        Some(pspec) if pspec.value_type() == bool::static_type() => {
            element.set_property(name, value)
        }
        _ => debug!(property = name, "Encoder lacks boolean property"),
    }
}

/// Per-element low-latency settings
fn configure_video_encoder(encoder: &gst::Element, encoder_name: &str, bitrate: u32, gop: u32) {
    match encoder_name {
        "x264enc" => {
            set_str(encoder, "speed-preset", "superfast");
            set_str(encoder, "tune", "zerolatency");
            set_uint(encoder, "bitrate", bitrate);
            set_uint(encoder, "key-int-max", gop);
            set_uint(encoder, "bframes", 0);
        }
        "openh264enc" => {
            set_str(encoder, "rate-control", "bitrate");
            set_uint(encoder, "bitrate", bitrate.saturating_mul(1000)); // bits per second
            set_uint(encoder, "gop-size", gop);
            set_str(encoder, "usage-type", "camera");
        }
        "vah264enc" => {
            set_str(encoder, "rate-control", "cbr");
            set_uint(encoder, "bitrate", bitrate);
            set_uint(encoder, "key-int-max", gop);
            set_uint(encoder, "b-frames", 0);
        }
        "vaapih264enc" => {
            set_str(encoder, "rate-control", "cbr");
            set_uint(encoder, "bitrate", bitrate);
            set_uint(encoder, "keyframe-period", gop);
            set_uint(encoder, "max-bframes", 0);
        }
        "nvh264enc" => {
            set_str(encoder, "rc-mode", "cbr");
            set_uint(encoder, "bitrate", bitrate);
            set_uint(encoder, "gop-size", gop);
            set_uint(encoder, "bframes", 0);
            set_bool(encoder, "zerolatency", true);
        }
        "v4l2h264enc" => {
            // Controls go through extra-controls; bitrate in bits per second
            let controls = format!(
                "controls,video_bitrate={},h264_i_frame_period={}",
                bitrate.saturating_mul(1000),
                gop
            );
            match gst::Structure::from_str(&controls) {
                Ok(s) if encoder.find_property("extra-controls").is_some() => {
                    encoder.set_property("extra-controls", s)
                }
                _ => debug!("v4l2h264enc extra-controls not applied"),
            }
        }
        other => warn!(encoder = other, "No tuning known for encoder"),
    }
    debug!(encoder = encoder_name, bitrate, gop, "Configured encoder");
}

/// `appsrc(I420) ! videoconvert ! <h264 encoder> ! h264parse ! appsink`
pub struct GstEncoder {
    pipeline: Option<AppPipeline>,
    info: EncoderInfo,
    time_base: TimeBase,
    timeout: gst::ClockTime,
}

impl GstEncoder {
    pub fn open(
        config: &StreamConfig,
        info: EncoderInfo,
        timeout: Duration,
    ) -> PipelineResult<Self> {
        gst_pipeline::init()?;

        let convert = gst_pipeline::make_element("videoconvert", "encode-convert")?;
        let encoder = gst_pipeline::make_element(&info.element_name, "encode")?;
        let gop = config.frame_rate_rounded();
        configure_video_encoder(&encoder, &info.element_name, config.bit_rate_kbps(), gop);

        let parser = gst_pipeline::make_element("h264parse", "encode-parse")?;
        parser.set_property("config-interval", -1i32);

        let output_caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "byte-stream")
            .field("alignment", "au")
            .build();

        let pipeline = AppPipeline::new(
            "encoder",
            &raw_caps(config),
            vec![convert, encoder, parser],
            Some(&output_caps),
        )
        .map_err(|e| match e {
            PipelineError::CodecUnavailable(msg) => PipelineError::CodecUnavailable(msg),
            other => PipelineError::CodecConfig(format!("{}: {}", info.element_name, other)),
        })?;
        pipeline.start()?;

        info!(
            encoder = %info.display_name,
            bitrate_kbps = config.bit_rate_kbps(),
            gop,
            "Encoder ready"
        );

        Ok(Self {
            pipeline: Some(pipeline),
            info,
            time_base: config.time_base(),
            timeout: gst::ClockTime::from_mseconds(timeout.as_millis() as u64),
        })
    }

    pub fn info(&self) -> &EncoderInfo {
        &self.info
    }

    fn pipeline(&self) -> PipelineResult<&AppPipeline> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| PipelineError::Codec("Encoder is closed".into()))
    }
}

impl Encoder for GstEncoder {
    type Picture = gst::Buffer;

    fn send(&mut self, mut picture: gst::Buffer, pts: i64) -> PipelineResult<()> {
        {
            let buffer = picture.make_mut();
            buffer.set_pts(self.time_base.to_clock_time(pts));
            buffer.set_dts(gst::ClockTime::NONE);
            buffer.set_duration(self.time_base.to_clock_time(1));
        }
        self.pipeline()?.push(picture)
    }

    fn receive(&mut self) -> PipelineResult<Receive<EncodedPacket>> {
        let buffer = match self.pipeline()?.pull(self.timeout)? {
            Receive::Ready(buffer) => buffer,
            Receive::Again => return Ok(Receive::Again),
            Receive::Eof => return Ok(Receive::Eof),
        };

        let map = buffer
            .map_readable()
            .map_err(|e| PipelineError::Codec(format!("Failed to map encoded buffer: {}", e)))?;
        let pts = buffer
            .pts()
            .map(|t| self.time_base.from_clock_time(t));

        Ok(Receive::Ready(EncodedPacket {
            data: map.as_slice().to_vec(),
            pts,
            keyframe: !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT),
        }))
    }

    fn flush(&mut self) -> PipelineResult<()> {
        self.pipeline
            .as_mut()
            .ok_or_else(|| PipelineError::Codec("Encoder is closed".into()))?
            .end_of_stream();
        Ok(())
    }

    fn request_keyframe(&mut self) -> PipelineResult<()> {
        let event = gstreamer_video::UpstreamForceKeyUnitEvent::builder()
            .all_headers(true)
            .build();
        if !self.pipeline()?.appsink().send_event(event) {
            debug!(encoder = %self.info.element_name, "Key frame request not handled");
        }
        Ok(())
    }

    fn close(&mut self) -> PipelineResult<()> {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.shutdown()?;
            debug!(encoder = %self.info.element_name, "Encoder closed");
        }
        Ok(())
    }
}
