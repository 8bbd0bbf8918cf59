// SPDX-License-Identifier: MPL-2.0

//! GStreamer decoder: camera payload to I420

use super::Decoder;
use crate::config::StreamConfig;
use crate::constants::pipeline as pipeline_consts;
use crate::errors::{PipelineError, PipelineResult};
use crate::media::Receive;
use crate::media::formats::PixelFormat;
use crate::media::pipeline::{self as gst_pipeline, AppPipeline};
use crate::media::time_base::TimeBase;
use gstreamer as gst;
use std::time::Duration;
use tracing::{debug, info};

/// MJPEG decoders in order of preference
pub const MJPEG_DECODERS: &[&str] = &["jpegdec", "avdec_mjpeg"];

/// First installed MJPEG decoder
pub fn find_mjpeg_decoder() -> Option<&'static str> {
    MJPEG_DECODERS
        .iter()
        .copied()
        .find(|name| gst_pipeline::element_available(name))
}

fn source_caps(config: &StreamConfig) -> gst::Caps {
    let tb = config.time_base();
    let framerate = gst::Fraction::new(tb.den as i32, tb.num as i32);
    match config.pixel_format() {
        PixelFormat::Mjpeg => gst::Caps::builder("image/jpeg")
            .field("width", config.width() as i32)
            .field("height", config.height() as i32)
            .field("framerate", framerate)
            .build(),
        PixelFormat::Yuyv => gst::Caps::builder("video/x-raw")
            .field("format", "YUY2")
            .field("width", config.width() as i32)
            .field("height", config.height() as i32)
            .field("framerate", framerate)
            .build(),
    }
}

/// Caps of the decoder output and the encoder input
pub fn raw_caps(config: &StreamConfig) -> gst::Caps {
    let tb = config.time_base();
    gst::Caps::builder("video/x-raw")
        .field("format", pipeline_consts::RAW_FORMAT)
        .field("width", config.width() as i32)
        .field("height", config.height() as i32)
        .field("framerate", gst::Fraction::new(tb.den as i32, tb.num as i32))
        .build()
}

/// `appsrc ! jpegdec ! videoconvert ! I420 ! appsink`
pub struct GstDecoder {
    pipeline: Option<AppPipeline>,
    time_base: TimeBase,
    expected_size: Option<usize>,
    timeout: gst::ClockTime,
}

impl GstDecoder {
    pub fn open(config: &StreamConfig, timeout: Duration) -> PipelineResult<Self> {
        gst_pipeline::init()?;

        let mut elements = Vec::new();
        if config.pixel_format() == PixelFormat::Mjpeg {
            let factory = find_mjpeg_decoder().ok_or_else(|| {
                PipelineError::CodecUnavailable("No MJPEG decoder installed".into())
            })?;
            elements.push(gst_pipeline::make_element(factory, "decode")?);
        }
        elements.push(gst_pipeline::make_element("videoconvert", "decode-convert")?);

        let pipeline = AppPipeline::new(
            "decoder",
            &source_caps(config),
            elements,
            Some(&raw_caps(config)),
        )?;
        pipeline.start()?;

        info!(
            format = %config.pixel_format(),
            width = config.width(),
            height = config.height(),
            "Decoder ready"
        );

        Ok(Self {
            pipeline: Some(pipeline),
            time_base: config.time_base(),
            expected_size: config
                .pixel_format()
                .frame_size(config.width(), config.height()),
            timeout: gst::ClockTime::from_mseconds(timeout.as_millis() as u64),
        })
    }

    fn pipeline(&self) -> PipelineResult<&AppPipeline> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| PipelineError::Codec("Decoder is closed".into()))
    }
}

impl Decoder for GstDecoder {
    type Picture = gst::Buffer;

    fn send(&mut self, frame: &[u8], pts: i64) -> PipelineResult<()> {
        if let Some(expected) = self.expected_size
            && frame.len() < expected
        {
            return Err(PipelineError::Codec(format!(
                "Raw frame is {} bytes, expected {}",
                frame.len(),
                expected
            )));
        }
        let len = self.expected_size.unwrap_or(frame.len());
        let buffer = gst_pipeline::buffer_from_slice(
            &frame[..len],
            Some(self.time_base.to_clock_time(pts)),
            Some(self.time_base.to_clock_time(1)),
        )?;
        self.pipeline()?.push(buffer)
    }

    fn receive(&mut self) -> PipelineResult<Receive<gst::Buffer>> {
        let timeout = self.timeout;
        self.pipeline()?.pull(timeout)
    }

    fn flush(&mut self) -> PipelineResult<()> {
        self.pipeline
            .as_mut()
            .ok_or_else(|| PipelineError::Codec("Decoder is closed".into()))?
            .end_of_stream();
        Ok(())
    }

    fn close(&mut self) -> PipelineResult<()> {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.shutdown()?;
            debug!("Decoder closed");
        }
        Ok(())
    }
}
