// SPDX-License-Identifier: MPL-2.0

//! GStreamer muxing
//!
//! `appsrc(h264) ! h264parse ! <mux> ! <sink>` where the sink is an RTMP
//! element for URLs and `filesink` for paths.

use super::{Destination, Muxer, MuxerFactory};
use crate::config::StreamConfig;
use crate::constants::timing;
use crate::errors::{PipelineError, PipelineResult};
use crate::media::formats::ContainerKind;
use crate::media::pipeline::{self as gst_pipeline, bus_error};
use crate::media::time_base::TimeBase;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use tracing::{debug, info, warn};

/// RTMP sinks in order of preference
const RTMP_SINKS: &[&str] = &["rtmp2sink", "rtmpsink"];

/// Creates [`GstMuxer`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct GstMuxerFactory;

impl MuxerFactory for GstMuxerFactory {
    fn create(
        &mut self,
        config: &StreamConfig,
        destination: &Destination,
        kind: ContainerKind,
    ) -> PipelineResult<Box<dyn Muxer>> {
        Ok(Box::new(GstMuxer::new(config, destination, kind)?))
    }
}

fn create_sink(destination: &Destination) -> PipelineResult<gst::Element> {
    match destination {
        Destination::Url(url) => {
            let factory = RTMP_SINKS
                .iter()
                .copied()
                .find(|name| gst_pipeline::element_available(name))
                .ok_or_else(|| PipelineError::sink_open(url, "No RTMP sink element installed"))?;
            let sink = gst_pipeline::make_element(factory, "mux-sink")?;
            sink.set_property("location", url.as_str());
            Ok(sink)
        }
        Destination::File(path) => {
            let sink = gst_pipeline::make_element("filesink", "mux-sink")?;
            sink.set_property("location", path.to_string_lossy().as_ref());
            Ok(sink)
        }
    }
}

/// Muxer pipeline fed one access unit at a time
pub struct GstMuxer {
    label: String,
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    time_base: TimeBase,
    frame_duration: gst::ClockTime,
    finished: bool,
}

impl GstMuxer {
    pub fn new(
        config: &StreamConfig,
        destination: &Destination,
        kind: ContainerKind,
    ) -> PipelineResult<Self> {
        gst_pipeline::init()?;
        let label = destination.to_string();
        info!(destination = %label, container = %kind, "Creating muxer");

        let tb = config.time_base();
        let caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "byte-stream")
            .field("alignment", "au")
            .field("width", config.width() as i32)
            .field("height", config.height() as i32)
            .field("framerate", gst::Fraction::new(tb.den as i32, tb.num as i32))
            .build();

        let appsrc = gst_pipeline::make_appsrc("mux-src", &caps)?;
        let parser = gst_pipeline::make_element("h264parse", "mux-parse")?;
        let muxer = gst_pipeline::make_element(kind.muxer_name(), "mux")?;
        if kind.is_streamable() && muxer.find_property("streamable").is_some() {
            muxer.set_property("streamable", true);
        }
        let sink = create_sink(destination)?;
        if sink.find_property("sync").is_some() {
            sink.set_property("sync", false);
        }

        let pipeline = gst::Pipeline::with_name("muxer");
        pipeline
            .add_many([appsrc.upcast_ref(), &parser, &muxer, &sink])
            .map_err(|e| PipelineError::sink_open(&label, format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many([appsrc.upcast_ref(), &parser, &muxer, &sink])
            .map_err(|e| PipelineError::sink_open(&label, format!("Failed to link: {}", e)))?;

        // FLV carries millisecond timestamps; files keep the stream clock
        let time_base = match kind {
            ContainerKind::Flv => TimeBase::MILLIS,
            ContainerKind::Mp4 | ContainerKind::Matroska => tb,
        };

        Ok(Self {
            label,
            pipeline,
            appsrc,
            time_base,
            frame_duration: tb.to_clock_time(1),
            finished: false,
        })
    }

    /// Wait for EOS to reach the sink, or for an error
    fn wait_for_eos(&self) -> Result<(), String> {
        let Some(bus) = self.pipeline.bus() else {
            return Err("No bus available".into());
        };
        let timeout = gst::ClockTime::from_seconds(timing::STOP_TIMEOUT_SECS);
        match bus.timed_pop_filtered(timeout, &[gst::MessageType::Eos, gst::MessageType::Error]) {
            Some(msg) => match msg.view() {
                gst::MessageView::Eos(..) => Ok(()),
                gst::MessageView::Error(err) => Err(err.error().to_string()),
                _ => Ok(()),
            },
            None => Err(format!(
                "Timed out after {}s waiting for the trailer",
                timing::STOP_TIMEOUT_SECS
            )),
        }
    }
}

impl Muxer for GstMuxer {
    fn write_header(&mut self) -> PipelineResult<TimeBase> {
        gst_pipeline::start_pipeline(&self.pipeline)
            .map_err(|e| PipelineError::sink_open(&self.label, e))?;
        if let Some(e) = bus_error(&self.pipeline, gst::ClockTime::ZERO) {
            return Err(PipelineError::sink_open(&self.label, e));
        }
        Ok(self.time_base)
    }

    fn write_packet(&mut self, data: &[u8], pts: i64, dts: i64, keyframe: bool) -> PipelineResult<()> {
        let to_clock = |ts: i64| self.time_base.to_clock_time(ts);

        let mut buffer = gst_pipeline::buffer_from_slice(data, Some(to_clock(pts)), Some(self.frame_duration))
            .map_err(|e| PipelineError::sink_write(&self.label, e))?;
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| PipelineError::sink_write(&self.label, "Buffer not writable"))?;
            buffer_ref.set_dts(to_clock(dts));
            if !keyframe {
                buffer_ref.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }

        self.appsrc.push_buffer(buffer).map_err(|e| {
            let detail = bus_error(&self.pipeline, gst::ClockTime::ZERO);
            PipelineError::sink_write(
                &self.label,
                detail.unwrap_or_else(|| format!("push failed: {:?}", e)),
            )
        })?;
        Ok(())
    }

    fn write_trailer(&mut self) -> PipelineResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        debug!(destination = %self.label, "Sending EOS to muxer");
        let eos = self
            .appsrc
            .end_of_stream()
            .map_err(|e| format!("EOS rejected: {:?}", e))
            .and_then(|_| self.wait_for_eos());

        let stopped = self.pipeline.set_state(gst::State::Null);

        eos.map_err(|e| PipelineError::sink_write(&self.label, e))?;
        stopped.map_err(|e| PipelineError::sink_write(&self.label, e))?;
        Ok(())
    }
}

impl Drop for GstMuxer {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(destination = %self.label, ?e, "Failed to stop muxer on drop");
        }
    }
}
