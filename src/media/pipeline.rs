// SPDX-License-Identifier: MPL-2.0

//! Shared GStreamer plumbing
//!
//! Decoders and encoders are small `appsrc ! ... ! appsink` pipelines driven
//! synchronously from the capture loop: push one buffer, then pull with a
//! timeout. Muxers reuse the element and bus helpers.

use super::Receive;
use crate::constants::{pipeline as pipeline_consts, timing};
use crate::errors::{PipelineError, PipelineResult};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSrc};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

/// Initialise GStreamer once per process
pub fn init() -> PipelineResult<()> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| PipelineError::CodecUnavailable(format!("GStreamer init failed: {}", e)))
}

/// Map our log level onto GStreamer's debug threshold
pub fn set_debug_threshold(level: &str) {
    let threshold = match level.to_ascii_lowercase().as_str() {
        "trace" => gst::DebugLevel::Debug,
        "debug" => gst::DebugLevel::Info,
        // GStreamer's info level is far chattier than ours
        "info" | "warn" | "warning" => gst::DebugLevel::Warning,
        _ => gst::DebugLevel::Error,
    };
    gst::log::set_default_threshold(threshold);
}

/// Whether an element factory is installed
pub fn element_available(factory: &str) -> bool {
    gst::ElementFactory::find(factory).is_some()
}

/// Create an element, mapping a missing plugin to `CodecUnavailable`
pub fn make_element(factory: &str, name: &str) -> PipelineResult<gst::Element> {
    gst::ElementFactory::make(factory)
        .name(name)
        .build()
        .map_err(|e| PipelineError::CodecUnavailable(format!("Failed to create {}: {}", factory, e)))
}

/// Build a writable buffer holding a copy of `data`
pub fn buffer_from_slice(
    data: &[u8],
    pts: Option<gst::ClockTime>,
    duration: Option<gst::ClockTime>,
) -> PipelineResult<gst::Buffer> {
    let mut buffer = gst::Buffer::with_size(data.len())
        .map_err(|e| PipelineError::Codec(format!("Failed to create buffer: {}", e)))?;
    {
        let buffer_ref = buffer
            .get_mut()
            .ok_or_else(|| PipelineError::Codec("Failed to get mutable buffer reference".into()))?;
        buffer_ref.set_pts(pts);
        buffer_ref.set_dts(pts);
        buffer_ref.set_duration(duration);
        let mut map = buffer_ref
            .map_writable()
            .map_err(|e| PipelineError::Codec(format!("Failed to map buffer: {}", e)))?;
        map.copy_from_slice(data);
    }
    Ok(buffer)
}

/// Pop the first pending error (or warning) from the bus
///
/// Warnings are logged and skipped; the first error is returned.
pub fn bus_error(pipeline: &gst::Pipeline, wait: gst::ClockTime) -> Option<String> {
    let bus = pipeline.bus()?;
    while let Some(msg) = bus.timed_pop_filtered(
        wait,
        &[gst::MessageType::Error, gst::MessageType::Warning],
    ) {
        match msg.view() {
            gst::MessageView::Error(err) => {
                error!(
                    error = %err.error(),
                    debug = ?err.debug(),
                    source = ?err.src().map(|s| s.name()),
                    "GStreamer error"
                );
                return Some(err.error().to_string());
            }
            gst::MessageView::Warning(w) => {
                warn!(
                    warning = %w.error(),
                    debug = ?w.debug(),
                    source = ?w.src().map(|s| s.name()),
                    "GStreamer warning"
                );
            }
            _ => {}
        }
    }
    None
}

/// Move a pipeline to Playing and wait for it to get there
pub fn start_pipeline(pipeline: &gst::Pipeline) -> Result<(), String> {
    pipeline
        .set_state(gst::State::Playing)
        .map_err(|e| {
            let detail = bus_error(pipeline, gst::ClockTime::ZERO);
            let _ = pipeline.set_state(gst::State::Null);
            format!("Failed to start pipeline: {} ({})", e, detail.unwrap_or_default())
        })?;

    let (result, state, pending) =
        pipeline.state(gst::ClockTime::from_seconds(timing::START_TIMEOUT_SECS));
    match result {
        Ok(_) => {
            debug!(?state, ?pending, "Pipeline started");
            Ok(())
        }
        Err(_) => {
            let detail = bus_error(pipeline, gst::ClockTime::ZERO);
            let _ = pipeline.set_state(gst::State::Null);
            Err(format!(
                "Pipeline failed to reach Playing: {}",
                detail.unwrap_or_else(|| format!("{:?}", state))
            ))
        }
    }
}

/// Create and configure an appsrc
pub fn make_appsrc(name: &str, caps: &gst::Caps) -> PipelineResult<AppSrc> {
    let appsrc = make_element("appsrc", name)?
        .downcast::<AppSrc>()
        .map_err(|_| PipelineError::CodecConfig("Failed to downcast to AppSrc".into()))?;
    appsrc.set_caps(Some(caps));
    appsrc.set_format(gst::Format::Time);
    appsrc.set_is_live(true);
    appsrc.set_property("block", false);
    Ok(appsrc)
}

/// `appsrc ! <elements> ! appsink` driven from a single thread
pub struct AppPipeline {
    label: String,
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    appsink: AppSink,
    eos_sent: bool,
}

impl AppPipeline {
    /// Build and link the pipeline; it is not started yet
    pub fn new(
        label: &str,
        src_caps: &gst::Caps,
        elements: Vec<gst::Element>,
        sink_caps: Option<&gst::Caps>,
    ) -> PipelineResult<Self> {
        init()?;

        let pipeline = gst::Pipeline::with_name(label);
        let appsrc = make_appsrc(&format!("{}-src", label), src_caps)?;

        let appsink = make_element("appsink", &format!("{}-sink", label))?
            .downcast::<AppSink>()
            .map_err(|_| PipelineError::CodecConfig("Failed to downcast to AppSink".into()))?;
        appsink.set_caps(sink_caps);
        appsink.set_property("sync", false);
        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", pipeline_consts::MAX_BUFFERS * 4);

        let mut chain: Vec<&gst::Element> = Vec::with_capacity(elements.len() + 2);
        chain.push(appsrc.upcast_ref());
        chain.extend(elements.iter());
        chain.push(appsink.upcast_ref());

        pipeline
            .add_many(chain.iter().copied())
            .map_err(|e| PipelineError::CodecConfig(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many(chain.iter().copied())
            .map_err(|e| PipelineError::CodecConfig(format!("Failed to link {}: {}", label, e)))?;

        Ok(Self {
            label: label.to_string(),
            pipeline,
            appsrc,
            appsink,
            eos_sent: false,
        })
    }

    pub fn start(&self) -> PipelineResult<()> {
        start_pipeline(&self.pipeline).map_err(PipelineError::CodecConfig)?;
        info!(pipeline = %self.label, "Codec pipeline started");
        Ok(())
    }

    pub fn pipeline(&self) -> &gst::Pipeline {
        &self.pipeline
    }

    pub fn appsink(&self) -> &AppSink {
        &self.appsink
    }

    /// Submit one buffer
    pub fn push(&self, buffer: gst::Buffer) -> PipelineResult<()> {
        if self.eos_sent {
            return Err(PipelineError::Codec(format!("{} already drained", self.label)));
        }
        self.appsrc.push_buffer(buffer).map_err(|e| {
            let detail = bus_error(&self.pipeline, gst::ClockTime::ZERO);
            PipelineError::Codec(format!(
                "{} rejected buffer: {:?} {}",
                self.label,
                e,
                detail.unwrap_or_default()
            ))
        })?;
        Ok(())
    }

    /// Wait up to `timeout` for one output buffer
    pub fn pull(&self, timeout: gst::ClockTime) -> PipelineResult<Receive<gst::Buffer>> {
        match self.appsink.try_pull_sample(timeout) {
            Some(sample) => sample
                .buffer_owned()
                .map(Receive::Ready)
                .ok_or_else(|| PipelineError::Codec(format!("{} sample has no buffer", self.label))),
            None if self.appsink.is_eos() => Ok(Receive::Eof),
            None => match bus_error(&self.pipeline, gst::ClockTime::ZERO) {
                Some(e) => Err(PipelineError::Codec(format!("{}: {}", self.label, e))),
                None => Ok(Receive::Again),
            },
        }
    }

    /// Signal end of input; pending outputs can still be pulled
    pub fn end_of_stream(&mut self) {
        if !self.eos_sent {
            self.eos_sent = true;
            if let Err(e) = self.appsrc.end_of_stream() {
                debug!(pipeline = %self.label, ?e, "EOS not accepted");
            }
        }
    }

    /// Tear the pipeline down
    pub fn shutdown(&mut self) -> PipelineResult<()> {
        self.end_of_stream();
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| PipelineError::Codec(format!("Failed to stop {}: {}", self.label, e)))?;
        debug!(pipeline = %self.label, "Codec pipeline stopped");
        Ok(())
    }
}

impl Drop for AppPipeline {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
