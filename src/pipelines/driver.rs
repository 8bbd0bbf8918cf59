// SPDX-License-Identifier: GPL-3.0-only

//! The capture → transcode → fan-out control loop

use super::segment::SegmentScheduler;
use super::sink::{Destination, MuxerFactory, OutputSink};
use super::transcode::{EncodedUnit, TranscodePipeline};
use crate::backends::capture::{CaptureBufferRing, CaptureDevice};
use crate::config::{SinkFailurePolicy, StreamConfig};
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::errors::{PipelineError, PipelineResult};
use crate::media::decoders::Decoder;
use crate::media::encoders::Encoder;
use crate::media::formats::ContainerKind;
use crate::storage::SegmentNamer;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// What one iteration of the loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A unit was encoded and written to `sinks` sinks
    Written { sinks: usize },
    /// The frame was consumed but the codecs produced nothing yet
    Pending,
    /// Capture dropped the frame; nothing advanced
    Dropped,
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub units_encoded: u64,
    pub live_units_written: u64,
    pub segments_opened: u64,
    pub segments_completed: u64,
}

/// Owns every stage and moves frames through them
pub struct PipelineDriver<C, D, E>
where
    C: CaptureDevice,
    D: Decoder,
    E: Encoder<Picture = D::Picture>,
{
    config: StreamConfig,
    ring: CaptureBufferRing<C>,
    transcoder: TranscodePipeline<D, E>,
    factory: Box<dyn MuxerFactory>,
    live: Option<OutputSink>,
    scheduler: SegmentScheduler,
    policy: SinkFailurePolicy,
    summary: RunSummary,
    closed: bool,
}

impl<C, D, E> PipelineDriver<C, D, E>
where
    C: CaptureDevice,
    D: Decoder,
    E: Encoder<Picture = D::Picture>,
{
    pub fn new(
        config: StreamConfig,
        ring: CaptureBufferRing<C>,
        transcoder: TranscodePipeline<D, E>,
        factory: Box<dyn MuxerFactory>,
        policy: SinkFailurePolicy,
    ) -> Self {
        Self {
            scheduler: SegmentScheduler::counting_only(&config),
            config,
            ring,
            transcoder,
            factory,
            live: None,
            policy,
            summary: RunSummary::default(),
            closed: false,
        }
    }

    /// Open the live sink
    pub fn open_live(&mut self, destination: Destination, kind: ContainerKind) -> PipelineResult<()> {
        let sink = OutputSink::open(&self.config, destination, kind, self.factory.as_mut())?;
        self.live = Some(sink);
        Ok(())
    }

    /// Record rotating segments named by `namer`
    pub fn enable_recording(&mut self, namer: SegmentNamer) {
        self.scheduler = SegmentScheduler::new(&self.config, namer);
    }

    /// Start capture streaming
    pub fn start(&mut self) -> PipelineResult<()> {
        if self.live.is_none() && !self.scheduler.is_recording_enabled() {
            return Err(PipelineError::Config("No output sink configured".into()));
        }
        self.ring.start()
    }

    fn has_outputs(&self) -> bool {
        self.live.is_some() || self.scheduler.is_recording_enabled()
    }

    /// Apply the sink failure policy to `e`
    ///
    /// Returns the error back when the pipeline has to stop.
    fn isolate(&mut self, e: PipelineError, what: &str) -> PipelineResult<()> {
        match self.policy {
            SinkFailurePolicy::Abort => Err(e),
            SinkFailurePolicy::Isolate => {
                error!(error = %e, sink = what, "Sink failed, continuing without it");
                if self.has_outputs() { Ok(()) } else { Err(e) }
            }
        }
    }

    /// Move one frame through the pipeline
    pub fn step(&mut self) -> PipelineResult<StepOutcome> {
        let frame = match self.ring.dequeue() {
            Ok(frame) => frame,
            Err(e) if e.is_recoverable() => {
                self.summary.frames_dropped += 1;
                warn!(error = %e, frame = self.scheduler.frame_count(), "Frame dropped");
                return Ok(StepOutcome::Dropped);
            }
            Err(e) => return Err(e),
        };
        self.summary.frames_captured += 1;
        let sequence = self.scheduler.frame_count();

        match self.scheduler.begin_frame(&self.config, self.factory.as_mut()) {
            Ok(true) => {
                self.summary.segments_opened += 1;
                self.transcoder.request_keyframe()?;
            }
            Ok(false) => {}
            Err(e) => self.isolate(e, "segment")?,
        }

        let Some(unit) = self.transcoder.process(frame, sequence)? else {
            self.finish_frame()?;
            return Ok(StepOutcome::Pending);
        };
        self.summary.units_encoded += 1;
        let sinks = self.fan_out(&unit)?;

        self.finish_frame()?;
        Ok(StepOutcome::Written { sinks })
    }

    /// Write `unit` to every open sink under the failure policy
    ///
    /// Returns how many sinks took it.
    fn fan_out(&mut self, unit: &EncodedUnit) -> PipelineResult<usize> {
        let mut sinks = 0;
        if let Some(live) = self.live.as_mut() {
            match live.write(unit) {
                Ok(()) => {
                    sinks += 1;
                    self.summary.live_units_written += 1;
                }
                Err(e) => {
                    if let Some(mut live) = self.live.take() {
                        let _ = live.close();
                    }
                    self.isolate(e, "live")?;
                }
            }
        }
        if let Some(segment) = self.scheduler.current_mut() {
            match segment.write(unit) {
                Ok(()) => sinks += 1,
                Err(e) => {
                    self.scheduler.abandon_current();
                    self.isolate(e, "segment")?;
                }
            }
        }
        Ok(sinks)
    }

    /// Write the units still held by the codecs to the open sinks
    fn drain(&mut self) -> PipelineResult<()> {
        let units = self.transcoder.flush()?;
        if !units.is_empty() {
            debug!(units = units.len(), "Writing drained units");
        }
        for unit in &units {
            self.summary.units_encoded += 1;
            self.fan_out(unit)?;
        }
        Ok(())
    }

    fn finish_frame(&mut self) -> PipelineResult<()> {
        match self.scheduler.end_frame() {
            Ok(true) => {
                self.summary.segments_completed += 1;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => self.isolate(e, "segment"),
        }
    }

    /// Run until `shutdown` is set, `max_frames` frames were processed, or a
    /// fatal error occurs
    ///
    /// Every stage is closed on the way out, whatever the outcome.
    pub fn run(
        &mut self,
        shutdown: &AtomicBool,
        max_frames: Option<u64>,
    ) -> PipelineResult<RunSummary> {
        info!(
            frames_per_segment = self.scheduler.frames_per_segment(),
            live = self.live.is_some(),
            recording = self.scheduler.is_recording_enabled(),
            "Pipeline running"
        );

        let result = loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Shutdown requested");
                break Ok(());
            }
            if let Some(max) = max_frames
                && self.scheduler.frame_count() >= max
            {
                info!(frames = max, "Frame limit reached");
                break Ok(());
            }

            match self.step() {
                Ok(StepOutcome::Dropped) => {}
                Ok(_) => {
                    let count = self.scheduler.frame_count();
                    if count % FRAME_LOG_INTERVAL == 0 {
                        debug!(
                            frames = count,
                            dropped = self.summary.frames_dropped,
                            units = self.summary.units_encoded,
                            "Pipeline progress"
                        );
                    }
                }
                Err(e) => {
                    error!(error = %e, frame = self.scheduler.frame_count(), "Pipeline failed");
                    break Err(e);
                }
            }
        };

        let closed = self.close();
        result?;
        closed?;

        let summary = self.summary();
        info!(
            captured = summary.frames_captured,
            dropped = summary.frames_dropped,
            encoded = summary.units_encoded,
            segments = summary.segments_completed,
            "Pipeline finished"
        );
        Ok(summary)
    }

    /// Stop capture, drain the codecs into the open sinks, then close every
    /// stage, best effort
    ///
    /// Returns the first error met; later stages are still closed.
    pub fn close(&mut self) -> PipelineResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first: Option<PipelineError> = None;
        let mut note = |r: PipelineResult<()>, what: &str| {
            if let Err(e) = r {
                warn!(error = %e, stage = what, "Close failed");
                first.get_or_insert(e);
            }
        };

        note(self.ring.stop(), "capture");
        note(self.drain(), "drain");
        note(self.transcoder.close(), "transcoder");
        if let Some(mut live) = self.live.take() {
            note(live.close(), "live");
        }
        note(self.scheduler.close(), "segment");
        note(self.ring.close(), "capture");
        self.summary.segments_completed = self.scheduler.segments_completed();

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    pub fn frame_count(&self) -> u64 {
        self.scheduler.frame_count()
    }

    pub fn ring(&self) -> &CaptureBufferRing<C> {
        &self.ring
    }

    pub fn transcoder(&self) -> &TranscodePipeline<D, E> {
        &self.transcoder
    }

    pub fn scheduler(&self) -> &SegmentScheduler {
        &self.scheduler
    }

    pub fn live(&self) -> Option<&OutputSink> {
        self.live.as_ref()
    }
}

impl<C, D, E> Drop for PipelineDriver<C, D, E>
where
    C: CaptureDevice,
    D: Decoder,
    E: Encoder<Picture = D::Picture>,
{
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close pipeline on drop");
        }
    }
}
