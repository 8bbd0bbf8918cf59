// SPDX-License-Identifier: MPL-2.0

//! Output sinks
//!
//! An [`OutputSink`] is one container target (the live stream or a single
//! recording segment) with its own time base. The container work itself is
//! delegated to a [`Muxer`] created by a [`MuxerFactory`], so the fan-out
//! logic does not depend on GStreamer.

pub mod muxer;

pub use muxer::GstMuxerFactory;

use crate::config::StreamConfig;
use crate::errors::{PipelineError, PipelineResult};
use crate::media::formats::ContainerKind;
use crate::media::time_base::TimeBase;
use crate::pipelines::transcode::EncodedUnit;
use std::fmt;
use std::path::PathBuf;
use tracing::{Span, debug, info, info_span, warn};

/// Where a sink writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Network URL such as `rtmp://host/app/key`
    Url(String),
    File(PathBuf),
}

impl Destination {
    /// Anything with a scheme is a URL, everything else a file path
    pub fn parse(s: &str) -> Self {
        if s.contains("://") {
            Destination::Url(s.to_string())
        } else {
            Destination::File(PathBuf::from(s))
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Url(url) => f.write_str(url),
            Destination::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Container writer behind an [`OutputSink`]
///
/// Dropping a muxer without calling [`write_trailer`](Muxer::write_trailer)
/// must release everything it acquired.
pub trait Muxer {
    /// Write the container header
    ///
    /// Returns the time base in which packets must be stamped.
    fn write_header(&mut self) -> PipelineResult<TimeBase>;

    /// Write one packet, timestamps in the header's time base
    fn write_packet(&mut self, data: &[u8], pts: i64, dts: i64, keyframe: bool) -> PipelineResult<()>;

    /// Finish the container and close its I/O
    fn write_trailer(&mut self) -> PipelineResult<()>;
}

/// Allocates muxers for new sinks
pub trait MuxerFactory {
    fn create(
        &mut self,
        config: &StreamConfig,
        destination: &Destination,
        kind: ContainerKind,
    ) -> PipelineResult<Box<dyn Muxer>>;
}

fn open_error(destination: &Destination, e: PipelineError) -> PipelineError {
    match e {
        PipelineError::SinkOpen { .. } => e,
        other => PipelineError::sink_open(destination, other),
    }
}

fn write_error(destination: &Destination, e: PipelineError) -> PipelineError {
    match e {
        PipelineError::SinkWrite { .. } => e,
        other => PipelineError::sink_write(destination, other),
    }
}

/// One open container with its own time base
pub struct OutputSink {
    destination: Destination,
    kind: ContainerKind,
    muxer: Option<Box<dyn Muxer>>,
    time_base: TimeBase,
    /// First timestamp written, in the sink time base
    origin: Option<i64>,
    last_dts: Option<i64>,
    units_written: u64,
    span: Span,
}

impl OutputSink {
    /// Allocate the container, declare the video stream and write the header
    ///
    /// On failure nothing stays allocated.
    pub fn open(
        config: &StreamConfig,
        destination: Destination,
        kind: ContainerKind,
        factory: &mut dyn MuxerFactory,
    ) -> PipelineResult<Self> {
        let span = info_span!("sink", destination = %destination, container = %kind);
        let _enter = span.enter();

        let mut muxer = factory
            .create(config, &destination, kind)
            .map_err(|e| open_error(&destination, e))?;
        // A muxer dropped here releases whatever it had acquired
        let time_base = muxer
            .write_header()
            .map_err(|e| open_error(&destination, e))?;

        info!(time_base = %time_base, "Sink opened");
        drop(_enter);

        Ok(Self {
            destination,
            kind,
            muxer: Some(muxer),
            time_base,
            origin: None,
            last_dts: None,
            units_written: 0,
            span,
        })
    }

    /// Rescale `unit` into this sink's time base and mux it
    ///
    /// Timestamps are rebased so the first unit written starts at zero.
    pub fn write(&mut self, unit: &EncodedUnit) -> PipelineResult<()> {
        let _enter = self.span.enter();
        let Some(muxer) = self.muxer.as_mut() else {
            return Err(PipelineError::sink_write(&self.destination, "sink is closed"));
        };

        let pts = unit.time_base.rescale(unit.pts, self.time_base);
        let dts = unit.time_base.rescale(unit.dts, self.time_base);
        let origin = *self.origin.get_or_insert(dts.min(pts));

        let mut dts = dts - origin;
        if let Some(last) = self.last_dts
            && dts < last
        {
            warn!(dts, last, "Non-monotonic timestamp clamped");
            dts = last;
        }
        let pts = (pts - origin).max(dts);

        muxer
            .write_packet(&unit.data, pts, dts, unit.keyframe)
            .map_err(|e| write_error(&self.destination, e))?;

        self.last_dts = Some(dts);
        self.units_written += 1;
        Ok(())
    }

    /// Write the trailer and close I/O; a closed sink ignores this
    pub fn close(&mut self) -> PipelineResult<()> {
        let Some(mut muxer) = self.muxer.take() else {
            return Ok(());
        };
        let _enter = self.span.enter();
        muxer
            .write_trailer()
            .map_err(|e| write_error(&self.destination, e))?;
        info!(units = self.units_written, "Sink closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.muxer.is_some()
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn container(&self) -> ContainerKind {
        self.kind
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    pub fn units_written(&self) -> u64 {
        self.units_written
    }

    /// Last decode timestamp written, relative to the first unit
    pub fn last_dts(&self) -> Option<i64> {
        self.last_dts
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        if self.muxer.is_some() {
            debug!(destination = %self.destination, "Closing sink on drop");
            if let Err(e) = self.close() {
                warn!(error = %e, "Failed to close sink on drop");
            }
        }
    }
}
