// SPDX-License-Identifier: GPL-3.0-only

//! Recording segment rotation
//!
//! With `F` frames per segment, segment `k` covers frames `[k*F, (k+1)*F)`.
//! It is opened before frame `k*F` is processed and closed right after frame
//! `(k+1)*F - 1` has been written. With `F == 1` every frame gets a segment of
//! its own.

use super::sink::{Destination, MuxerFactory, OutputSink};
use crate::config::StreamConfig;
use crate::errors::{PipelineError, PipelineResult};
use crate::storage::SegmentNamer;
use tracing::{debug, info, warn};

/// Whether a segment is currently open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Idle,
    Recording,
}

/// Counts frames and opens/closes recording segments on frame boundaries
///
/// The scheduler always counts frames; without a namer it never records.
pub struct SegmentScheduler {
    frames_per_segment: u64,
    frame_count: u64,
    namer: Option<SegmentNamer>,
    current: Option<OutputSink>,
    opened: u64,
    completed: u64,
}

impl SegmentScheduler {
    /// Scheduler that records segments named by `namer`
    pub fn new(config: &StreamConfig, namer: SegmentNamer) -> Self {
        let frames_per_segment = config.frames_per_segment();
        info!(
            frames_per_segment,
            directory = %namer.directory().display(),
            "Segment recording enabled"
        );
        Self {
            frames_per_segment,
            frame_count: 0,
            namer: Some(namer),
            current: None,
            opened: 0,
            completed: 0,
        }
    }

    /// Scheduler that only counts frames
    pub fn counting_only(config: &StreamConfig) -> Self {
        Self {
            frames_per_segment: config.frames_per_segment(),
            frame_count: 0,
            namer: None,
            current: None,
            opened: 0,
            completed: 0,
        }
    }

    pub fn is_recording_enabled(&self) -> bool {
        self.namer.is_some()
    }

    /// Frames successfully captured so far; also the next sequence number
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn frames_per_segment(&self) -> u64 {
        self.frames_per_segment
    }

    pub fn state(&self) -> SegmentState {
        if self.current.is_some() {
            SegmentState::Recording
        } else {
            SegmentState::Idle
        }
    }

    /// Whether the frame about to be processed starts a segment
    pub fn at_segment_start(&self) -> bool {
        self.frame_count % self.frames_per_segment == 0
    }

    /// Whether the frame about to be processed ends a segment
    pub fn at_segment_end(&self) -> bool {
        self.frame_count % self.frames_per_segment == self.frames_per_segment - 1
    }

    /// Open a new segment if the current frame starts one
    ///
    /// Returns `true` when a segment was opened.
    pub fn begin_frame(
        &mut self,
        config: &StreamConfig,
        factory: &mut dyn MuxerFactory,
    ) -> PipelineResult<bool> {
        let Some(namer) = &self.namer else {
            return Ok(false);
        };
        if !self.at_segment_start() {
            return Ok(false);
        }
        if let Some(mut stale) = self.current.take() {
            // Only reachable if a close failed and was ignored
            warn!(destination = %stale.destination(), "Closing segment left open");
            let _ = stale.close();
        }

        let path = namer
            .next_path()
            .map_err(|e| PipelineError::sink_open(namer.directory().display(), e))?;
        let sink = OutputSink::open(config, Destination::File(path), namer.container(), factory)?;

        self.opened += 1;
        info!(
            segment = self.opened,
            frame = self.frame_count,
            destination = %sink.destination(),
            "Segment opened"
        );
        self.current = Some(sink);
        Ok(true)
    }

    /// The open segment, if any
    pub fn current_mut(&mut self) -> Option<&mut OutputSink> {
        self.current.as_mut()
    }

    pub fn current(&self) -> Option<&OutputSink> {
        self.current.as_ref()
    }

    /// Finish the current frame: close the segment if this frame ended it,
    /// then advance the frame count
    ///
    /// Returns `true` when a segment was closed.
    pub fn end_frame(&mut self) -> PipelineResult<bool> {
        let closing = self.at_segment_end();
        self.frame_count += 1;

        if !closing {
            return Ok(false);
        }
        let Some(mut sink) = self.current.take() else {
            return Ok(false);
        };
        sink.close()?;
        self.completed += 1;
        debug!(segment = self.completed, frames = self.frame_count, "Segment closed");
        Ok(true)
    }

    /// Drop the open segment after a failure; it is not counted as completed
    pub fn abandon_current(&mut self) {
        if let Some(mut sink) = self.current.take() {
            warn!(destination = %sink.destination(), "Abandoning segment");
            let _ = sink.close();
        }
    }

    /// Close the open segment, if any (at shutdown)
    pub fn close(&mut self) -> PipelineResult<()> {
        match self.current.take() {
            Some(mut sink) => {
                sink.close()?;
                self.completed += 1;
                info!(frames = self.frame_count, "Final segment closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn segments_opened(&self) -> u64 {
        self.opened
    }

    pub fn segments_completed(&self) -> u64 {
        self.completed
    }
}
