// SPDX-License-Identifier: MPL-2.0

//! Capture-to-output pipelines
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────────┐
//! │ Capture ring │ ──▶ │    Transcoder     │ ──▶ │ Live sink (FLV)  │
//! │  (V4L2 mmap) │     │  - MJPEG/YUYV dec │  ┌▶ │                  │
//! │              │     │  - H.264 encode   │ ─┤  └──────────────────┘
//! └──────────────┘     └───────────────────┘  │  ┌──────────────────┐
//!                                             └▶ │ Segment (MP4)    │
//!                                                │  rotated by frame│
//!                                                └──────────────────┘
//! ```
//!
//! Everything runs on the caller's thread, one frame at a time. The
//! [`driver`] owns every stage and the frame counter that paces segment
//! rotation.
//!
//! # Modules
//!
//! - [`driver`]: the control loop and shutdown ordering
//! - [`segment`]: frame-count based segment rotation
//! - [`sink`]: output containers with per-sink time bases
//! - [`transcode`]: decoder + encoder pair

pub mod driver;
pub mod segment;
pub mod sink;
pub mod transcode;

pub use driver::{PipelineDriver, RunSummary, StepOutcome};
pub use segment::{SegmentScheduler, SegmentState};
pub use sink::{Destination, GstMuxerFactory, Muxer, MuxerFactory, OutputSink};
pub use transcode::{EncodedUnit, GstTranscoder, TranscodePipeline, TranscodeStats};
