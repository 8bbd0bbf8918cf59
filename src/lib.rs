// SPDX-License-Identifier: MPL-2.0

//! Wamera - webcam to RTMP streamer and segment recorder
//!
//! Frames are captured from a V4L2 device, decoded, encoded to H.264 and
//! written to a live RTMP/FLV stream and to rotating, fixed-length recording
//! segments.
//!
//! # Architecture
//!
//! - [`backends`]: capture device access
//! - [`media`]: decoding, encoding and time bases
//! - [`pipelines`]: transcoding, sinks, segment rotation and the control loop
//! - [`config`]: settings and the frozen per-run stream parameters
//! - [`storage`]: recording directories and segment file names

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod media;
pub mod pipelines;
pub mod storage;

// Re-export commonly used types
pub use config::{Config, SinkFailurePolicy, StreamConfig};
pub use constants::BitratePreset;
pub use errors::{PipelineError, PipelineResult};
pub use media::{ContainerKind, PixelFormat, TimeBase};
pub use pipelines::{PipelineDriver, RunSummary};
