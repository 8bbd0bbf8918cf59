// SPDX-License-Identifier: MPL-2.0

//! Media processing: decoding, encoding and format metadata
//!
//! Codecs follow a send/receive model. A caller submits one input and then
//! asks for output; "nothing yet" and "finished" are ordinary values of
//! [`Receive`], never errors.
//!
//! # Modules
//!
//! - [`decoders`]: camera payload (MJPEG, YUYV) to raw pictures
//! - [`encoders`]: raw pictures to H.264 access units
//! - [`formats`]: pixel formats and container kinds
//! - [`pipeline`]: shared GStreamer appsrc/appsink plumbing
//! - [`time_base`]: rational time bases and rescaling

pub mod decoders;
pub mod encoders;
pub mod formats;
pub mod pipeline;
pub mod time_base;

pub use formats::{ContainerKind, PixelFormat};
pub use time_base::TimeBase;

/// Outcome of asking a codec for output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receive<T> {
    /// One output is ready
    Ready(T),
    /// The codec needs more input before it can produce output
    Again,
    /// The codec has been drained and will produce nothing more
    Eof,
}
