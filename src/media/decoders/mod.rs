// SPDX-License-Identifier: MPL-2.0

//! Camera payload decoders
//!
//! A decoder turns one captured frame (an MJPEG image or a packed YUYV frame)
//! into a raw picture the encoder accepts.

pub mod pipeline;

pub use pipeline::GstDecoder;

use super::Receive;
use crate::errors::PipelineResult;

/// Send/receive decoder
pub trait Decoder {
    /// Decoded picture handed to the encoder
    type Picture;

    /// Submit one captured frame with its timestamp in the stream time base
    fn send(&mut self, frame: &[u8], pts: i64) -> PipelineResult<()>;

    /// Retrieve a decoded picture if one is ready
    fn receive(&mut self) -> PipelineResult<Receive<Self::Picture>>;

    /// Signal end of input; held pictures can still be received until
    /// [`Receive::Eof`]
    fn flush(&mut self) -> PipelineResult<()>;

    /// Release the decoder; later calls fail
    fn close(&mut self) -> PipelineResult<()>;
}
