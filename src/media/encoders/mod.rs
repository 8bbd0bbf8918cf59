// SPDX-License-Identifier: MPL-2.0

//! H.264 encoding
//!
//! Hardware encoders are preferred (VA-API, NVENC, V4L2 M2M) with x264 and
//! OpenH264 as software fallbacks. Whatever element is picked is configured
//! for low latency: no B-frames, one key frame per second, constant bitrate
//! where the element supports it.

pub mod video;

pub use video::{EncoderInfo, GstEncoder, enumerate_h264_encoders, select_h264_encoder};

use super::Receive;
use crate::errors::PipelineResult;

/// One encoded H.264 access unit (Annex B byte stream)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    /// Presentation time in the stream time base, when the encoder reports one
    pub pts: Option<i64>,
    pub keyframe: bool,
}

/// Send/receive encoder
pub trait Encoder {
    /// Raw picture accepted by the encoder
    type Picture;

    /// Submit one picture with its timestamp in the stream time base
    fn send(&mut self, picture: Self::Picture, pts: i64) -> PipelineResult<()>;

    /// Retrieve an encoded packet if one is ready
    fn receive(&mut self) -> PipelineResult<Receive<EncodedPacket>>;

    /// Signal end of input; held packets can still be received until
    /// [`Receive::Eof`]
    fn flush(&mut self) -> PipelineResult<()>;

    /// Ask for the next output to be a key frame
    fn request_keyframe(&mut self) -> PipelineResult<()> {
        Ok(())
    }

    /// Release the encoder; later calls fail
    fn close(&mut self) -> PipelineResult<()>;
}
