// SPDX-License-Identifier: MPL-2.0

//! Frame capture from a streaming video device
//!
//! The capture side is split in two:
//!
//! - [`CaptureDevice`]: the hardware collaborator. It owns the driver-shared
//!   slots and knows how to queue, dequeue and map them. [`V4l2Device`] is the
//!   production implementation.
//! - [`CaptureBufferRing`]: owns the slot ownership ledger. Every dequeued slot
//!   is copied into a pooled [`FrameBuffer`] and handed straight back to the
//!   device, so the pipeline never holds driver memory.

pub mod frame;
pub mod ring;
pub mod v4l2;
pub mod v4l2_utils;

pub use frame::{FrameBuffer, FramePool};
pub use ring::{CaptureBufferRing, SlotOwner};
pub use v4l2::V4l2Device;

use crate::errors::PipelineResult;
use crate::media::formats::PixelFormat;
use crate::media::time_base::TimeBase;

/// Format requested from, or negotiated by, a capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Frame interval (1/30 for 30 fps)
    pub time_base: TimeBase,
}

/// A slot handed back by the device after it was filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedSlot {
    pub index: u32,
    /// Bytes of valid payload at the start of the slot
    pub bytes_used: usize,
    /// The driver flagged the buffer as corrupt
    pub error: bool,
    /// Driver frame sequence number
    pub sequence: u32,
}

/// Hardware side of the capture ring
///
/// Slot indices run from `0` to `count - 1` as returned by
/// [`request_slots`](CaptureDevice::request_slots).
pub trait CaptureDevice {
    /// Human readable device name for logs
    fn name(&self) -> String;

    /// Negotiate and map `count` slots, returning each slot's mapped length
    fn request_slots(&mut self, count: u32) -> PipelineResult<Vec<usize>>;

    /// Give a slot to the device for filling
    fn enqueue(&mut self, index: u32) -> PipelineResult<()>;

    /// Wait for a filled slot
    ///
    /// Returns [`PipelineError::Capture`](crate::errors::PipelineError::Capture)
    /// when no frame arrived in time or the driver dropped one.
    fn dequeue(&mut self) -> PipelineResult<DequeuedSlot>;

    /// Mapped memory of a slot
    fn slot_data(&self, index: u32) -> Option<&[u8]>;

    fn stream_on(&mut self) -> PipelineResult<()>;

    fn stream_off(&mut self) -> PipelineResult<()>;

    /// Unmap every slot and return the buffers to the driver
    fn release_slots(&mut self) -> PipelineResult<()>;
}
