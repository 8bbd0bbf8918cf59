// SPDX-License-Identifier: MPL-2.0

//! Capture buffer ring with an explicit slot ownership ledger
//!
//! Each slot is owned either by the device (queued, waiting to be filled), by
//! the pipeline (dequeued, being copied out) or by nobody (mapped but not yet
//! queued, or returned by stream-off). The ledger rejects any transition that
//! would queue a slot twice or touch a slot the device still owns.

use super::{CaptureDevice, FrameBuffer, FramePool};
use crate::errors::{PipelineError, PipelineResult};
use tracing::{Span, debug, info, info_span, warn};

/// Who currently owns a capture slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOwner {
    /// Queued to the device
    Device,
    /// Dequeued, payload being copied out
    Pipeline,
    /// Mapped but not queued
    Unqueued,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    length: usize,
    owner: SlotOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RingState {
    Ready,
    Streaming,
    Stopped,
    Closed,
}

/// Fixed set of device-shared slots
///
/// `dequeue` copies the filled slot into a pooled [`FrameBuffer`] and gives
/// the slot back to the device before returning, so at most one slot is ever
/// outside the device and only for the duration of the copy.
pub struct CaptureBufferRing<D: CaptureDevice> {
    device: D,
    slots: Vec<Slot>,
    pool: FramePool,
    state: RingState,
    span: Span,
    /// Size of a complete raw frame; shorter payloads are dropped
    frame_size: Option<usize>,
    captured: u64,
    dropped: u64,
}

impl<D: CaptureDevice> CaptureBufferRing<D> {
    /// Request and map `slot_count` slots on `device`
    pub fn open(mut device: D, slot_count: u32) -> PipelineResult<Self> {
        let span = info_span!("capture", device = %device.name());
        let _enter = span.enter();

        if slot_count == 0 {
            return Err(PipelineError::Device("Slot count must be positive".into()));
        }

        let lengths = device.request_slots(slot_count)?;
        if lengths.is_empty() {
            let _ = device.release_slots();
            return Err(PipelineError::Device("Device granted no buffers".into()));
        }
        if lengths.len() != slot_count as usize {
            warn!(
                requested = slot_count,
                granted = lengths.len(),
                "Device adjusted the buffer count"
            );
        }

        let slots: Vec<Slot> = lengths
            .into_iter()
            .map(|length| Slot {
                length,
                owner: SlotOwner::Unqueued,
            })
            .collect();

        info!(slots = slots.len(), "Capture buffers mapped");

        let pool = FramePool::new(slots.len());
        drop(_enter);
        Ok(Self {
            device,
            slots,
            pool,
            state: RingState::Ready,
            span,
            frame_size: None,
            captured: 0,
            dropped: 0,
        })
    }

    /// Reject payloads shorter than `frame_size` bytes
    ///
    /// Raw formats have a fixed frame size; compressed formats pass `None`.
    pub fn with_frame_size(mut self, frame_size: Option<usize>) -> Self {
        self.frame_size = frame_size;
        self
    }

    /// Queue every slot and start streaming
    pub fn start(&mut self) -> PipelineResult<()> {
        let _enter = self.span.enter();
        match self.state {
            RingState::Ready | RingState::Stopped => {}
            RingState::Streaming => return Ok(()),
            RingState::Closed => {
                return Err(PipelineError::Device("Capture ring is closed".into()));
            }
        }

        for index in 0..self.slots.len() {
            if self.slots[index].owner == SlotOwner::Unqueued {
                self.device.enqueue(index as u32)?;
                self.slots[index].owner = SlotOwner::Device;
            }
        }
        self.device.stream_on()?;
        self.state = RingState::Streaming;

        info!("Capture streaming started");
        Ok(())
    }

    /// Wait for the next frame and return an owned copy of it
    ///
    /// The slot is re-queued before this returns, whatever the outcome of the
    /// copy. A corrupt, empty, truncated or oversized buffer is reported as
    /// [`PipelineError::Capture`].
    pub fn dequeue(&mut self) -> PipelineResult<FrameBuffer> {
        let span = self.span.clone();
        let _enter = span.enter();
        if self.state != RingState::Streaming {
            return Err(PipelineError::Device("Capture ring is not streaming".into()));
        }

        let filled = match self.device.dequeue() {
            Ok(filled) => filled,
            Err(e) => {
                if e.is_recoverable() {
                    self.dropped += 1;
                }
                return Err(e);
            }
        };

        let index = filled.index as usize;
        let length = match self.slots.get(index) {
            Some(slot) if slot.owner == SlotOwner::Device => slot.length,
            Some(slot) => {
                return Err(PipelineError::Device(format!(
                    "Device returned slot {} owned by {:?}",
                    index, slot.owner
                )));
            }
            None => {
                return Err(PipelineError::Device(format!(
                    "Device returned unknown slot {}",
                    index
                )));
            }
        };
        self.slots[index].owner = SlotOwner::Pipeline;

        let copied = if filled.error {
            Err(PipelineError::Capture(format!(
                "Buffer {} (sequence {}) flagged as corrupt",
                index, filled.sequence
            )))
        } else if filled.bytes_used == 0 {
            Err(PipelineError::Capture(format!("Buffer {} is empty", index)))
        } else if filled.bytes_used > length {
            Err(PipelineError::Capture(format!(
                "Buffer {} reports {} bytes but holds {}",
                index, filled.bytes_used, length
            )))
        } else if let Some(expected) = self.frame_size
            && filled.bytes_used < expected
        {
            Err(PipelineError::Capture(format!(
                "Buffer {} holds {} bytes, a full frame is {}",
                index, filled.bytes_used, expected
            )))
        } else {
            match self.device.slot_data(filled.index) {
                Some(mem) if mem.len() >= filled.bytes_used => {
                    Ok(self.pool.copy_from(&mem[..filled.bytes_used]))
                }
                _ => Err(PipelineError::Device(format!("Slot {} is not mapped", index))),
            }
        };

        self.requeue(filled.index)?;

        match &copied {
            Ok(_) => self.captured += 1,
            Err(e) if e.is_recoverable() => self.dropped += 1,
            Err(_) => {}
        }
        copied
    }

    fn requeue(&mut self, index: u32) -> PipelineResult<()> {
        let owner = self.slots[index as usize].owner;
        if owner != SlotOwner::Pipeline {
            return Err(PipelineError::Device(format!(
                "Refusing to queue slot {} owned by {:?}",
                index, owner
            )));
        }
        self.device.enqueue(index)?;
        self.slots[index as usize].owner = SlotOwner::Device;
        Ok(())
    }

    /// Stop streaming; every slot returns to the unqueued state
    pub fn stop(&mut self) -> PipelineResult<()> {
        let _enter = self.span.enter();
        if self.state != RingState::Streaming {
            return Ok(());
        }
        self.state = RingState::Stopped;
        for slot in &mut self.slots {
            slot.owner = SlotOwner::Unqueued;
        }
        self.device.stream_off()?;

        info!(
            captured = self.captured,
            dropped = self.dropped,
            "Capture streaming stopped"
        );
        Ok(())
    }

    /// Stop streaming, unmap and release every slot
    ///
    /// Calling this on a closed ring does nothing.
    pub fn close(&mut self) -> PipelineResult<()> {
        if self.state == RingState::Closed {
            return Ok(());
        }
        let stopped = self.stop();

        let _enter = self.span.enter();
        self.state = RingState::Closed;
        self.slots.clear();
        let released = self.device.release_slots();
        debug!("Capture buffers released");

        stopped.and(released)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_owner(&self, index: usize) -> Option<SlotOwner> {
        self.slots.get(index).map(|s| s.owner)
    }

    /// Slots currently outside the device
    pub fn outstanding(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.owner == SlotOwner::Pipeline)
            .count()
    }

    pub fn is_streaming(&self) -> bool {
        self.state == RingState::Streaming
    }

    pub fn is_closed(&self) -> bool {
        self.state == RingState::Closed
    }

    pub fn frames_captured(&self) -> u64 {
        self.captured
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: CaptureDevice> Drop for CaptureBufferRing<D> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close capture ring on drop");
        }
    }
}
