// SPDX-License-Identifier: MPL-2.0

//! Fakes shared by the integration tests
//!
//! Nothing here touches hardware or GStreamer. Every fake keeps its
//! observable state behind an `Rc` handle so tests can inspect it after the
//! fake has been moved into the pipeline.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;
use wamera::backends::capture::{CaptureBufferRing, CaptureDevice, DequeuedSlot};
use wamera::config::{SinkFailurePolicy, StreamConfig};
use wamera::errors::{PipelineError, PipelineResult};
use wamera::media::Receive;
use wamera::media::decoders::Decoder;
use wamera::media::encoders::{EncodedPacket, Encoder};
use wamera::pipelines::{Destination, Muxer, MuxerFactory, PipelineDriver, TranscodePipeline};
use wamera::{ContainerKind, PixelFormat, TimeBase};

pub const FRAME_LEN: usize = 16;
pub const SLOT_LEN: usize = 64;

pub fn stream_config(fps: u32, segment_secs: f64) -> StreamConfig {
    StreamConfig::new(
        640,
        480,
        PixelFormat::Mjpeg,
        TimeBase::from_fps(fps).unwrap(),
        Duration::from_secs_f64(segment_secs),
        1000,
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// What the fake device does on the next dequeue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shot {
    /// Deliver a good frame
    Frame,
    /// Time out without a frame
    Timeout,
    /// Deliver a buffer flagged as corrupt
    Corrupt,
    /// Deliver an empty buffer
    Empty,
    /// Deliver half a frame
    Short,
    /// Fail with a device error
    Fatal,
}

#[derive(Debug, Default)]
pub struct DeviceState {
    pub queued: VecDeque<u32>,
    /// How many times each slot was enqueued
    pub enqueues: Vec<u32>,
    pub dequeues: u64,
    pub streaming: bool,
    pub stream_offs: u32,
    pub released: u32,
}

/// Scripted capture device; unscripted dequeues deliver good frames
pub struct FakeDevice {
    slots: Vec<Vec<u8>>,
    script: VecDeque<Shot>,
    sequence: u32,
    pub state: Rc<RefCell<DeviceState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            script: VecDeque::new(),
            sequence: 0,
            state: Rc::default(),
        }
    }

    pub fn with_script(script: impl IntoIterator<Item = Shot>) -> Self {
        let mut device = Self::new();
        device.script = script.into_iter().collect();
        device
    }

    pub fn handle(&self) -> Rc<RefCell<DeviceState>> {
        Rc::clone(&self.state)
    }

    fn take_queued(&mut self) -> PipelineResult<u32> {
        self.state
            .borrow_mut()
            .queued
            .pop_front()
            .ok_or_else(|| PipelineError::Device("no slot queued".into()))
    }
}

impl CaptureDevice for FakeDevice {
    fn name(&self) -> String {
        "fake".into()
    }

    fn request_slots(&mut self, count: u32) -> PipelineResult<Vec<usize>> {
        self.slots = (0..count).map(|i| vec![i as u8; SLOT_LEN]).collect();
        self.state.borrow_mut().enqueues = vec![0; count as usize];
        Ok(vec![SLOT_LEN; count as usize])
    }

    fn enqueue(&mut self, index: u32) -> PipelineResult<()> {
        let mut state = self.state.borrow_mut();
        assert!(!state.queued.contains(&index), "slot {} queued twice", index);
        state.queued.push_back(index);
        state.enqueues[index as usize] += 1;
        Ok(())
    }

    fn dequeue(&mut self) -> PipelineResult<DequeuedSlot> {
        self.state.borrow_mut().dequeues += 1;
        let shot = self.script.pop_front().unwrap_or(Shot::Frame);
        let (bytes_used, error) = match shot {
            Shot::Timeout => return Err(PipelineError::Capture("timed out".into())),
            Shot::Fatal => return Err(PipelineError::Device("device unplugged".into())),
            Shot::Frame => (FRAME_LEN, false),
            Shot::Corrupt => (FRAME_LEN, true),
            Shot::Empty => (0, false),
            Shot::Short => (FRAME_LEN / 2, false),
        };
        let index = self.take_queued()?;
        self.sequence += 1;
        Ok(DequeuedSlot {
            index,
            bytes_used,
            error,
            sequence: self.sequence,
        })
    }

    fn slot_data(&self, index: u32) -> Option<&[u8]> {
        self.slots.get(index as usize).map(|s| s.as_slice())
    }

    fn stream_on(&mut self) -> PipelineResult<()> {
        self.state.borrow_mut().streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> PipelineResult<()> {
        let mut state = self.state.borrow_mut();
        state.streaming = false;
        state.stream_offs += 1;
        state.queued.clear();
        Ok(())
    }

    fn release_slots(&mut self) -> PipelineResult<()> {
        self.state.borrow_mut().released += 1;
        self.slots.clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Codecs
// ---------------------------------------------------------------------------

/// Picture produced by [`FakeDecoder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakePicture {
    pub pts: i64,
    pub len: usize,
}

#[derive(Debug, Default)]
pub struct CodecState {
    pub sent: u64,
    pub closed: u32,
    pub keyframe_requests: u64,
}

/// Decoder that swallows the frames at the scripted send indices and holds
/// back `lag` pictures until flushed
pub struct FakeDecoder {
    again_at: Vec<u64>,
    lag: usize,
    held: VecDeque<FakePicture>,
    flushed: bool,
    pub state: Rc<RefCell<CodecState>>,
}

impl FakeDecoder {
    pub fn new() -> Self {
        Self::again_at([])
    }

    pub fn again_at(indices: impl IntoIterator<Item = u64>) -> Self {
        Self {
            again_at: indices.into_iter().collect(),
            lag: 0,
            held: VecDeque::new(),
            flushed: false,
            state: Rc::default(),
        }
    }

    pub fn lagging(lag: usize) -> Self {
        let mut decoder = Self::new();
        decoder.lag = lag;
        decoder
    }
}

impl Decoder for FakeDecoder {
    type Picture = FakePicture;

    fn send(&mut self, frame: &[u8], pts: i64) -> PipelineResult<()> {
        let mut state = self.state.borrow_mut();
        if state.closed > 0 {
            return Err(PipelineError::Codec("decoder closed".into()));
        }
        let index = state.sent;
        state.sent += 1;
        if !self.again_at.contains(&index) {
            self.held.push_back(FakePicture {
                pts,
                len: frame.len(),
            });
        }
        Ok(())
    }

    fn receive(&mut self) -> PipelineResult<Receive<FakePicture>> {
        Ok(release(&mut self.held, self.lag, self.flushed))
    }

    fn flush(&mut self) -> PipelineResult<()> {
        self.flushed = true;
        Ok(())
    }

    fn close(&mut self) -> PipelineResult<()> {
        self.state.borrow_mut().closed += 1;
        Ok(())
    }
}

/// Hand out the oldest held output once more than `lag` are waiting, or
/// everything once flushed
fn release<T>(held: &mut VecDeque<T>, lag: usize, flushed: bool) -> Receive<T> {
    if held.len() > lag || (flushed && !held.is_empty()) {
        held.pop_front().map_or(Receive::Again, Receive::Ready)
    } else if flushed {
        Receive::Eof
    } else {
        Receive::Again
    }
}

/// Encoder emitting one packet per picture, key frames on request
pub struct FakeEncoder {
    again_at: Vec<u64>,
    fail_at: Option<u64>,
    lag: usize,
    held: VecDeque<EncodedPacket>,
    flushed: bool,
    force_key: bool,
    pub state: Rc<RefCell<CodecState>>,
}

impl FakeEncoder {
    pub fn new() -> Self {
        Self::again_at([])
    }

    pub fn again_at(indices: impl IntoIterator<Item = u64>) -> Self {
        Self {
            again_at: indices.into_iter().collect(),
            fail_at: None,
            lag: 0,
            held: VecDeque::new(),
            flushed: false,
            force_key: true,
            state: Rc::default(),
        }
    }

    pub fn failing_at(index: u64) -> Self {
        let mut encoder = Self::new();
        encoder.fail_at = Some(index);
        encoder
    }

    /// Encoder whose output trails its input by `lag` packets
    pub fn lagging(lag: usize) -> Self {
        let mut encoder = Self::new();
        encoder.lag = lag;
        encoder
    }
}

impl Encoder for FakeEncoder {
    type Picture = FakePicture;

    fn send(&mut self, picture: FakePicture, pts: i64) -> PipelineResult<()> {
        let mut state = self.state.borrow_mut();
        let index = state.sent;
        state.sent += 1;
        if self.fail_at == Some(index) {
            return Err(PipelineError::Codec("encoder rejected picture".into()));
        }
        if self.again_at.contains(&index) {
            return Ok(());
        }
        self.held.push_back(EncodedPacket {
            data: vec![0xAB; picture.len],
            pts: Some(pts),
            keyframe: std::mem::take(&mut self.force_key),
        });
        Ok(())
    }

    fn receive(&mut self) -> PipelineResult<Receive<EncodedPacket>> {
        Ok(release(&mut self.held, self.lag, self.flushed))
    }

    fn flush(&mut self) -> PipelineResult<()> {
        self.flushed = true;
        Ok(())
    }

    fn request_keyframe(&mut self) -> PipelineResult<()> {
        self.state.borrow_mut().keyframe_requests += 1;
        self.force_key = true;
        Ok(())
    }

    fn close(&mut self) -> PipelineResult<()> {
        self.state.borrow_mut().closed += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Muxing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxEvent {
    Open(String),
    Packet {
        destination: String,
        pts: i64,
        dts: i64,
        keyframe: bool,
    },
    Close(String),
}

/// Shared record of everything the muxers were asked to do
#[derive(Debug, Default)]
pub struct MuxLog {
    pub events: Vec<MuxEvent>,
    /// Destinations containing any of these fail to open
    pub fail_open: Vec<String>,
    /// Destinations containing any of these fail to write
    pub fail_write: Vec<String>,
}

impl MuxLog {
    pub fn opened(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                MuxEvent::Open(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                MuxEvent::Close(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(pts, dts, keyframe)` of the packets written to destinations containing `needle`
    pub fn packets_to(&self, needle: &str) -> Vec<(i64, i64, bool)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                MuxEvent::Packet {
                    destination,
                    pts,
                    dts,
                    keyframe,
                } if destination.contains(needle) => Some((*pts, *dts, *keyframe)),
                _ => None,
            })
            .collect()
    }

    fn fails(list: &[String], destination: &str) -> bool {
        list.iter().any(|needle| destination.contains(needle.as_str()))
    }
}

pub type SharedMuxLog = Rc<RefCell<MuxLog>>;

struct RecordingMuxer {
    destination: String,
    time_base: TimeBase,
    log: SharedMuxLog,
}

impl Muxer for RecordingMuxer {
    fn write_header(&mut self) -> PipelineResult<TimeBase> {
        let mut log = self.log.borrow_mut();
        if MuxLog::fails(&log.fail_open, &self.destination) {
            return Err(PipelineError::sink_open(&self.destination, "refused"));
        }
        log.events.push(MuxEvent::Open(self.destination.clone()));
        Ok(self.time_base)
    }

    fn write_packet(&mut self, _data: &[u8], pts: i64, dts: i64, keyframe: bool) -> PipelineResult<()> {
        let mut log = self.log.borrow_mut();
        if MuxLog::fails(&log.fail_write, &self.destination) {
            return Err(PipelineError::sink_write(&self.destination, "connection reset"));
        }
        log.events.push(MuxEvent::Packet {
            destination: self.destination.clone(),
            pts,
            dts,
            keyframe,
        });
        Ok(())
    }

    fn write_trailer(&mut self) -> PipelineResult<()> {
        self.log
            .borrow_mut()
            .events
            .push(MuxEvent::Close(self.destination.clone()));
        Ok(())
    }
}

/// Factory whose muxers append to a [`MuxLog`]
///
/// File destinations are created on disk so segment names stay unique.
#[derive(Default)]
pub struct RecordingFactory {
    pub log: SharedMuxLog,
}

impl RecordingFactory {
    pub fn new() -> (Self, SharedMuxLog) {
        let factory = Self::default();
        let log = Rc::clone(&factory.log);
        (factory, log)
    }
}

impl MuxerFactory for RecordingFactory {
    fn create(
        &mut self,
        config: &StreamConfig,
        destination: &Destination,
        kind: ContainerKind,
    ) -> PipelineResult<Box<dyn Muxer>> {
        if let Destination::File(path) = destination {
            std::fs::File::create(path)?;
        }
        let time_base = match kind {
            ContainerKind::Flv => TimeBase::MILLIS,
            ContainerKind::Mp4 | ContainerKind::Matroska => config.time_base(),
        };
        Ok(Box::new(RecordingMuxer {
            destination: destination.to_string(),
            time_base,
            log: Rc::clone(&self.log),
        }))
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

pub type FakeDriver = PipelineDriver<FakeDevice, FakeDecoder, FakeEncoder>;

/// Handles to the state of every fake inside a [`FakeDriver`]
pub struct Handles {
    pub device: Rc<RefCell<DeviceState>>,
    pub decoder: Rc<RefCell<CodecState>>,
    pub encoder: Rc<RefCell<CodecState>>,
    pub mux: SharedMuxLog,
}

pub fn fake_driver(
    config: StreamConfig,
    device: FakeDevice,
    decoder: FakeDecoder,
    encoder: FakeEncoder,
    policy: SinkFailurePolicy,
) -> (FakeDriver, Handles) {
    let handles = Handles {
        device: device.handle(),
        decoder: Rc::clone(&decoder.state),
        encoder: Rc::clone(&encoder.state),
        mux: Rc::default(),
    };
    let ring = CaptureBufferRing::open(device, 4)
        .unwrap()
        .with_frame_size(config.pixel_format().frame_size(config.width(), config.height()));
    let transcoder = TranscodePipeline::new(decoder, encoder, config.time_base());
    let factory = RecordingFactory {
        log: Rc::clone(&handles.mux),
    };
    let driver = PipelineDriver::new(config, ring, transcoder, Box::new(factory), policy);
    (driver, handles)
}

pub const LIVE_URL: &str = "rtmp://localhost/live/test";
