// SPDX-License-Identifier: GPL-3.0-only

//! Decode/encode stage: one captured frame in, at most one encoded unit out

use crate::backends::capture::FrameBuffer;
use crate::config::StreamConfig;
use crate::errors::PipelineResult;
use crate::media::decoders::{Decoder, GstDecoder};
use crate::media::encoders::{EncodedPacket, Encoder, GstEncoder, select_h264_encoder};
use crate::media::time_base::TimeBase;
use crate::media::Receive;
use std::time::Duration;
use tracing::{debug, trace};

/// One encoded access unit ready for muxing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedUnit {
    pub data: Vec<u8>,
    pub pts: i64,
    /// Always equal to `pts`: the encoder emits no B-frames
    pub dts: i64,
    pub keyframe: bool,
    /// Time base of `pts` and `dts`
    pub time_base: TimeBase,
}

impl EncodedUnit {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Counters kept by the transcoder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscodeStats {
    pub frames_in: u64,
    pub units_out: u64,
    /// Frames for which the decoder produced nothing yet
    pub decoder_pending: u64,
    /// Pictures for which the encoder produced nothing yet
    pub encoder_pending: u64,
}

/// Decoder + encoder pair
pub struct TranscodePipeline<D, E>
where
    D: Decoder,
    E: Encoder<Picture = D::Picture>,
{
    decoder: D,
    encoder: E,
    time_base: TimeBase,
    stats: TranscodeStats,
    /// Timestamp for the next picture drained at end of stream
    next_pts: i64,
    closed: bool,
}

/// The production transcoder
pub type GstTranscoder = TranscodePipeline<GstDecoder, GstEncoder>;

impl GstTranscoder {
    /// Resolve a decoder for the stream's pixel format and an H.264 encoder
    pub fn open(
        config: &StreamConfig,
        preferred_encoder: Option<&str>,
        timeout: Duration,
    ) -> PipelineResult<Self> {
        let info = select_h264_encoder(preferred_encoder)?;
        let mut decoder = GstDecoder::open(config, timeout)?;
        let encoder = match GstEncoder::open(config, info, timeout) {
            Ok(encoder) => encoder,
            Err(e) => {
                let _ = decoder.close();
                return Err(e);
            }
        };
        Ok(Self::new(decoder, encoder, config.time_base()))
    }
}

impl<D, E> TranscodePipeline<D, E>
where
    D: Decoder,
    E: Encoder<Picture = D::Picture>,
{
    /// Pair an already opened decoder and encoder
    pub fn new(decoder: D, encoder: E, time_base: TimeBase) -> Self {
        Self {
            decoder,
            encoder,
            time_base,
            stats: TranscodeStats::default(),
            next_pts: 0,
            closed: false,
        }
    }

    /// Decode and re-encode one frame
    ///
    /// `frame` is consumed and released on every path, including errors.
    /// Returns `None` when either codec needs more input first.
    pub fn process(
        &mut self,
        frame: FrameBuffer,
        sequence: u64,
    ) -> PipelineResult<Option<EncodedUnit>> {
        let pts = sequence as i64;
        self.stats.frames_in += 1;
        self.next_pts = pts + 1;

        self.decoder.send(&frame, pts)?;
        drop(frame);

        let picture = match self.decoder.receive()? {
            Receive::Ready(picture) => picture,
            Receive::Again | Receive::Eof => {
                self.stats.decoder_pending += 1;
                trace!(sequence, "Decoder needs more input");
                return Ok(None);
            }
        };

        self.encoder.send(picture, pts)?;

        let packet = match self.encoder.receive()? {
            Receive::Ready(packet) => packet,
            Receive::Again | Receive::Eof => {
                self.stats.encoder_pending += 1;
                trace!(sequence, "Encoder needs more input");
                return Ok(None);
            }
        };

        Ok(Some(self.emit(packet, pts)))
    }

    fn emit(&mut self, packet: EncodedPacket, fallback_pts: i64) -> EncodedUnit {
        self.stats.units_out += 1;
        let pts = packet.pts.unwrap_or(fallback_pts);
        EncodedUnit {
            data: packet.data,
            pts,
            dts: pts,
            keyframe: packet.keyframe,
            time_base: self.time_base,
        }
    }

    /// Drain both codecs at end of stream
    ///
    /// Pictures the decoder still holds are encoded with timestamps that
    /// continue after the last captured frame. Returns the remaining units in
    /// output order. A codec that neither finishes nor produces output within
    /// its timeout ends the drain early.
    pub fn flush(&mut self) -> PipelineResult<Vec<EncodedUnit>> {
        if self.closed {
            return Ok(Vec::new());
        }
        let mut units = Vec::new();

        self.decoder.flush()?;
        loop {
            let picture = match self.decoder.receive()? {
                Receive::Ready(picture) => picture,
                Receive::Eof => break,
                Receive::Again => {
                    debug!("Decoder did not reach end of stream");
                    break;
                }
            };
            let pts = self.next_pts;
            self.next_pts += 1;
            self.encoder.send(picture, pts)?;
            if let Receive::Ready(packet) = self.encoder.receive()? {
                units.push(self.emit(packet, pts));
            }
        }

        self.encoder.flush()?;
        loop {
            let packet = match self.encoder.receive()? {
                Receive::Ready(packet) => packet,
                Receive::Eof => break,
                Receive::Again => {
                    debug!("Encoder did not reach end of stream");
                    break;
                }
            };
            let fallback = units.last().map_or(self.next_pts - 1, |u| u.pts + 1);
            units.push(self.emit(packet, fallback));
        }

        debug!(units = units.len(), "Transcoder drained");
        Ok(units)
    }

    /// Ask the encoder to start a new GOP
    pub fn request_keyframe(&mut self) -> PipelineResult<()> {
        self.encoder.request_keyframe()
    }

    pub fn stats(&self) -> TranscodeStats {
        self.stats
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Release both codecs; a second call does nothing
    pub fn close(&mut self) -> PipelineResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let decoder = self.decoder.close();
        let encoder = self.encoder.close();
        debug!(
            frames_in = self.stats.frames_in,
            units_out = self.stats.units_out,
            "Transcoder closed"
        );
        decoder.and(encoder)
    }
}
