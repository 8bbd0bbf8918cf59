// SPDX-License-Identifier: GPL-3.0-only

//! Rational time bases and timestamp rescaling

use gstreamer as gst;
use gstreamer::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A time base expressed as `num / den` seconds per tick
///
/// A camera frame interval of 1/30 s doubles as the encoder time base, so one
/// tick is one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    /// Millisecond ticks, used by FLV
    pub const MILLIS: TimeBase = TimeBase { num: 1, den: 1000 };

    /// Create a time base, rejecting a zero numerator or denominator
    pub fn new(num: u32, den: u32) -> Option<Self> {
        if num == 0 || den == 0 {
            None
        } else {
            Some(Self { num, den })
        }
    }

    /// Frame period `1 / fps`
    pub fn from_fps(fps: u32) -> Option<Self> {
        Self::new(1, fps)
    }

    /// Ticks per second as a float (`den / num`)
    pub fn rate(&self) -> f64 {
        self.den as f64 / self.num as f64
    }

    /// Convert `ts` from this time base into `to`, rounding to nearest
    pub fn rescale(&self, ts: i64, to: TimeBase) -> i64 {
        rescale(ts, *self, to)
    }

    /// GStreamer clock time of `ticks`; negative timestamps clamp to zero
    pub fn to_clock_time(&self, ticks: i64) -> gst::ClockTime {
        let scaled = (ticks.max(0) as u64).saturating_mul(self.num as u64);
        gst::ClockTime::SECOND
            .mul_div_round(scaled, self.den as u64)
            .unwrap_or(gst::ClockTime::MAX)
    }

    /// Nearest tick of this time base to a GStreamer clock time
    pub fn from_clock_time(&self, time: gst::ClockTime) -> i64 {
        time.nseconds()
            .mul_div_round(self.den as u64, self.num as u64 * gst::ClockTime::SECOND.nseconds())
            .map_or(i64::MAX, |ticks| ticks.min(i64::MAX as u64) as i64)
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Rescale `ts` from time base `from` to time base `to`
///
/// Computes `ts * from.num * to.den / (from.den * to.num)` in 128-bit
/// arithmetic, rounding half away from zero. Results outside the `i64` range
/// saturate.
pub fn rescale(ts: i64, from: TimeBase, to: TimeBase) -> i64 {
    let num = ts as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    if den == 0 {
        return 0;
    }
    let half = den / 2;
    let q = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    q.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}
