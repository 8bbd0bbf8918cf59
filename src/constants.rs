// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// H.264 bitrate presets
///
/// The preset picks a target bitrate from the capture resolution when no
/// explicit bitrate is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitratePreset {
    /// Low bitrate, suited to constrained uplinks
    Low,
    /// Balanced quality and size (default)
    #[default]
    Medium,
    /// High bitrate, larger recordings
    High,
}

impl BitratePreset {
    pub const ALL: [BitratePreset; 3] = [
        BitratePreset::Low,
        BitratePreset::Medium,
        BitratePreset::High,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            BitratePreset::Low => "Low",
            BitratePreset::Medium => "Medium",
            BitratePreset::High => "High",
        }
    }

    /// Target bitrate in kbps for a given resolution
    ///
    /// - SD (640x480): Low=0.5, Medium=1, High=2 Mbps
    /// - HD (1280x720): Low=1, Medium=2.5, High=5 Mbps
    /// - Full HD (1920x1080): Low=2, Medium=4, High=8 Mbps
    /// - 4K (3840x2160): Low=8, Medium=15, High=30 Mbps
    pub fn bitrate_kbps(&self, width: u32, _height: u32) -> u32 {
        match (get_resolution_tier(width), self) {
            (ResolutionTier::SD, BitratePreset::Low) => 500,
            (ResolutionTier::SD, BitratePreset::Medium) => 1_000,
            (ResolutionTier::SD, BitratePreset::High) => 2_000,
            (ResolutionTier::HD, BitratePreset::Low) => 1_000,
            (ResolutionTier::HD, BitratePreset::Medium) => 2_500,
            (ResolutionTier::HD, BitratePreset::High) => 5_000,
            (ResolutionTier::FullHD, BitratePreset::Low) => 2_000,
            (ResolutionTier::FullHD, BitratePreset::Medium) => 4_000,
            (ResolutionTier::FullHD, BitratePreset::High) => 8_000,
            (ResolutionTier::FourK, BitratePreset::Low) => 8_000,
            (ResolutionTier::FourK, BitratePreset::Medium) => 15_000,
            (ResolutionTier::FourK, BitratePreset::High) => 30_000,
        }
    }
}

/// Resolution tiers for bitrate calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    /// 640x480 and below
    SD,
    /// 1280x720
    HD,
    /// 1920x1080
    FullHD,
    /// 3840x2160 and above
    FourK,
}

/// Get the resolution tier for a given width
pub fn get_resolution_tier(width: u32) -> ResolutionTier {
    match width {
        w if w >= 3840 => ResolutionTier::FourK,
        w if w >= 1920 => ResolutionTier::FullHD,
        w if w >= 1280 => ResolutionTier::HD,
        _ => ResolutionTier::SD,
    }
}

/// Format bitrate for display (e.g., "4 Mbps" or "2.5 Mbps")
pub fn format_bitrate(kbps: u32) -> String {
    let mbps = kbps as f64 / 1000.0;
    if mbps == mbps.floor() {
        format!("{} Mbps", mbps as u32)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// Capture device defaults
pub mod capture {
    use super::Duration;

    pub const DEFAULT_DEVICE: &str = "/dev/video0";

    /// Number of mmap slots shared with the driver
    pub const DEFAULT_SLOT_COUNT: u32 = 4;

    /// Fewer than two slots stalls the driver while a frame is copied out
    pub const MIN_SLOT_COUNT: u32 = 2;

    /// Upper bound accepted from configuration
    pub const MAX_SLOT_COUNT: u32 = 32;

    /// How long a dequeue waits for a frame before reporting a drop
    pub const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(2);
}

/// Stream defaults
pub mod stream {
    pub const DEFAULT_WIDTH: u32 = 1920;
    pub const DEFAULT_HEIGHT: u32 = 1080;
    pub const DEFAULT_FRAMERATE: u32 = 30;

    /// One hour per recording segment
    pub const DEFAULT_SEGMENT_SECS: u64 = 3600;

    pub const DEFAULT_FILE_PREFIX: &str = "out";

    /// strftime pattern for segment file names
    pub const SEGMENT_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";
}

/// GStreamer pipeline constants
pub mod pipeline {
    /// Maximum queued buffers on appsrc/appsink (keep small for low latency)
    pub const MAX_BUFFERS: u32 = 2;

    /// Raw format handed from the decoder to the encoder
    pub const RAW_FORMAT: &str = "I420";
}

/// Timing constants
pub mod timing {
    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 300;

    /// Default wait for a codec output before reporting "not ready"
    pub const CODEC_TIMEOUT_MS: u64 = 200;

    /// Pipeline playing state timeout on start
    pub const START_TIMEOUT_SECS: u64 = 5;

    /// Time allowed for a muxer to flush its trailer after EOS
    pub const STOP_TIMEOUT_SECS: u64 = 5;
}

/// Application metadata
pub mod app_info {
    /// Version string, with commit hash when built from git
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}
