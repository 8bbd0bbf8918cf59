// SPDX-License-Identifier: GPL-3.0-only

//! Camera pixel formats and output container kinds

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel formats the capture side can hand to the transcoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Motion JPEG: each frame is a standalone JPEG image
    #[default]
    Mjpeg,
    /// YUYV 4:2:2 packed (Y0 U Y1 V byte order)
    Yuyv,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 2] = [PixelFormat::Mjpeg, PixelFormat::Yuyv];

    /// V4L2 FourCC code
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            Self::Mjpeg => *b"MJPG",
            Self::Yuyv => *b"YUYV",
        }
    }

    /// Parse from a FourCC, accepting common aliases
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"MJPG" | b"JPEG" => Some(Self::Mjpeg),
            b"YUYV" | b"YUY2" => Some(Self::Yuyv),
            _ => None,
        }
    }

    /// Parse from a user-supplied name ("mjpeg", "MJPG", "yuyv", ...)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mjpeg" | "mjpg" | "jpeg" => Some(Self::Mjpeg),
            "yuyv" | "yuy2" | "yuv" => Some(Self::Yuyv),
            _ => None,
        }
    }

    /// Whether frames vary in size (compressed) or have a fixed size
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Mjpeg)
    }

    /// Expected size of one raw frame, `None` for compressed formats
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        match self {
            Self::Mjpeg => None,
            Self::Yuyv => Some(width as usize * height as usize * 2),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mjpeg => write!(f, "MJPEG"),
            Self::Yuyv => write!(f, "YUYV"),
        }
    }
}

/// Container formats an output sink can write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    /// FLV, used for RTMP live streaming
    Flv,
    /// MP4 files (default for recordings)
    #[default]
    Mp4,
    /// Matroska files, tolerant of abrupt termination
    Matroska,
}

impl ContainerKind {
    /// GStreamer muxer element
    pub fn muxer_name(&self) -> &'static str {
        match self {
            Self::Flv => "flvmux",
            Self::Mp4 => "mp4mux",
            Self::Matroska => "matroskamux",
        }
    }

    /// File extension for recordings
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Flv => "flv",
            Self::Mp4 => "mp4",
            Self::Matroska => "mkv",
        }
    }

    /// Whether the container is meant to be streamed rather than seeked
    pub fn is_streamable(&self) -> bool {
        matches!(self, Self::Flv)
    }

    /// Guess the container from a destination (URL scheme or file extension)
    pub fn guess(destination: &str) -> Option<Self> {
        let lower = destination.to_ascii_lowercase();
        if lower.starts_with("rtmp://") || lower.starts_with("rtmps://") || lower.ends_with(".flv") {
            Some(Self::Flv)
        } else if lower.ends_with(".mp4") {
            Some(Self::Mp4)
        } else if lower.ends_with(".mkv") {
            Some(Self::Matroska)
        } else {
            None
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}
