// SPDX-License-Identifier: MPL-2.0

//! Error types for the capture/transcode/fan-out pipeline
//!
//! Every stage reports failures through [`PipelineError`]. Only
//! [`PipelineError::Capture`] is recoverable: the driver logs it and moves on
//! to the next frame. Everything else stops the pipeline.

use thiserror::Error;

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Main pipeline error type
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Device open, buffer negotiation, mapping or streaming control failed
    #[error("Device error: {0}")]
    Device(String),

    /// A single frame could not be captured (dropped or invalid buffer)
    #[error("Capture error: {0}")]
    Capture(String),

    /// No decoder or encoder available for the requested format
    #[error("Codec unavailable: {0}")]
    CodecUnavailable(String),

    /// A codec was found but refused the configuration
    #[error("Codec configuration error: {0}")]
    CodecConfig(String),

    /// Frame submission or output retrieval failed at runtime
    #[error("Codec error: {0}")]
    Codec(String),

    /// Container allocation, stream declaration or header write failed
    #[error("Failed to open sink {destination}: {reason}")]
    SinkOpen { destination: String, reason: String },

    /// Packet write failed on an open sink
    #[error("Failed to write to sink {destination}: {reason}")]
    SinkWrite { destination: String, reason: String },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem errors outside of a sink (log file, recording directory)
    #[error("I/O error: {0}")]
    Io(String),
}

impl PipelineError {
    /// Whether the driver may continue with the next frame
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::Capture(_))
    }

    /// Whether the error came from an output sink
    pub fn is_sink_error(&self) -> bool {
        matches!(
            self,
            PipelineError::SinkOpen { .. } | PipelineError::SinkWrite { .. }
        )
    }

    pub fn sink_open(destination: impl ToString, reason: impl ToString) -> Self {
        PipelineError::SinkOpen {
            destination: destination.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn sink_write(destination: impl ToString, reason: impl ToString) -> Self {
        PipelineError::SinkWrite {
            destination: destination.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Config(e.to_string())
    }
}

impl From<gstreamer::glib::Error> for PipelineError {
    fn from(e: gstreamer::glib::Error) -> Self {
        PipelineError::CodecConfig(e.to_string())
    }
}
