// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use std::io::Write;
use wamera::backends::capture::CaptureFormat;
use wamera::{Config, ContainerKind, PipelineError, PixelFormat, SinkFailurePolicy, TimeBase};

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.device.path.to_str(), Some("/dev/video0"));
    assert_eq!(config.device.slot_count, 4);
    assert_eq!((config.stream.width, config.stream.height), (1920, 1080));
    assert_eq!(config.stream.pixel_format, PixelFormat::Mjpeg);
    assert_eq!(config.stream.framerate, 30);
    assert_eq!(config.recording.segment_duration_secs, 3600.0);
    assert_eq!(config.recording.container, ContainerKind::Mp4);
    assert_eq!(config.live.container, ContainerKind::Flv);
    assert_eq!(config.sink_failure_policy, SinkFailurePolicy::Abort);
}

#[test]
fn test_partial_file_keeps_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "stream": {{ "width": 1280, "height": 720, "pixel_format": "yuyv" }},
            "live": {{ "url": "rtmp://localhost/live/key" }},
            "sink_failure_policy": "isolate"
        }}"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.stream.width, 1280);
    assert_eq!(config.stream.pixel_format, PixelFormat::Yuyv);
    assert_eq!(config.stream.framerate, 30);
    assert_eq!(config.live.url.as_deref(), Some("rtmp://localhost/live/key"));
    assert_eq!(config.sink_failure_policy, SinkFailurePolicy::Isolate);
    assert!(config.recording.enabled);
    assert!(config.validate().is_ok());
}

#[test]
fn test_malformed_file_is_a_config_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();
    assert!(matches!(
        Config::load(file.path()),
        Err(PipelineError::Config(_))
    ));
}

#[test]
fn test_validation_rejects_unusable_settings() {
    let mut config = Config::default();
    config.device.slot_count = 1;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.stream.framerate = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.recording.segment_duration_secs = 0.0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.recording.enabled = false;
    config.live.url = None;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.recording.container = ContainerKind::Flv;
    assert!(config.validate().is_err());
}

#[test]
fn test_stream_config_uses_negotiated_format() {
    let config = Config::default();
    let negotiated = CaptureFormat {
        width: 1280,
        height: 720,
        pixel_format: PixelFormat::Mjpeg,
        time_base: TimeBase::new(1, 25).unwrap(),
    };
    let stream = config.stream_config(&negotiated).unwrap();

    assert_eq!((stream.width(), stream.height()), (1280, 720));
    assert_eq!(stream.frame_rate_rounded(), 25);
    assert_eq!(stream.frames_per_segment(), 25 * 3600);
    // Medium preset at 720p
    assert_eq!(stream.bit_rate_kbps(), 2500);
}

#[test]
fn test_segment_length_beyond_duration_range_is_rejected() {
    let mut config = Config::default();
    config.recording.segment_duration_secs = 1e30;
    assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

    // Recording off skips validation; freezing the stream still refuses it
    config.recording.enabled = false;
    config.live.url = Some("rtmp://localhost/live/key".into());
    assert!(config.validate().is_ok());
    let negotiated = CaptureFormat {
        width: 640,
        height: 480,
        pixel_format: PixelFormat::Yuyv,
        time_base: TimeBase::new(1, 30).unwrap(),
    };
    assert!(matches!(
        config.stream_config(&negotiated),
        Err(PipelineError::Config(_))
    ));
}
