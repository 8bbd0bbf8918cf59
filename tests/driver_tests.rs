// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the pipeline driver using fake hardware

mod common;

use common::{
    FRAME_LEN, FakeDecoder, FakeDevice, FakeEncoder, LIVE_URL, MuxEvent, Shot, fake_driver,
    stream_config,
};
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use wamera::config::{SinkFailurePolicy, StreamConfig};
use wamera::errors::PipelineError;
use wamera::pipelines::{Destination, StepOutcome};
use wamera::storage::SegmentNamer;
use wamera::{ContainerKind, PixelFormat, TimeBase};

fn not_stopped() -> AtomicBool {
    AtomicBool::new(false)
}

#[test]
fn test_live_only_run_writes_every_frame_in_milliseconds() {
    let (mut driver, handles) = fake_driver(
        stream_config(30, 3600.0),
        FakeDevice::new(),
        FakeDecoder::new(),
        FakeEncoder::new(),
        SinkFailurePolicy::Abort,
    );
    driver
        .open_live(Destination::parse(LIVE_URL), ContainerKind::Flv)
        .unwrap();
    driver.start().unwrap();

    let summary = driver.run(&not_stopped(), Some(90)).unwrap();

    assert_eq!(summary.frames_captured, 90);
    assert_eq!(summary.units_encoded, 90);
    assert_eq!(summary.live_units_written, 90);
    assert_eq!(summary.segments_completed, 0);

    let log = handles.mux.borrow();
    let packets = log.packets_to(LIVE_URL);
    assert_eq!(packets.len(), 90);
    assert_eq!(packets[0], (0, 0, true));
    assert_eq!(packets[1].0, 33);
    assert_eq!(packets[2].0, 67);
    assert_eq!(packets[30].0, 1000);
    assert!(packets.windows(2).all(|w| w[0].1 <= w[1].1));
    assert_eq!(log.closed(), vec![LIVE_URL.to_string()]);
}

#[test]
fn test_dropped_frames_do_not_advance_the_count() {
    let device = FakeDevice::with_script([
        Shot::Frame,
        Shot::Timeout,
        Shot::Corrupt,
        Shot::Frame,
        Shot::Empty,
        Shot::Frame,
    ]);
    let (mut driver, handles) = fake_driver(
        stream_config(30, 3600.0),
        device,
        FakeDecoder::new(),
        FakeEncoder::new(),
        SinkFailurePolicy::Abort,
    );
    driver
        .open_live(Destination::parse(LIVE_URL), ContainerKind::Flv)
        .unwrap();
    driver.start().unwrap();

    let outcomes: Vec<StepOutcome> = (0..6).map(|_| driver.step().unwrap()).collect();
    assert_eq!(
        outcomes,
        vec![
            StepOutcome::Written { sinks: 1 },
            StepOutcome::Dropped,
            StepOutcome::Dropped,
            StepOutcome::Written { sinks: 1 },
            StepOutcome::Dropped,
            StepOutcome::Written { sinks: 1 },
        ]
    );
    assert_eq!(driver.frame_count(), 3);
    assert_eq!(driver.summary().frames_dropped, 3);
    assert_eq!(handles.decoder.borrow().sent, 3);

    // Dropped frames leave no gap in the timeline
    let log = handles.mux.borrow();
    let pts: Vec<i64> = log.packets_to(LIVE_URL).iter().map(|p| p.0).collect();
    assert_eq!(pts, vec![0, 33, 67]);

    // Every slot that left the device went back exactly once
    assert_eq!(driver.ring().outstanding(), 0);
    let device = handles.device.borrow();
    let total: u32 = device.enqueues.iter().sum();
    assert_eq!(total as u64, 4 + device.dequeues - 1);
}

#[test]
fn test_segments_rotate_and_start_on_keyframes() {
    let dir = tempfile::tempdir().unwrap();
    let (mut driver, handles) = fake_driver(
        stream_config(10, 1.0),
        FakeDevice::new(),
        FakeDecoder::new(),
        FakeEncoder::new(),
        SinkFailurePolicy::Abort,
    );
    driver.enable_recording(SegmentNamer::new(dir.path(), "out", ContainerKind::Mp4));
    driver.start().unwrap();

    let summary = driver.run(&not_stopped(), Some(25)).unwrap();

    // 25 frames at 10 per segment: two full segments and a partial one
    assert_eq!(summary.segments_opened, 3);
    assert_eq!(summary.segments_completed, 3);
    assert_eq!(handles.encoder.borrow().keyframe_requests, 3);

    let log = handles.mux.borrow();
    let opened = log.opened();
    assert_eq!(opened.len(), 3);
    let sizes: Vec<usize> = opened.iter().map(|p| log.packets_to(p).len()).collect();
    assert_eq!(sizes, vec![10, 10, 5]);
    for path in &opened {
        let packets = log.packets_to(path);
        assert!(packets[0].2, "{} does not start on a key frame", path);
        assert_eq!(packets[0].0, 0);
    }
}

#[test]
fn test_codec_backpressure_consumes_frames_without_output() {
    let (mut driver, handles) = fake_driver(
        stream_config(30, 3600.0),
        FakeDevice::new(),
        FakeDecoder::again_at([0, 1]),
        FakeEncoder::again_at([0]),
        SinkFailurePolicy::Abort,
    );
    driver
        .open_live(Destination::parse(LIVE_URL), ContainerKind::Flv)
        .unwrap();
    driver.start().unwrap();

    let outcomes: Vec<StepOutcome> = (0..4).map(|_| driver.step().unwrap()).collect();
    assert_eq!(
        outcomes,
        vec![
            StepOutcome::Pending,
            StepOutcome::Pending,
            StepOutcome::Pending,
            StepOutcome::Written { sinks: 1 },
        ]
    );
    assert_eq!(driver.frame_count(), 4);
    assert_eq!(driver.transcoder().stats().decoder_pending, 2);
    assert_eq!(driver.transcoder().stats().encoder_pending, 1);
    // Every captured frame went back to the pool
    assert_eq!(driver.ring().pool().outstanding(), 0);
    assert_eq!(handles.mux.borrow().packets_to(LIVE_URL).len(), 1);
}

#[test]
fn test_fatal_codec_error_closes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let (mut driver, handles) = fake_driver(
        stream_config(10, 1.0),
        FakeDevice::new(),
        FakeDecoder::new(),
        FakeEncoder::failing_at(4),
        SinkFailurePolicy::Abort,
    );
    driver
        .open_live(Destination::parse(LIVE_URL), ContainerKind::Flv)
        .unwrap();
    driver.enable_recording(SegmentNamer::new(dir.path(), "out", ContainerKind::Mp4));
    driver.start().unwrap();

    let err = driver.run(&not_stopped(), None).unwrap_err();
    assert!(matches!(err, PipelineError::Codec(_)));

    assert!(driver.ring().is_closed());
    assert_eq!(handles.device.borrow().released, 1);
    assert_eq!(handles.decoder.borrow().closed, 1);
    assert_eq!(handles.encoder.borrow().closed, 1);

    let log = handles.mux.borrow();
    assert_eq!(log.closed().len(), 2);
    assert!(driver.live().is_none());

    // Closing again does nothing
    drop(log);
    driver.close().unwrap();
    assert_eq!(handles.decoder.borrow().closed, 1);
}

#[test]
fn test_device_failure_stops_the_run() {
    let (mut driver, handles) = fake_driver(
        stream_config(30, 3600.0),
        FakeDevice::with_script([Shot::Frame, Shot::Fatal]),
        FakeDecoder::new(),
        FakeEncoder::new(),
        SinkFailurePolicy::Isolate,
    );
    driver
        .open_live(Destination::parse(LIVE_URL), ContainerKind::Flv)
        .unwrap();
    driver.start().unwrap();

    let err = driver.run(&not_stopped(), None).unwrap_err();
    assert!(matches!(err, PipelineError::Device(_)));
    assert_eq!(driver.frame_count(), 1);
    assert_eq!(handles.device.borrow().stream_offs, 1);
}

#[test]
fn test_live_failure_aborts_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let (mut driver, handles) = fake_driver(
        stream_config(10, 1.0),
        FakeDevice::new(),
        FakeDecoder::new(),
        FakeEncoder::new(),
        SinkFailurePolicy::Abort,
    );
    driver
        .open_live(Destination::parse(LIVE_URL), ContainerKind::Flv)
        .unwrap();
    driver.enable_recording(SegmentNamer::new(dir.path(), "out", ContainerKind::Mp4));
    driver.start().unwrap();

    for _ in 0..3 {
        driver.step().unwrap();
    }
    handles.mux.borrow_mut().fail_write.push("rtmp://".into());

    let err = driver.step().unwrap_err();
    assert!(matches!(err, PipelineError::SinkWrite { .. }));
}

#[test]
fn test_isolated_live_failure_keeps_recording() {
    let dir = tempfile::tempdir().unwrap();
    let (mut driver, handles) = fake_driver(
        stream_config(10, 1.0),
        FakeDevice::new(),
        FakeDecoder::new(),
        FakeEncoder::new(),
        SinkFailurePolicy::Isolate,
    );
    driver
        .open_live(Destination::parse(LIVE_URL), ContainerKind::Flv)
        .unwrap();
    driver.enable_recording(SegmentNamer::new(dir.path(), "out", ContainerKind::Mp4));
    driver.start().unwrap();

    for _ in 0..3 {
        assert_eq!(driver.step().unwrap(), StepOutcome::Written { sinks: 2 });
    }
    handles.mux.borrow_mut().fail_write.push("rtmp://".into());

    assert_eq!(driver.step().unwrap(), StepOutcome::Written { sinks: 1 });
    assert!(driver.live().is_none());

    let summary = driver.run(&not_stopped(), Some(20)).unwrap();
    assert_eq!(summary.live_units_written, 3);
    assert_eq!(summary.segments_completed, 2);

    let log = handles.mux.borrow();
    let segments: Vec<String> = log
        .opened()
        .into_iter()
        .filter(|d| d.ends_with(".mp4"))
        .collect();
    assert_eq!(segments.len(), 2);
    assert!(segments.iter().all(|s| log.packets_to(s).len() == 10));
}

#[test]
fn test_isolated_segment_failure_retries_at_next_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let (mut driver, handles) = fake_driver(
        stream_config(10, 0.5),
        FakeDevice::new(),
        FakeDecoder::new(),
        FakeEncoder::new(),
        SinkFailurePolicy::Isolate,
    );
    driver
        .open_live(Destination::parse(LIVE_URL), ContainerKind::Flv)
        .unwrap();
    driver.enable_recording(SegmentNamer::new(dir.path(), "out", ContainerKind::Mp4));
    handles.mux.borrow_mut().fail_open.push(".mp4".into());
    driver.start().unwrap();

    // The first segment cannot be opened; live keeps going
    for _ in 0..5 {
        assert_eq!(driver.step().unwrap(), StepOutcome::Written { sinks: 1 });
    }
    handles.mux.borrow_mut().fail_open.clear();
    for _ in 0..5 {
        assert_eq!(driver.step().unwrap(), StepOutcome::Written { sinks: 2 });
    }
    driver.close().unwrap();

    let log = handles.mux.borrow();
    assert_eq!(log.packets_to(LIVE_URL).len(), 10);
    let segments: Vec<String> = log
        .opened()
        .into_iter()
        .filter(|d| d.ends_with(".mp4"))
        .collect();
    assert_eq!(segments.len(), 1);
    assert_eq!(log.packets_to(&segments[0]).len(), 5);
}

#[test]
fn test_shutdown_flag_stops_before_capturing() {
    let (mut driver, handles) = fake_driver(
        stream_config(30, 3600.0),
        FakeDevice::new(),
        FakeDecoder::new(),
        FakeEncoder::new(),
        SinkFailurePolicy::Abort,
    );
    driver
        .open_live(Destination::parse(LIVE_URL), ContainerKind::Flv)
        .unwrap();
    driver.start().unwrap();

    let summary = driver.run(&AtomicBool::new(true), None).unwrap();
    assert_eq!(summary.frames_captured, 0);
    assert_eq!(handles.device.borrow().dequeues, 0);
    assert_eq!(handles.mux.borrow().closed(), vec![LIVE_URL.to_string()]);
}

#[test]
fn test_start_without_outputs_is_rejected() {
    let (mut driver, _handles) = fake_driver(
        stream_config(30, 3600.0),
        FakeDevice::new(),
        FakeDecoder::new(),
        FakeEncoder::new(),
        SinkFailurePolicy::Abort,
    );
    assert!(matches!(driver.start(), Err(PipelineError::Config(_))));
}

#[test]
fn test_truncated_raw_frame_is_dropped_before_decoding() {
    let dir = tempfile::tempdir().unwrap();
    // 4x2 YUYV is exactly one full fake frame
    let config = StreamConfig::new(
        4,
        2,
        PixelFormat::Yuyv,
        TimeBase::from_fps(30).unwrap(),
        Duration::from_secs(3600),
        1000,
    )
    .unwrap();
    assert_eq!(config.pixel_format().frame_size(4, 2), Some(FRAME_LEN));

    let (mut driver, handles) = fake_driver(
        config,
        FakeDevice::with_script([Shot::Frame, Shot::Short, Shot::Frame]),
        FakeDecoder::new(),
        FakeEncoder::new(),
        SinkFailurePolicy::Abort,
    );
    driver
        .open_live(Destination::parse(LIVE_URL), ContainerKind::Flv)
        .unwrap();
    driver.enable_recording(SegmentNamer::new(dir.path(), "out", ContainerKind::Mp4));
    driver.start().unwrap();

    let outcomes: Vec<StepOutcome> = (0..3).map(|_| driver.step().unwrap()).collect();
    assert_eq!(
        outcomes,
        vec![
            StepOutcome::Written { sinks: 2 },
            StepOutcome::Dropped,
            StepOutcome::Written { sinks: 2 },
        ]
    );
    assert_eq!(driver.frame_count(), 2);
    assert_eq!(driver.summary().frames_dropped, 1);
    assert_eq!(driver.ring().frames_dropped(), 1);
    assert_eq!(driver.ring().outstanding(), 0);
    assert_eq!(handles.decoder.borrow().sent, 2);

    let log = handles.mux.borrow();
    let live: Vec<i64> = log.packets_to(LIVE_URL).iter().map(|p| p.0).collect();
    assert_eq!(live, vec![0, 33]);
    assert_eq!(log.packets_to(".mp4").len(), 2);
}

#[test]
fn test_close_writes_units_still_held_by_the_encoder() {
    let dir = tempfile::tempdir().unwrap();
    let (mut driver, handles) = fake_driver(
        stream_config(10, 1.0),
        FakeDevice::new(),
        FakeDecoder::new(),
        FakeEncoder::lagging(1),
        SinkFailurePolicy::Abort,
    );
    driver
        .open_live(Destination::parse(LIVE_URL), ContainerKind::Flv)
        .unwrap();
    driver.enable_recording(SegmentNamer::new(dir.path(), "out", ContainerKind::Mp4));
    driver.start().unwrap();

    assert_eq!(driver.step().unwrap(), StepOutcome::Pending);
    let summary = driver.run(&not_stopped(), Some(5)).unwrap();

    assert_eq!(summary.frames_captured, 5);
    assert_eq!(summary.units_encoded, 5);
    assert_eq!(summary.live_units_written, 5);
    assert_eq!(summary.segments_completed, 1);

    let log = handles.mux.borrow();
    let live: Vec<i64> = log.packets_to(LIVE_URL).iter().map(|p| p.0).collect();
    assert_eq!(live, vec![0, 100, 200, 300, 400]);
    let segment = log.opened().into_iter().find(|d| d.ends_with(".mp4")).unwrap();
    let pts: Vec<i64> = log.packets_to(&segment).iter().map(|p| p.0).collect();
    assert_eq!(pts, vec![0, 1, 2, 3, 4]);

    // The tail reaches the sinks before any of them is finalised
    let last_packet = log
        .events
        .iter()
        .rposition(|e| matches!(e, MuxEvent::Packet { .. }))
        .unwrap();
    let first_close = log
        .events
        .iter()
        .position(|e| matches!(e, MuxEvent::Close(_)))
        .unwrap();
    assert!(last_packet < first_close);
}
