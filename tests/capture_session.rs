mod common;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camcenter::{
    CaptureError, CaptureSession, FailureKind, InterlaceMode, MediaFormat, PixelFormat, Ratio,
    SessionState, VideoSubtype,
};
use common::{hd_yuy2, MemoryEncoders, ScriptedDevice};

const BITRATE: u32 = 2_000_000;

fn session_on(device: &Arc<ScriptedDevice>, encoders: &Arc<MemoryEncoders>) -> CaptureSession {
    CaptureSession::new(device.clone(), encoders.clone(), BITRATE).expect("session")
}

#[test]
fn selects_first_acceptable_format_in_device_order() {
    let device = ScriptedDevice::new(vec![
        MediaFormat::new(PixelFormat::Mjpeg, 1920, 1080, 30),
        MediaFormat::new(PixelFormat::Yuy2, 640, 360, 30),
        MediaFormat::new(PixelFormat::Yuy2, 1280, 720, 30),
        MediaFormat::new(PixelFormat::Nv12, 1920, 1080, 30),
    ]);
    let session = session_on(&device, &MemoryEncoders::new());
    assert_eq!(*session.format(), hd_yuy2());
    assert_eq!(device.selected(), Some(hd_yuy2()));
}

#[test]
fn compressed_only_device_is_rejected() {
    let device = ScriptedDevice::new(vec![
        MediaFormat::new(PixelFormat::Mjpeg, 1920, 1080, 30),
        MediaFormat::new(PixelFormat::H264, 1920, 1080, 30),
    ]);
    let err = CaptureSession::new(device.clone(), MemoryEncoders::new(), BITRATE)
        .err()
        .expect("negotiation must fail");
    assert_eq!(err.kind(), FailureKind::BadFormat);
    assert_eq!(device.selected(), None);
}

#[test]
fn timestamps_are_rebased_to_the_first_frame() {
    let device = ScriptedDevice::hd();
    let encoders = MemoryEncoders::new();
    let session = session_on(&device, &encoders);

    session.start(Path::new("clip.mp4")).unwrap();
    for ts in [1000, 1033, 1066] {
        device.send_frame(ts).unwrap();
    }
    assert_eq!(encoders.file(0).timestamps(), vec![0, 33, 66]);
    assert_eq!(session.frames_written().unwrap(), 3);
}

#[test]
fn each_delivery_rearms_exactly_once() {
    let device = ScriptedDevice::hd();
    let encoders = MemoryEncoders::new();
    let session = session_on(&device, &encoders);

    session.start(Path::new("clip.mp4")).unwrap();
    assert_eq!(device.pending(), 1);

    device.send_frame(10).unwrap();
    assert_eq!(device.pending(), 1);

    // an empty payload still keeps the pump running
    device.deliver(Ok(None)).unwrap();
    assert_eq!(device.pending(), 1);
    assert_eq!(device.requests(), 3);
    assert_eq!(encoders.file(0).timestamps(), vec![0]);
}

#[test]
fn second_start_is_an_invalid_command() {
    let device = ScriptedDevice::hd();
    let encoders = MemoryEncoders::new();
    let session = session_on(&device, &encoders);

    session.start(Path::new("a.mp4")).unwrap();
    let err = session.start(Path::new("b.mp4")).unwrap_err();
    assert_eq!(err.kind(), FailureKind::InvalidCommand);
    assert_eq!(encoders.files().len(), 1);
    assert_eq!(
        session.current_path().unwrap().as_deref(),
        Some(Path::new("a.mp4"))
    );
}

#[test]
fn stop_is_idempotent() {
    let device = ScriptedDevice::hd();
    let encoders = MemoryEncoders::new();
    let session = session_on(&device, &encoders);

    session.stop().unwrap();
    session.start(Path::new("clip.mp4")).unwrap();
    assert_eq!(session.state().unwrap(), SessionState::Active);
    session.stop().unwrap();
    session.stop().unwrap();
    assert_eq!(session.state().unwrap(), SessionState::Idle);
    assert!(encoders.file(0).is_finalized());
}

#[test]
fn delivery_after_stop_is_dropped_without_rearming() {
    let device = ScriptedDevice::hd();
    let encoders = MemoryEncoders::new();
    let session = session_on(&device, &encoders);

    session.start(Path::new("clip.mp4")).unwrap();
    device.send_frame(0).unwrap();
    session.stop().unwrap();

    device.send_frame(33).unwrap();
    assert_eq!(device.pending(), 0);
    assert_eq!(encoders.file(0).timestamps(), vec![0]);
    assert_eq!(encoders.file(0).writes_after_finalize(), 0);
}

#[test]
fn stale_request_from_previous_recording_is_ignored() {
    let device = ScriptedDevice::hd();
    let encoders = MemoryEncoders::new();
    let session = session_on(&device, &encoders);

    session.start(Path::new("first.mp4")).unwrap();
    session.stop().unwrap();
    session.start(Path::new("second.mp4")).unwrap();
    assert_eq!(device.pending(), 2);

    // the first request belongs to the closed file
    device.send_frame(500).unwrap();
    assert_eq!(device.pending(), 1);
    assert!(encoders.file(1).timestamps().is_empty());

    device.send_frame(700).unwrap();
    device.send_frame(733).unwrap();
    assert_eq!(encoders.file(1).timestamps(), vec![0, 33]);
    assert_eq!(device.pending(), 1);
}

#[test]
fn device_failure_stops_the_pump_and_is_parked() {
    let device = ScriptedDevice::hd();
    let encoders = MemoryEncoders::new();
    let session = session_on(&device, &encoders);

    session.start(Path::new("clip.mp4")).unwrap();
    let err = device
        .deliver(Err(CaptureError::platform("read frame", "device lost")))
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Platform);
    assert_eq!(device.pending(), 0);

    let parked = session.take_fault().unwrap().expect("fault parked");
    assert_eq!(parked.kind(), FailureKind::Platform);
    assert!(session.take_fault().unwrap().is_none());
}

#[test]
fn write_failure_is_fatal_to_the_pump() {
    let device = ScriptedDevice::hd();
    let encoders = MemoryEncoders::new();
    let session = session_on(&device, &encoders);

    session.start(Path::new("clip.mp4")).unwrap();
    device.send_frame(0).unwrap();
    encoders.fail_writes(true);

    let err = device.send_frame(33).unwrap_err();
    assert_eq!(err.kind(), FailureKind::Platform);
    assert_eq!(device.pending(), 0);
    assert!(session.take_fault().unwrap().is_some());

    // the file can still be closed cleanly
    session.stop().unwrap();
    assert!(encoders.file(0).is_finalized());
}

#[test]
fn rearm_failure_is_parked_after_the_frame_is_written() {
    let device = ScriptedDevice::hd();
    let encoders = MemoryEncoders::new();
    let session = session_on(&device, &encoders);

    session.start(Path::new("clip.mp4")).unwrap();
    device.fail_requests(true);
    let err = device.send_frame(42).unwrap_err();
    assert_eq!(err.kind(), FailureKind::Platform);
    assert_eq!(encoders.file(0).timestamps(), vec![0]);
    assert!(session.take_fault().unwrap().is_some());
}

#[test]
fn failed_first_request_rolls_back_the_recording() {
    let device = ScriptedDevice::hd();
    let encoders = MemoryEncoders::new();
    let session = session_on(&device, &encoders);

    device.fail_requests(true);
    let err = session.start(Path::new("clip.mp4")).unwrap_err();
    assert_eq!(err.kind(), FailureKind::Platform);
    assert_eq!(session.state().unwrap(), SessionState::Idle);
    assert!(encoders.file(0).is_finalized());

    device.fail_requests(false);
    session.start(Path::new("retry.mp4")).unwrap();
    assert_eq!(session.state().unwrap(), SessionState::Active);
}

#[test]
fn stop_never_overlaps_a_write() {
    let device = ScriptedDevice::hd();
    let encoders = MemoryEncoders::new();
    let session = session_on(&device, &encoders);
    session.start(Path::new("clip.mp4")).unwrap();

    let stopped = Arc::new(AtomicBool::new(false));
    let pump = {
        let device = Arc::clone(&device);
        let stopped = Arc::clone(&stopped);
        std::thread::spawn(move || {
            let mut ts = 0;
            loop {
                match device.deliver_if_pending(Ok(Some(common::frame(ts)))) {
                    Some(result) => result.unwrap(),
                    None if stopped.load(Ordering::SeqCst) => break,
                    None => std::thread::yield_now(),
                }
                ts += 33;
            }
        })
    };

    std::thread::sleep(Duration::from_millis(20));
    session.stop().unwrap();
    stopped.store(true, Ordering::SeqCst);
    pump.join().unwrap();

    let file = encoders.file(0);
    assert!(file.is_finalized());
    assert_eq!(file.writes_after_finalize(), 0);
    assert_eq!(device.pending(), 0);
}

#[test]
fn stream_description_copies_format_attributes() {
    let mut format = MediaFormat::new(PixelFormat::Nv12, 1920, 1080, 25);
    format.pixel_aspect = Ratio::new(4, 3);
    format.interlace = InterlaceMode::UpperFieldFirst;
    let device = ScriptedDevice::new(vec![format]);
    let encoders = MemoryEncoders::new();
    let session = session_on(&device, &encoders);

    session.start(Path::new("clip.mp4")).unwrap();
    let streams = encoders.file(0).streams;
    for side in [streams.input, streams.output] {
        assert_eq!((side.width, side.height), (1920, 1080));
        assert_eq!(side.frame_rate, Ratio::new(25, 1));
        assert_eq!(side.pixel_aspect, Ratio::new(4, 3));
        assert_eq!(side.interlace, InterlaceMode::UpperFieldFirst);
    }
    assert_eq!(streams.input.subtype, VideoSubtype::Raw(PixelFormat::Nv12));
    assert_eq!(streams.output.subtype, VideoSubtype::H264);
    assert_eq!(streams.output.average_bitrate, Some(BITRATE));
}

#[test]
fn fault_from_a_closed_recording_does_not_reach_the_next_one() {
    let device = ScriptedDevice::hd();
    let encoders = MemoryEncoders::new();
    let session = session_on(&device, &encoders);

    session.start(Path::new("first.mp4")).unwrap();
    encoders.fail_writes(true);
    assert!(device.send_frame(0).is_err());
    session.stop().unwrap();

    encoders.fail_writes(false);
    session.start(Path::new("second.mp4")).unwrap();
    device.send_frame(100).unwrap();
    assert!(session.take_fault().unwrap().is_none());
    assert_eq!(encoders.file(1).timestamps(), vec![0]);
}

#[test]
fn rearm_failure_after_a_concurrent_stop_is_not_parked() {
    let device = ScriptedDevice::hd();
    let encoders = MemoryEncoders::new();
    let session = Arc::new(session_on(&device, &encoders));

    session.start(Path::new("first.mp4")).unwrap();
    device.fail_requests(true);
    let stopper = Arc::clone(&session);
    device.before_next_request(move || stopper.stop().unwrap());
    assert!(device.send_frame(0).is_err());
    assert_eq!(session.state().unwrap(), SessionState::Idle);

    device.fail_requests(false);
    session.start(Path::new("second.mp4")).unwrap();
    assert!(session.take_fault().unwrap().is_none());
}
