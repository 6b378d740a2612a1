//! Shared fixtures: a hand-driven capture device, an in-memory encoder, and a
//! manual clock.

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camcenter::{
    CaptureDevice, CaptureError, Clock, Delivery, EncoderFactory, Frame, FrameCallback,
    MediaFormat, PixelFormat, Result, StreamDescription, VideoEncoder,
};

pub fn hd_yuy2() -> MediaFormat {
    MediaFormat::new(PixelFormat::Yuy2, 1280, 720, 30)
}

pub fn frame(timestamp: i64) -> Frame {
    Frame {
        timestamp,
        data: vec![0x80; 16],
    }
}

// ----------------------------------------------------------------------------
// Scripted device: requests queue up until the test answers them.
// ----------------------------------------------------------------------------

pub struct ScriptedDevice {
    formats: Vec<MediaFormat>,
    selected: Mutex<Option<MediaFormat>>,
    pending: Mutex<VecDeque<Arc<dyn FrameCallback>>>,
    requests: AtomicUsize,
    fail_requests: AtomicBool,
    before_request: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ScriptedDevice {
    pub fn new(formats: Vec<MediaFormat>) -> Arc<Self> {
        Arc::new(Self {
            formats,
            selected: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
            requests: AtomicUsize::new(0),
            fail_requests: AtomicBool::new(false),
            before_request: Mutex::new(None),
        })
    }

    /// Device offering a single 720p YUY2 format.
    pub fn hd() -> Arc<Self> {
        Self::new(vec![hd_yuy2()])
    }

    pub fn selected(&self) -> Option<MediaFormat> {
        *self.selected.lock().unwrap()
    }

    /// Requests issued and not yet answered.
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Requests accepted over the device's lifetime.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::SeqCst);
    }

    /// Runs `hook` at the start of the next `request_frame` call.
    pub fn before_next_request(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_request.lock().unwrap() = Some(Box::new(hook));
    }

    /// Answers the oldest pending request.
    pub fn deliver(&self, delivery: Delivery) -> Result<()> {
        let callback = self
            .pending
            .lock()
            .unwrap()
            .pop_front()
            .expect("no pending frame request");
        callback.on_frame(delivery)
    }

    /// Answers the oldest pending request, if there is one.
    pub fn deliver_if_pending(&self, delivery: Delivery) -> Option<Result<()>> {
        let callback = self.pending.lock().unwrap().pop_front()?;
        Some(callback.on_frame(delivery))
    }

    pub fn send_frame(&self, timestamp: i64) -> Result<()> {
        self.deliver(Ok(Some(frame(timestamp))))
    }
}

impl CaptureDevice for ScriptedDevice {
    fn name(&self) -> &str {
        "scripted://camera"
    }

    fn native_formats(&self) -> Result<Vec<MediaFormat>> {
        Ok(self.formats.clone())
    }

    fn select_format(&self, format: &MediaFormat) -> Result<()> {
        *self.selected.lock().unwrap() = Some(*format);
        Ok(())
    }

    fn request_frame(&self, callback: Arc<dyn FrameCallback>) -> Result<()> {
        let hook = self.before_request.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(CaptureError::platform("request frame", "device unplugged"));
        }
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().push_back(callback);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// In-memory encoder: records what a real muxer would have been asked to do.
// ----------------------------------------------------------------------------

pub struct MemoryFile {
    pub path: PathBuf,
    pub streams: StreamDescription,
    timestamps: Mutex<Vec<i64>>,
    finalized: AtomicBool,
    writes_after_finalize: AtomicUsize,
}

impl MemoryFile {
    pub fn timestamps(&self) -> Vec<i64> {
        self.timestamps.lock().unwrap().clone()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    pub fn writes_after_finalize(&self) -> usize {
        self.writes_after_finalize.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MemoryEncoders {
    files: Mutex<Vec<Arc<MemoryFile>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryEncoders {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn files(&self) -> Vec<Arc<MemoryFile>> {
        self.files.lock().unwrap().clone()
    }

    pub fn file(&self, index: usize) -> Arc<MemoryFile> {
        Arc::clone(&self.files.lock().unwrap()[index])
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl EncoderFactory for MemoryEncoders {
    fn create(&self, path: &Path, streams: &StreamDescription) -> Result<Box<dyn VideoEncoder>> {
        let file = Arc::new(MemoryFile {
            path: path.to_path_buf(),
            streams: *streams,
            timestamps: Mutex::new(Vec::new()),
            finalized: AtomicBool::new(false),
            writes_after_finalize: AtomicUsize::new(0),
        });
        self.files.lock().unwrap().push(Arc::clone(&file));
        Ok(Box::new(MemoryEncoder {
            file,
            fail_writes: Arc::clone(&self.fail_writes),
        }))
    }
}

struct MemoryEncoder {
    file: Arc<MemoryFile>,
    fail_writes: Arc<AtomicBool>,
}

impl VideoEncoder for MemoryEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.file.is_finalized() {
            self.file.writes_after_finalize.fetch_add(1, Ordering::SeqCst);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CaptureError::platform("write frame", "disk full"));
        }
        self.file.timestamps.lock().unwrap().push(frame.timestamp);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<()> {
        assert!(
            !self.file.finalized.swap(true, Ordering::SeqCst),
            "finalized twice"
        );
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Manual clock: time only moves when the test (or a grace sleep) moves it.
// ----------------------------------------------------------------------------

pub struct ManualClock {
    start: NaiveDateTime,
    ticks: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Self::starting_at(
            NaiveDate::from_ymd_opt(2015, 3, 7)
                .unwrap()
                .and_hms_opt(14, 2, 9)
                .unwrap(),
        )
    }

    pub fn starting_at(start: NaiveDateTime) -> Arc<Self> {
        Arc::new(Self {
            start,
            ticks: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.ticks.lock().unwrap() += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn ticks(&self) -> Duration {
        *self.ticks.lock().unwrap()
    }

    fn local_now(&self) -> NaiveDateTime {
        self.start + chrono::Duration::from_std(self.ticks()).unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
