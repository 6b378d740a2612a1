//! Synthetic capture device.
//!
//! Serves `stub://` selectors. It advertises a fixed format list, paces delivery
//! at the selected frame rate on a dedicated thread, and stamps frames from a
//! device clock that does not start at zero.

use crossbeam::channel::{self, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{CaptureDevice, Frame, FrameCallback};
use crate::error::{CaptureError, Result};
use crate::format::{MediaFormat, PixelFormat};

const FALLBACK_FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    /// Advertised native formats, in order.
    pub formats: Vec<MediaFormat>,
    /// Device clock reading (microseconds) when the device is opened.
    pub clock_origin_us: i64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://camera".to_string(),
            formats: vec![
                MediaFormat::new(PixelFormat::Mjpeg, 1920, 1080, 30),
                MediaFormat::new(PixelFormat::Yuy2, 640, 360, 30),
                MediaFormat::new(PixelFormat::Yuy2, 1280, 720, 30),
                MediaFormat::new(PixelFormat::Nv12, 1920, 1080, 30),
            ],
            clock_origin_us: 5_000_000,
        }
    }
}

struct PendingRequest {
    callback: Arc<dyn FrameCallback>,
    format: MediaFormat,
}

pub struct SyntheticDevice {
    config: SyntheticConfig,
    selected: Mutex<Option<MediaFormat>>,
    requests: Sender<PendingRequest>,
    delivered: Arc<AtomicU64>,
}

impl SyntheticDevice {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        let (requests, pending) = channel::unbounded();
        let delivered = Arc::new(AtomicU64::new(0));
        let thread_delivered = Arc::clone(&delivered);
        let clock_origin_us = config.clock_origin_us;
        std::thread::Builder::new()
            .name("synthetic-capture".to_string())
            .spawn(move || run_delivery(pending, clock_origin_us, thread_delivered))
            .map_err(|e| CaptureError::platform("spawn synthetic delivery thread", e))?;
        Ok(Self {
            config,
            selected: Mutex::new(None),
            requests,
            delivered,
        })
    }

    /// Frames handed to callbacks so far.
    pub fn frames_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl CaptureDevice for SyntheticDevice {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn native_formats(&self) -> Result<Vec<MediaFormat>> {
        Ok(self.config.formats.clone())
    }

    fn select_format(&self, format: &MediaFormat) -> Result<()> {
        if !self.config.formats.contains(format) {
            return Err(CaptureError::platform(
                "select synthetic format",
                format!("{}x{} {:?} is not advertised", format.width, format.height, format.subtype),
            ));
        }
        let mut selected = self
            .selected
            .lock()
            .map_err(|_| CaptureError::internal("synthetic format lock poisoned"))?;
        *selected = Some(*format);
        Ok(())
    }

    fn request_frame(&self, callback: Arc<dyn FrameCallback>) -> Result<()> {
        let selected = *self
            .selected
            .lock()
            .map_err(|_| CaptureError::internal("synthetic format lock poisoned"))?;
        let format = selected
            .ok_or_else(|| CaptureError::invalid_command("frame requested before format selection"))?;
        self.requests
            .send(PendingRequest { callback, format })
            .map_err(|_| {
                CaptureError::platform("request synthetic frame", "delivery thread has exited")
            })
    }
}

fn run_delivery(pending: Receiver<PendingRequest>, clock_origin_us: i64, delivered: Arc<AtomicU64>) {
    let epoch = Instant::now();
    let mut next_due = epoch;
    let mut frame_count: u64 = 0;

    for request in pending.iter() {
        let now = Instant::now();
        if next_due > now {
            std::thread::sleep(next_due - now);
        }
        next_due = next_due.max(now) + frame_interval(&request.format);

        frame_count += 1;
        let frame = Frame {
            timestamp: clock_origin_us + epoch.elapsed().as_micros() as i64,
            data: synthetic_pixels(&request.format, frame_count),
        };
        delivered.fetch_add(1, Ordering::Relaxed);

        if let Err(err) = request.callback.on_frame(Ok(Some(frame))) {
            log::warn!("synthetic capture: delivery chain ended: {}", err);
        }
    }
    log::debug!("synthetic capture: delivery thread exiting after {} frames", frame_count);
}

fn frame_interval(format: &MediaFormat) -> Duration {
    let rate = format.frame_rate;
    if rate.numerator == 0 || rate.denominator == 0 {
        return FALLBACK_FRAME_INTERVAL;
    }
    Duration::from_secs_f64(rate.denominator as f64 / rate.numerator as f64)
}

/// Moving diagonal pattern so consecutive frames differ.
fn synthetic_pixels(format: &MediaFormat, frame_count: u64) -> Vec<u8> {
    let row_bytes = (format.width as usize * format.bits_per_pixel as usize) / 8;
    let mut pixels = vec![0u8; format.frame_bytes()];
    if row_bytes == 0 {
        return pixels;
    }
    for (row, line) in pixels.chunks_mut(row_bytes).enumerate() {
        let shade = ((row as u64 + frame_count) % 256) as u8;
        line.fill(shade);
    }
    pixels
}
