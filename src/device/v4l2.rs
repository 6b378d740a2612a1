//! V4L2 capture device.
//!
//! Formats are enumerated from the device node on demand, in driver order
//! (pixel format, then discrete frame size, then discrete frame interval).
//! Selecting a format opens the node, programs the format and frame rate, and
//! starts a delivery thread that owns the mmap stream. Each frame request is
//! answered from that thread with one dequeued buffer.

use crossbeam::channel::{self, Receiver, Sender};
use ouroboros::self_referencing;
use std::sync::{Arc, Mutex};

use super::{CaptureDevice, Frame, FrameCallback};
use crate::error::{CaptureError, Result};
use crate::format::{InterlaceMode, MediaFormat, PixelFormat, Ratio};

const STREAM_BUFFERS: u32 = 4;

/// First capture node reported by the V4L2 context, if any.
pub fn first_device_path() -> Option<String> {
    v4l::context::enum_devices()
        .into_iter()
        .next()
        .map(|node| node.path().display().to_string())
}

pub struct V4l2Device {
    path: String,
    requests: Mutex<Option<Sender<Arc<dyn FrameCallback>>>>,
}

#[self_referencing]
struct StreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Device {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            requests: Mutex::new(None),
        }
    }

    fn open(&self) -> Result<v4l::Device> {
        v4l::Device::with_path(&self.path)
            .map_err(|e| CaptureError::platform(format!("open v4l2 device {}", self.path), e))
    }
}

impl CaptureDevice for V4l2Device {
    fn name(&self) -> &str {
        &self.path
    }

    fn native_formats(&self) -> Result<Vec<MediaFormat>> {
        use v4l::frameinterval::FrameIntervalEnum;
        use v4l::framesize::FrameSizeEnum;
        use v4l::video::Capture;

        let device = self.open()?;
        let descriptions = device
            .enum_formats()
            .map_err(|e| CaptureError::platform("enumerate v4l2 formats", e))?;

        let mut formats = Vec::new();
        for description in descriptions {
            let subtype = PixelFormat::from_fourcc(description.fourcc.repr);
            let sizes = device
                .enum_framesizes(description.fourcc)
                .map_err(|e| CaptureError::platform("enumerate v4l2 frame sizes", e))?;
            for size in sizes {
                let FrameSizeEnum::Discrete(discrete) = size.size else {
                    continue;
                };
                let intervals = device
                    .enum_frameintervals(description.fourcc, discrete.width, discrete.height)
                    .map_err(|e| CaptureError::platform("enumerate v4l2 frame intervals", e))?;
                for interval in intervals {
                    let FrameIntervalEnum::Discrete(fraction) = interval.interval else {
                        continue;
                    };
                    formats.push(MediaFormat {
                        subtype,
                        width: discrete.width,
                        height: discrete.height,
                        bits_per_pixel: subtype.bits_per_pixel(),
                        // frame interval is seconds per frame; invert for a rate
                        frame_rate: Ratio::new(fraction.denominator, fraction.numerator),
                        pixel_aspect: Ratio::SQUARE,
                        interlace: InterlaceMode::Progressive,
                    });
                }
            }
        }
        Ok(formats)
    }

    fn select_format(&self, format: &MediaFormat) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = self.open()?;
        let mut active = device
            .format()
            .map_err(|e| CaptureError::platform("read v4l2 format", e))?;
        active.width = format.width;
        active.height = format.height;
        active.fourcc = v4l::FourCC::new(&format.subtype.fourcc());
        let applied = device
            .set_format(&active)
            .map_err(|e| CaptureError::platform("set v4l2 format", e))?;
        if applied.width != format.width
            || applied.height != format.height
            || applied.fourcc.repr != format.subtype.fourcc()
        {
            return Err(CaptureError::platform(
                "set v4l2 format",
                format!(
                    "driver substituted {}x{} for {}x{}",
                    applied.width, applied.height, format.width, format.height
                ),
            ));
        }

        if format.frame_rate.denominator == 1 && format.frame_rate.numerator > 0 {
            let params = v4l::video::capture::Parameters::with_fps(format.frame_rate.numerator);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Device: failed to set fps on {}: {}", self.path, err);
            }
        }

        let state = StreamStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|e| CaptureError::platform("create v4l2 buffer stream", e))
            },
        }
        .try_build()?;

        let (requests, pending) = channel::unbounded();
        let path = self.path.clone();
        std::thread::Builder::new()
            .name("v4l2-capture".to_string())
            .spawn(move || run_delivery(path, state, pending))
            .map_err(|e| CaptureError::platform("spawn v4l2 delivery thread", e))?;

        let mut slot = self
            .requests
            .lock()
            .map_err(|_| CaptureError::internal("v4l2 request lock poisoned"))?;
        // replacing the sender ends the previous delivery thread
        *slot = Some(requests);

        log::info!(
            "V4l2Device: streaming {} ({}x{} {:?})",
            self.path,
            format.width,
            format.height,
            format.subtype
        );
        Ok(())
    }

    fn request_frame(&self, callback: Arc<dyn FrameCallback>) -> Result<()> {
        let slot = self
            .requests
            .lock()
            .map_err(|_| CaptureError::internal("v4l2 request lock poisoned"))?;
        let requests = slot
            .as_ref()
            .ok_or_else(|| CaptureError::invalid_command("frame requested before format selection"))?;
        requests.send(callback).map_err(|_| {
            CaptureError::platform("request v4l2 frame", "delivery thread has exited")
        })
    }
}

fn run_delivery(path: String, mut state: StreamState, pending: Receiver<Arc<dyn FrameCallback>>) {
    use v4l::io::traits::CaptureStream;

    for callback in pending.iter() {
        let delivery = state
            .with_mut(|fields| {
                fields.stream.next().map(|(buf, meta)| Frame {
                    timestamp: meta.timestamp.sec * 1_000_000 + meta.timestamp.usec,
                    data: buf[..(meta.bytesused as usize).min(buf.len())].to_vec(),
                })
            })
            .map(Some)
            .map_err(|e| CaptureError::platform(format!("capture v4l2 frame from {}", path), e));

        if let Err(err) = callback.on_frame(delivery) {
            log::warn!("V4l2Device: delivery chain on {} ended: {}", path, err);
        }
    }
    log::debug!("V4l2Device: delivery thread for {} exiting", path);
}
