//! Capture devices.
//!
//! A device advertises native formats, accepts one selected format, and delivers
//! frames asynchronously: every `request_frame` call is answered by exactly one
//! `FrameCallback::on_frame` invocation, made from the device's own delivery
//! thread. Delivery is serialized per device.
//!
//! Backends:
//! - `stub://...` synthetic camera (always available, used by tests and demos)
//! - V4L2 device nodes (feature: ingest-v4l2)

use std::sync::Arc;

use crate::error::{CaptureError, Result};
use crate::format::MediaFormat;

pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use synthetic::{SyntheticConfig, SyntheticDevice};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Device;

/// One captured frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Presentation time in microseconds on the device clock.
    pub timestamp: i64,
    pub data: Vec<u8>,
}

/// Outcome of one frame request: a device failure, an empty tick, or a frame.
pub type Delivery = Result<Option<Frame>>;

/// Receiver of asynchronous frame deliveries.
pub trait FrameCallback: Send + Sync {
    /// Handles one delivery. An `Err` return ends delivery for this request chain.
    fn on_frame(self: Arc<Self>, delivery: Delivery) -> Result<()>;
}

pub trait CaptureDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Native formats in device-reported order.
    fn native_formats(&self) -> Result<Vec<MediaFormat>>;

    /// Makes `format` the active output format.
    fn select_format(&self, format: &MediaFormat) -> Result<()>;

    /// Queues one frame request answered later through `callback`.
    ///
    /// Implementations must not invoke `callback` from inside this call.
    fn request_frame(&self, callback: Arc<dyn FrameCallback>) -> Result<()>;
}

/// Obtains a capture-device handle for `selector`.
pub fn open_capture_device(selector: &str) -> Result<Arc<dyn CaptureDevice>> {
    let selector = selector.trim();
    if selector.starts_with("stub://") {
        let config = SyntheticConfig {
            name: selector.to_string(),
            ..SyntheticConfig::default()
        };
        let device = SyntheticDevice::new(config)?;
        log::info!("capture device: {} (synthetic)", device.name());
        return Ok(Arc::new(device));
    }
    open_hardware_device(selector)
}

#[cfg(feature = "ingest-v4l2")]
fn open_hardware_device(selector: &str) -> Result<Arc<dyn CaptureDevice>> {
    let path = if selector.is_empty() || selector == "auto" {
        v4l2::first_device_path().ok_or_else(|| CaptureError::no_capture_device())?
    } else {
        selector.to_string()
    };
    if !std::path::Path::new(&path).exists() {
        return Err(CaptureError::no_capture_device());
    }
    let device = V4l2Device::new(path);
    log::info!("capture device: {}", device.name());
    Ok(Arc::new(device))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_hardware_device(selector: &str) -> Result<Arc<dyn CaptureDevice>> {
    log::warn!(
        "capture device '{}' requires the ingest-v4l2 feature",
        selector
    );
    Err(CaptureError::no_capture_device())
}
