//! CamCenter capture core
//!
//! Continuously records a camera into fixed-length H.264/MP4 files and keeps
//! only the most recent ones.
//!
//! # Architecture
//!
//! Three independent timing sources meet around one mutable resource, the
//! active encoder:
//!
//! 1. **Device delivery**: frames arrive asynchronously on the device's thread.
//!    The capture session writes each one and re-arms exactly one new request.
//! 2. **Timer**: the caller invokes `CaptureManager::on_tick` about once a second;
//!    the rotation manager cuts a new file once the current one is too long.
//! 3. **Retention**: a dedicated thread wakes every clean interval and deletes
//!    the oldest files beyond the keep count.
//!
//! # Module Structure
//!
//! - `config`: `Settings` schema, loading and validation
//! - `format`: native format description and first-match negotiation
//! - `device`: capture device seam (synthetic, V4L2)
//! - `encode`: encoder/muxer seam (ffmpeg)
//! - `session`: the device-to-encoder frame pump
//! - `rotation`: file rotation and naming
//! - `retention`: directory sweep and background sweeper
//! - `manager`: composition root

pub mod config;
pub mod device;
pub mod encode;
pub mod error;
pub mod format;
pub mod manager;
pub mod retention;
pub mod rotation;
pub mod session;

pub use config::{Settings, MIN_AVERAGE_BITRATE, MIN_SECONDS_PER_FILE};
pub use device::{
    open_capture_device, CaptureDevice, Delivery, Frame, FrameCallback, SyntheticConfig,
    SyntheticDevice,
};
pub use encode::{
    describe_streams, EncoderFactory, FfmpegEncoderFactory, StreamDescription, VideoDescription,
    VideoEncoder, VideoSubtype,
};
pub use error::{CaptureError, FailureKind, Result};
pub use format::{negotiate, InterlaceMode, MediaFormat, PixelFormat, Ratio};
pub use manager::CaptureManager;
pub use retention::{sweep, FileCleaner, FileEntry, FileRecord, FsCleaner, RetentionSweeper, SweepReport};
pub use rotation::{file_name_for, Clock, RotationManager, SystemClock};
pub use session::{CaptureSession, SessionState};
