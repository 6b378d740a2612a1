//! Encoder/muxer seam.
//!
//! The capture session hands the encoder a description of its input (the raw
//! negotiated format) and output (H.264 at the configured bitrate), pushes
//! timestamped frames, and finalizes on stop.

use std::path::Path;

use crate::device::Frame;
use crate::error::Result;
use crate::format::{InterlaceMode, MediaFormat, PixelFormat, Ratio};

pub mod ffmpeg;

pub use ffmpeg::FfmpegEncoderFactory;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoSubtype {
    Raw(PixelFormat),
    H264,
}

/// Video stream attributes as seen by the encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoDescription {
    pub subtype: VideoSubtype,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Ratio,
    pub pixel_aspect: Ratio,
    pub interlace: InterlaceMode,
    /// Target average bitrate; only set on compressed streams.
    pub average_bitrate: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamDescription {
    pub input: VideoDescription,
    pub output: VideoDescription,
}

/// Describes the encoder's input and output streams for `format`.
///
/// Frame size, frame rate, pixel aspect ratio and interlace mode are copied from
/// the negotiated format into both sides; only codec and bitrate differ.
pub fn describe_streams(format: &MediaFormat, average_bitrate: u32) -> StreamDescription {
    let input = VideoDescription {
        subtype: VideoSubtype::Raw(format.subtype),
        width: format.width,
        height: format.height,
        frame_rate: format.frame_rate,
        pixel_aspect: format.pixel_aspect,
        interlace: format.interlace,
        average_bitrate: None,
    };
    let output = VideoDescription {
        subtype: VideoSubtype::H264,
        average_bitrate: Some(average_bitrate),
        ..input
    };
    StreamDescription { input, output }
}

/// One open output file.
pub trait VideoEncoder: Send {
    /// Writes one frame whose timestamp is relative to the first frame of the file.
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flushes and closes the output file.
    fn finalize(self: Box<Self>) -> Result<()>;
}

pub trait EncoderFactory: Send + Sync {
    /// Creates the output file at `path` and begins writing.
    fn create(&self, path: &Path, streams: &StreamDescription) -> Result<Box<dyn VideoEncoder>>;
}
