//! Capture format description and negotiation.
//!
//! A capture device advertises its native formats in a fixed order. The pipeline
//! takes the *first* advertised format it can encode from and holds it for the
//! lifetime of the capture session; it never searches for a "better" one.

use crate::error::{CaptureError, Result};

/// Frames narrower than this are not worth recording.
pub const MIN_CAPTURE_WIDTH: u32 = 600;
/// Frames shorter than this are not worth recording.
pub const MIN_CAPTURE_HEIGHT: u32 = 400;
/// Bit depth the selected format must exceed.
pub const MIN_BITS_PER_PIXEL: u32 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 4:2:2 (`YUYV`).
    Yuy2,
    /// Planar 4:2:0 with interleaved chroma (`NV12`).
    Nv12,
    Rgb24,
    Mjpeg,
    H264,
    Other([u8; 4]),
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: [u8; 4]) -> Self {
        match &fourcc {
            b"YUYV" | b"YUY2" => PixelFormat::Yuy2,
            b"NV12" => PixelFormat::Nv12,
            b"RGB3" => PixelFormat::Rgb24,
            b"MJPG" => PixelFormat::Mjpeg,
            b"H264" => PixelFormat::H264,
            _ => PixelFormat::Other(fourcc),
        }
    }

    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Yuy2 => *b"YUYV",
            PixelFormat::Nv12 => *b"NV12",
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Mjpeg => *b"MJPG",
            PixelFormat::H264 => *b"H264",
            PixelFormat::Other(fourcc) => fourcc,
        }
    }

    /// Nominal bits per pixel; 0 for compressed formats.
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Yuy2 => 16,
            PixelFormat::Nv12 => 12,
            PixelFormat::Rgb24 => 24,
            PixelFormat::Mjpeg | PixelFormat::H264 | PixelFormat::Other(_) => 0,
        }
    }

    /// Raw formats the encoder accepts as input.
    pub fn is_encodable_raw(self) -> bool {
        matches!(self, PixelFormat::Yuy2 | PixelFormat::Nv12)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ratio {
    pub numerator: u32,
    pub denominator: u32,
}

impl Ratio {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub const SQUARE: Ratio = Ratio::new(1, 1);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InterlaceMode {
    Progressive,
    UpperFieldFirst,
    LowerFieldFirst,
    Mixed,
}

/// One native output format of a capture device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MediaFormat {
    pub subtype: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub frame_rate: Ratio,
    pub pixel_aspect: Ratio,
    pub interlace: InterlaceMode,
}

impl MediaFormat {
    /// Progressive, square-pixel format with the subtype's nominal bit depth.
    pub fn new(subtype: PixelFormat, width: u32, height: u32, fps: u32) -> Self {
        Self {
            subtype,
            width,
            height,
            bits_per_pixel: subtype.bits_per_pixel(),
            frame_rate: Ratio::new(fps, 1),
            pixel_aspect: Ratio::SQUARE,
            interlace: InterlaceMode::Progressive,
        }
    }

    pub fn is_acceptable(&self) -> bool {
        self.subtype.is_encodable_raw()
            && self.width > MIN_CAPTURE_WIDTH
            && self.height > MIN_CAPTURE_HEIGHT
            && self.bits_per_pixel > MIN_BITS_PER_PIXEL
    }

    /// Payload size of one frame in bytes.
    pub fn frame_bytes(&self) -> usize {
        (self.width as usize * self.height as usize * self.bits_per_pixel as usize) / 8
    }
}

/// Returns the first acceptable format in device order.
pub fn negotiate<I>(candidates: I) -> Result<MediaFormat>
where
    I: IntoIterator<Item = MediaFormat>,
{
    candidates
        .into_iter()
        .find(MediaFormat::is_acceptable)
        .ok_or_else(|| CaptureError::bad_format())
}
