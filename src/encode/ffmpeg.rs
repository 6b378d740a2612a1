//! H.264/MP4 encoder backed by an `ffmpeg` child process.
//!
//! Raw frames are streamed to the child's stdin as `rawvideo` at the negotiated
//! frame rate; ffmpeg encodes with libx264 and muxes into the target file.
//! Finalizing closes stdin and waits for the muxer to write the trailer.
//!
//! A raw pipe carries no timestamps, so each frame lands in the output slot its
//! rebased timestamp falls in. Slots skipped by dropped frames are filled by
//! repeating the frame; a frame whose slot is already written is discarded.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use super::{EncoderFactory, StreamDescription, VideoEncoder, VideoSubtype};
use crate::device::Frame;
use crate::error::{CaptureError, Result};
use crate::format::{InterlaceMode, PixelFormat, Ratio};

const DEFAULT_PROGRAM: &str = "ffmpeg";
/// Upper bound on repeated frames written for one delivery.
const MAX_FILL_FRAMES: u64 = 300;

pub struct FfmpegEncoderFactory {
    program: PathBuf,
}

impl FfmpegEncoderFactory {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegEncoderFactory {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn create(&self, path: &Path, streams: &StreamDescription) -> Result<Box<dyn VideoEncoder>> {
        let args = ffmpeg_args(path, streams)?;
        let VideoSubtype::Raw(pixel) = streams.input.subtype else {
            return Err(CaptureError::internal("encoder input must be raw video"));
        };
        let frame_bytes = (streams.input.width as usize
            * streams.input.height as usize
            * pixel.bits_per_pixel() as usize)
            / 8;

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                CaptureError::platform(format!("spawn {}", self.program.display()), e)
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CaptureError::internal("ffmpeg stdin was not piped"))?;

        log::debug!("ffmpeg encoder: {} {}", self.program.display(), args.join(" "));
        Ok(Box::new(FfmpegEncoder {
            path: path.to_path_buf(),
            child,
            stdin: Some(stdin),
            frame_bytes,
            frame_rate: streams.input.frame_rate,
            frames: 0,
        }))
    }
}

pub struct FfmpegEncoder {
    path: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    frame_bytes: usize,
    frame_rate: Ratio,
    /// Output slots written so far.
    frames: u64,
}

impl VideoEncoder for FfmpegEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.data.len() < self.frame_bytes {
            return Err(CaptureError::platform(
                format!("write frame to {}", self.path.display()),
                format!(
                    "short frame: {} of {} bytes",
                    frame.data.len(),
                    self.frame_bytes
                ),
            ));
        }
        let copies = copies_for(frame.timestamp, self.frames, self.frame_rate);
        if copies == 0 {
            log::trace!("ffmpeg encoder: slot already filled at {}us", frame.timestamp);
            return Ok(());
        }
        if copies > 1 {
            log::debug!(
                "ffmpeg encoder: filling {} dropped frame(s) in {}",
                copies - 1,
                self.path.display()
            );
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| CaptureError::internal("encoder already finalized"))?;
        let payload = &frame.data[..self.frame_bytes];
        for _ in 0..copies {
            stdin.write_all(payload).map_err(|e| {
                CaptureError::platform(format!("write frame to {}", self.path.display()), e)
            })?;
            self.frames += 1;
        }
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<()> {
        // closing stdin signals end of stream
        drop(self.stdin.take());
        let status = self.child.wait().map_err(|e| {
            CaptureError::platform(format!("finalize {}", self.path.display()), e)
        })?;
        if !status.success() {
            return Err(CaptureError::platform(
                format!("finalize {}", self.path.display()),
                format!("ffmpeg exited with {}", status),
            ));
        }
        log::info!(
            "ffmpeg encoder: finalized {} ({} frames)",
            self.path.display(),
            self.frames
        );
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Output slot index of a frame `timestamp_us` after the start of the file.
pub fn frame_slot(timestamp_us: i64, frame_rate: Ratio) -> Option<u64> {
    if frame_rate.numerator == 0 || frame_rate.denominator == 0 {
        return None;
    }
    let micros = timestamp_us.max(0) as u128;
    let scaled = micros * frame_rate.numerator as u128;
    let per_slot = 1_000_000u128 * frame_rate.denominator as u128;
    // nearest slot, so jitter around the nominal interval does not skip
    Some(((scaled + per_slot / 2) / per_slot).min(u64::MAX as u128) as u64)
}

/// Times the frame at `timestamp_us` is written, given `written` slots so far.
pub fn copies_for(timestamp_us: i64, written: u64, frame_rate: Ratio) -> u64 {
    match frame_slot(timestamp_us, frame_rate) {
        Some(slot) => (slot + 1).saturating_sub(written).min(MAX_FILL_FRAMES),
        None => 1,
    }
}

/// Command line for encoding `streams` into `path`.
pub fn ffmpeg_args(path: &Path, streams: &StreamDescription) -> Result<Vec<String>> {
    let input = &streams.input;
    let output = &streams.output;
    let pix_fmt = match input.subtype {
        VideoSubtype::Raw(PixelFormat::Yuy2) => "yuyv422",
        VideoSubtype::Raw(PixelFormat::Nv12) => "nv12",
        _ => return Err(CaptureError::bad_format()),
    };
    let bitrate = output
        .average_bitrate
        .ok_or_else(|| CaptureError::internal("output stream has no target bitrate"))?;

    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-f",
        "rawvideo",
        "-pix_fmt",
        pix_fmt,
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect();
    args.extend([
        "-video_size".to_string(),
        format!("{}x{}", input.width, input.height),
        "-framerate".to_string(),
        format!("{}/{}", input.frame_rate.numerator, input.frame_rate.denominator),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-an".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-b:v".to_string(),
        bitrate.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-vf".to_string(),
        format!(
            "setsar={}/{}",
            output.pixel_aspect.numerator, output.pixel_aspect.denominator
        ),
    ]);
    match output.interlace {
        InterlaceMode::UpperFieldFirst | InterlaceMode::LowerFieldFirst => {
            let top = if output.interlace == InterlaceMode::UpperFieldFirst {
                "1"
            } else {
                "0"
            };
            args.extend(["-flags", "+ildct+ilme", "-top", top].map(String::from));
        }
        InterlaceMode::Progressive | InterlaceMode::Mixed => {}
    }
    args.extend(["-movflags", "+faststart", "-f", "mp4"].map(String::from));
    args.push(path.display().to_string());
    Ok(args)
}
