//! Capture session: one device-to-encoder pipeline.
//!
//! The session negotiates its format once, at construction. Each `start` opens
//! an encoder and arms the frame pump with a single outstanding request; every
//! delivery writes (at most) one frame and re-arms exactly once, until `stop`
//! removes the encoder.
//!
//! The active recording sits behind one `Mutex` shared by the pump and `stop`:
//! a write never overlaps finalization, and nothing is written after it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::{CaptureDevice, Delivery, Frame, FrameCallback};
use crate::encode::{describe_streams, EncoderFactory, VideoEncoder};
use crate::error::{CaptureError, Result};
use crate::format::{negotiate, MediaFormat};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
}

/// Encoder state for one output file.
struct Recording {
    generation: u64,
    path: PathBuf,
    encoder: Box<dyn VideoEncoder>,
    base_timestamp: Option<i64>,
    frames: u64,
}

impl Recording {
    fn write(&mut self, mut frame: Frame) -> Result<()> {
        self.frames += 1;
        let base = *self.base_timestamp.get_or_insert(frame.timestamp);
        frame.timestamp -= base;
        self.encoder.write_frame(&frame)
    }
}

#[derive(Default)]
struct PumpShared {
    recording: Mutex<Option<Recording>>,
    /// First failure that stopped the pump, tagged with its recording generation.
    fault: Mutex<Option<(u64, CaptureError)>>,
}

impl PumpShared {
    fn recording(&self) -> Result<MutexGuard<'_, Option<Recording>>> {
        self.recording
            .lock()
            .map_err(|_| CaptureError::internal("recording lock poisoned"))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.recording()
            .map(|slot| slot.as_ref().map(|r| r.generation) == Some(generation))
            .unwrap_or(false)
    }

    fn faults(&self) -> Result<MutexGuard<'_, Option<(u64, CaptureError)>>> {
        self.fault
            .lock()
            .map_err(|_| CaptureError::internal("fault lock poisoned"))
    }

    /// Parks `err` for the owner of `generation` and hands it back to the device.
    fn fault(&self, generation: u64, err: CaptureError) -> CaptureError {
        log::error!("capture pump stopped: {}", err);
        if let Ok(mut fault) = self.faults() {
            fault.get_or_insert_with(|| (generation, err.clone()));
        }
        err
    }
}

pub struct CaptureSession {
    device: Arc<dyn CaptureDevice>,
    encoders: Arc<dyn EncoderFactory>,
    format: MediaFormat,
    average_bitrate: u32,
    shared: Arc<PumpShared>,
    generations: AtomicU64,
}

impl CaptureSession {
    /// Negotiates the capture format and selects it on the device.
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        encoders: Arc<dyn EncoderFactory>,
        average_bitrate: u32,
    ) -> Result<Self> {
        let format = negotiate(device.native_formats()?)?;
        device.select_format(&format)?;
        log::info!(
            "capture session on {}: {:?} {}x{} @ {}/{} fps",
            device.name(),
            format.subtype,
            format.width,
            format.height,
            format.frame_rate.numerator,
            format.frame_rate.denominator
        );
        Ok(Self {
            device,
            encoders,
            format,
            average_bitrate,
            shared: Arc::new(PumpShared::default()),
            generations: AtomicU64::new(0),
        })
    }

    pub fn format(&self) -> &MediaFormat {
        &self.format
    }

    pub fn state(&self) -> Result<SessionState> {
        Ok(match self.shared.recording()?.as_ref() {
            Some(_) => SessionState::Active,
            None => SessionState::Idle,
        })
    }

    /// Output file of the active recording.
    pub fn current_path(&self) -> Result<Option<PathBuf>> {
        Ok(self.shared.recording()?.as_ref().map(|r| r.path.clone()))
    }

    /// Frames written to the active recording.
    pub fn frames_written(&self) -> Result<u64> {
        Ok(self.shared.recording()?.as_ref().map_or(0, |r| r.frames))
    }

    /// Takes the failure that stopped the active recording's pump, if any.
    ///
    /// Faults raised by an earlier recording are discarded.
    pub fn take_fault(&self) -> Result<Option<CaptureError>> {
        let slot = self.shared.recording()?;
        let current = slot.as_ref().map(|r| r.generation);
        let parked = self.shared.faults()?.take();
        Ok(parked.and_then(|(generation, err)| {
            if Some(generation) == current {
                Some(err)
            } else {
                log::debug!("dropping fault from recording {}: {}", generation, err);
                None
            }
        }))
    }

    /// Opens an encoder for `path` and arms the frame pump.
    pub fn start(&self, path: &Path) -> Result<()> {
        let generation = {
            let mut slot = self.shared.recording()?;
            if slot.is_some() {
                return Err(CaptureError::invalid_command(
                    "start called while a recording is active",
                ));
            }
            let streams = describe_streams(&self.format, self.average_bitrate);
            let encoder = self.encoders.create(path, &streams)?;
            let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.faults()?.take();
            *slot = Some(Recording {
                generation,
                path: path.to_path_buf(),
                encoder,
                base_timestamp: None,
                frames: 0,
            });
            generation
        };

        let pump = Arc::new(Pump {
            generation,
            shared: Arc::clone(&self.shared),
            device: Arc::clone(&self.device),
        });
        if let Err(err) = self.device.request_frame(pump) {
            if let Err(finalize_err) = self.stop() {
                log::warn!("discarding {} failed: {}", path.display(), finalize_err);
            }
            return Err(err);
        }
        log::info!("recording to {}", path.display());
        Ok(())
    }

    /// Finalizes the active encoder. No-op when idle.
    pub fn stop(&self) -> Result<()> {
        let mut slot = self.shared.recording()?;
        let Some(recording) = slot.take() else {
            return Ok(());
        };
        let Recording {
            path,
            encoder,
            frames,
            ..
        } = recording;
        let result = encoder.finalize();
        drop(slot);
        result?;
        log::info!("closed {} after {} frames", path.display(), frames);
        Ok(())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("capture session teardown: {}", err);
        }
    }
}

/// Pending-request handle for one recording generation.
struct Pump {
    generation: u64,
    shared: Arc<PumpShared>,
    device: Arc<dyn CaptureDevice>,
}

impl FrameCallback for Pump {
    fn on_frame(self: Arc<Self>, delivery: Delivery) -> Result<()> {
        let frame = match delivery {
            Ok(frame) => frame,
            Err(err) if self.shared.is_current(self.generation) => {
                return Err(self.shared.fault(self.generation, err))
            }
            Err(err) => return Err(err),
        };

        {
            let mut slot = self.shared.recording()?;
            let Some(recording) = slot
                .as_mut()
                .filter(|recording| recording.generation == self.generation)
            else {
                // stopped (or restarted) while this request was in flight
                return Ok(());
            };
            if let Some(frame) = frame {
                if let Err(err) = recording.write(frame) {
                    return Err(self.shared.fault(self.generation, err));
                }
            }
        }

        let generation = self.generation;
        let shared = Arc::clone(&self.shared);
        let device = Arc::clone(&self.device);
        device.request_frame(self).map_err(|err| {
            if shared.is_current(generation) {
                shared.fault(generation, err)
            } else {
                err
            }
        })
    }
}
