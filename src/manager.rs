//! Capture manager: composition root of the capture core.
//!
//! Owns the rotation manager (and through it the capture session) plus the
//! retention sweeper. The caller drives `on_tick` about once a second.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Settings;
use crate::device::CaptureDevice;
use crate::encode::EncoderFactory;
use crate::error::{CaptureError, Result};
use crate::retention::{FsCleaner, RetentionSweeper};
use crate::rotation::{Clock, RotationManager, SystemClock};
use crate::session::CaptureSession;

pub struct CaptureManager {
    settings: Settings,
    rotation: RotationManager,
    sweeper: Option<RetentionSweeper>,
}

impl CaptureManager {
    pub fn new(
        settings: Settings,
        device: Arc<dyn CaptureDevice>,
        encoders: Arc<dyn EncoderFactory>,
    ) -> Result<Self> {
        Self::with_clock(settings, device, encoders, Arc::new(SystemClock::new()))
    }

    /// Validates settings, negotiates the device format, and starts the sweeper.
    pub fn with_clock(
        settings: Settings,
        device: Arc<dyn CaptureDevice>,
        encoders: Arc<dyn EncoderFactory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        settings.validate()?;
        std::fs::create_dir_all(&settings.folder).map_err(|e| {
            CaptureError::platform(
                format!("create output folder {}", settings.folder.display()),
                e,
            )
        })?;

        let session = CaptureSession::new(device, encoders, settings.average_bitrate)?;
        let rotation = RotationManager::new(session, &settings, clock);
        let sweeper = RetentionSweeper::spawn(
            Box::new(FsCleaner::new(&settings.folder)),
            settings.keep_file_count,
            settings.clean_interval,
        )?;

        log::info!(
            "capture manager ready: {} ({}s per file, keep {}, sweep every {}s)",
            settings.folder.display(),
            settings.seconds_per_file,
            settings.keep_file_count,
            settings.clean_interval.as_secs()
        );
        Ok(Self {
            settings,
            rotation,
            sweeper: Some(sweeper),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn session(&self) -> &CaptureSession {
        self.rotation.session()
    }

    pub fn is_recording(&self) -> bool {
        self.rotation.is_recording()
    }

    /// Starts recording into a new file; returns its path.
    pub fn start(&mut self) -> Result<PathBuf> {
        self.rotation.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.rotation.stop()
    }

    /// Timer entry point; returns whether a new file was started.
    pub fn on_tick(&mut self) -> Result<bool> {
        self.rotation.on_tick()
    }

    /// Stops recording and joins the retention thread.
    pub fn shutdown(mut self) -> Result<()> {
        let stopped = self.rotation.stop();
        let joined = match self.sweeper.take() {
            Some(sweeper) => sweeper.shutdown(),
            None => Ok(()),
        };
        stopped.and(joined)
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        if let Err(err) = self.rotation.stop() {
            log::warn!("capture manager teardown: {}", err);
        }
    }
}
