//! File rotation.
//!
//! Restarts the capture session whenever the current file has run longer than
//! the configured duration, so every output file stays bounded in size.

use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::error::Result;
use crate::session::CaptureSession;

/// Time source for rotation decisions and file names.
pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary origin.
    fn ticks(&self) -> Duration;

    /// Current local wall-clock time.
    fn local_now(&self) -> NaiveDateTime;

    fn sleep(&self, duration: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn ticks(&self) -> Duration {
        self.origin.elapsed()
    }

    fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Output file name for a recording started at `time`.
///
/// `Y{yy}-{mm}-{dd}-{am|pm}-{hh}h{mm}m{ss}s.mp4`, with a 12-hour clock where only
/// hours 13..=23 count as `pm`.
pub fn file_name_for(time: &NaiveDateTime) -> String {
    let (meridiem, hour) = if time.hour() < 13 {
        ("am", time.hour())
    } else {
        ("pm", time.hour() - 12)
    };
    format!(
        "Y{:02}-{:02}-{:02}-{}-{:02}h{:02}m{:02}s.mp4",
        time.year() - 2000,
        time.month(),
        time.day(),
        meridiem,
        hour,
        time.minute(),
        time.second()
    )
}

pub struct RotationManager {
    session: CaptureSession,
    folder: PathBuf,
    seconds_per_file: u64,
    grace: Duration,
    clock: Arc<dyn Clock>,
    /// Tick count when the current file began; `None` when not recording.
    recording_since: Option<Duration>,
}

impl RotationManager {
    pub fn new(session: CaptureSession, settings: &Settings, clock: Arc<dyn Clock>) -> Self {
        Self {
            session,
            folder: settings.folder.clone(),
            seconds_per_file: settings.seconds_per_file,
            grace: settings.rotation_grace,
            clock,
            recording_since: None,
        }
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn is_recording(&self) -> bool {
        self.recording_since.is_some()
    }

    /// Starts a new file named after the current local time.
    pub fn start(&mut self) -> Result<PathBuf> {
        let path = self.folder.join(file_name_for(&self.clock.local_now()));
        self.session.start(&path)?;
        self.recording_since = Some(self.clock.ticks());
        Ok(path)
    }

    /// Stops the current file. No-op when not recording.
    pub fn stop(&mut self) -> Result<()> {
        if self.recording_since.take().is_some() {
            self.session.stop()?;
        }
        Ok(())
    }

    /// Rotates once the current file has run past its target duration.
    ///
    /// Returns whether a new file was started. A failure parked by the frame pump
    /// is surfaced here.
    pub fn on_tick(&mut self) -> Result<bool> {
        let Some(since) = self.recording_since else {
            return Ok(false);
        };
        if let Some(fault) = self.session.take_fault()? {
            return Err(fault);
        }
        let elapsed = self.clock.ticks().saturating_sub(since);
        if elapsed <= Duration::from_secs(self.seconds_per_file) {
            return Ok(false);
        }
        self.stop()?;
        self.clock.sleep(self.grace);
        let path = self.start()?;
        log::info!(
            "rotated after {}s, now recording {}",
            elapsed.as_secs(),
            path.display()
        );
        Ok(true)
    }
}
