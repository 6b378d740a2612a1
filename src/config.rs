use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CaptureError, Result};

/// Shortest output file the rotation policy accepts.
pub const MIN_SECONDS_PER_FILE: u64 = 10;
/// Lowest average bitrate (bits/sec) the encoder is configured with.
pub const MIN_AVERAGE_BITRATE: u32 = 50_000;
/// Pause between finalizing one file and opening the next.
pub const DEFAULT_ROTATION_GRACE: Duration = Duration::from_millis(100);

const DEFAULT_FOLDER: &str = "recordings";
const DEFAULT_CAMERA: &str = "stub://camera";
const DEFAULT_SECONDS_PER_FILE: u64 = 300;
const DEFAULT_AVERAGE_BITRATE: u32 = 2_000_000;
const DEFAULT_KEEP_FILE_COUNT: usize = 48;
const DEFAULT_CLEAN_INTERVAL_MINUTES: u64 = 10;
const SECONDS_PER_MINUTE: u64 = 60;

#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    folder: Option<PathBuf>,
    camera: Option<String>,
    seconds_per_file: Option<u64>,
    average_bitrate: Option<u32>,
    keep_file_count: Option<usize>,
    clean_interval_minutes: Option<u64>,
    rotation_grace_ms: Option<u64>,
}

/// Capture settings. Read-only once loaded; share by reference or clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Output directory, also the directory the retention sweep prunes.
    pub folder: PathBuf,
    /// Capture device selector (`stub://...`, `/dev/videoN` or `auto`).
    pub camera: String,
    pub seconds_per_file: u64,
    pub average_bitrate: u32,
    pub keep_file_count: usize,
    pub clean_interval: Duration,
    pub rotation_grace: Duration,
}

impl Settings {
    /// Defaults rooted at `folder`.
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            camera: DEFAULT_CAMERA.to_string(),
            seconds_per_file: DEFAULT_SECONDS_PER_FILE,
            average_bitrate: DEFAULT_AVERAGE_BITRATE,
            keep_file_count: DEFAULT_KEEP_FILE_COUNT,
            clean_interval: Duration::from_secs(DEFAULT_CLEAN_INTERVAL_MINUTES * SECONDS_PER_MINUTE),
            rotation_grace: DEFAULT_ROTATION_GRACE,
        }
    }

    /// Loads settings from `path`, or from `CAMCENTER_CONFIG` when no path is given,
    /// then applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("CAMCENTER_CONFIG").ok().map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parses a JSON settings object and validates it. Environment is not consulted.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: SettingsFile = serde_json::from_str(raw)
            .map_err(|e| CaptureError::bad_config(format!("invalid settings json: {}", e)))?;
        let cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SettingsFile) -> Result<Self> {
        let minutes = file
            .clean_interval_minutes
            .unwrap_or(DEFAULT_CLEAN_INTERVAL_MINUTES);
        let clean_secs = minutes.checked_mul(SECONDS_PER_MINUTE).ok_or_else(|| {
            CaptureError::bad_config(format!("clean_interval_minutes is too large (got {})", minutes))
        })?;
        Ok(Self {
            folder: file.folder.unwrap_or_else(|| PathBuf::from(DEFAULT_FOLDER)),
            camera: file.camera.unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
            seconds_per_file: file.seconds_per_file.unwrap_or(DEFAULT_SECONDS_PER_FILE),
            average_bitrate: file.average_bitrate.unwrap_or(DEFAULT_AVERAGE_BITRATE),
            keep_file_count: file.keep_file_count.unwrap_or(DEFAULT_KEEP_FILE_COUNT),
            clean_interval: Duration::from_secs(clean_secs),
            rotation_grace: file
                .rotation_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_ROTATION_GRACE),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(folder) = std::env::var("CAMCENTER_FOLDER") {
            if !folder.trim().is_empty() {
                self.folder = PathBuf::from(folder);
            }
        }
        if let Ok(camera) = std::env::var("CAMCENTER_CAMERA") {
            if !camera.trim().is_empty() {
                self.camera = camera;
            }
        }
        if let Ok(seconds) = std::env::var("CAMCENTER_SECONDS_PER_FILE") {
            self.seconds_per_file = seconds.trim().parse().map_err(|_| {
                CaptureError::bad_config(
                    "CAMCENTER_SECONDS_PER_FILE must be an integer number of seconds",
                )
            })?;
        }
        Ok(())
    }

    /// Rejects settings the capture pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.folder.as_os_str().is_empty() {
            return Err(CaptureError::bad_config("folder must not be empty"));
        }
        if self.seconds_per_file < MIN_SECONDS_PER_FILE {
            return Err(CaptureError::bad_config(format!(
                "seconds_per_file must be at least {} (got {})",
                MIN_SECONDS_PER_FILE, self.seconds_per_file
            )));
        }
        if self.average_bitrate < MIN_AVERAGE_BITRATE {
            return Err(CaptureError::bad_config(format!(
                "average_bitrate must be at least {} (got {})",
                MIN_AVERAGE_BITRATE, self.average_bitrate
            )));
        }
        if self.clean_interval.is_zero() {
            return Err(CaptureError::bad_config(
                "clean_interval_minutes must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SettingsFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        CaptureError::bad_config(format!("failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        CaptureError::bad_config(format!("invalid config file {}: {}", path.display(), e))
    })
}
