//! camcenter - continuous camera recorder
//!
//! This daemon:
//! 1. Loads settings (JSON file, environment overrides)
//! 2. Opens the capture device and negotiates its format
//! 3. Records fixed-length MP4 files, rotating on a one-second tick
//! 4. Prunes old files in the background
//!
//! The exit code reports the failure category: 1 bad configuration,
//! 2 device/encoder failure, 3 anything else.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam::channel::{self, RecvTimeoutError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use camcenter::{open_capture_device, CaptureError, CaptureManager, FfmpegEncoderFactory, Settings};

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const UNCATEGORIZED_EXIT: u8 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON settings file (defaults to $CAMCENTER_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Capture device selector, e.g. stub://camera or /dev/video0.
    #[arg(long)]
    camera: Option<String>,
    /// ffmpeg executable used for encoding.
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<CaptureError>()
                .map(|capture| capture.kind().exit_code())
                .unwrap_or(UNCATEGORIZED_EXIT);
            log::error!("camcenter stopped: {:#}", err);
            ExitCode::from(code)
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(camera) = args.camera {
        settings.camera = camera;
    }

    let device = open_capture_device(&settings.camera)?;
    let encoders = Arc::new(FfmpegEncoderFactory::new(args.ffmpeg));
    let mut manager = CaptureManager::new(settings, device, encoders)?;

    let (tx, rx) = channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("install Ctrl-C handler")?;

    let first = manager.start()?;
    log::info!("camcenter running, first file {}", first.display());

    loop {
        match rx.recv_timeout(TICK_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => {
                manager.on_tick()?;
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("shutdown signal received, finalizing current file...");
    manager.shutdown()?;
    Ok(())
}
