//! Failure taxonomy shared by the capture pipeline.
//!
//! Every error records the source location that raised it so the operator-facing
//! layer can report "what failed and where" without a backtrace.

use std::error::Error as StdError;
use std::panic::Location;
use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

/// Closed set of failure categories reported at the process boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    BadConfig,
    Platform,
    NoCaptureDevice,
    BadFormat,
    InvalidCommand,
    Internal,
}

impl FailureKind {
    /// Process exit code used by the daemon for this category.
    pub fn exit_code(self) -> u8 {
        match self {
            FailureKind::BadConfig => 1,
            FailureKind::Platform => 2,
            FailureKind::NoCaptureDevice
            | FailureKind::BadFormat
            | FailureKind::InvalidCommand
            | FailureKind::Internal => 3,
        }
    }
}

#[derive(Clone, Debug, Error)]
pub enum CaptureError {
    #[error("bad configuration: {message} (at {location})")]
    BadConfig {
        message: String,
        location: &'static Location<'static>,
    },
    #[error("{context}: {source} (at {location})")]
    Platform {
        context: String,
        #[source]
        source: Arc<dyn StdError + Send + Sync>,
        location: &'static Location<'static>,
    },
    #[error("no capture device present (at {location})")]
    NoCaptureDevice { location: &'static Location<'static> },
    #[error("device offers no acceptable capture format (at {location})")]
    BadFormat { location: &'static Location<'static> },
    #[error("invalid command: {message} (at {location})")]
    InvalidCommand {
        message: &'static str,
        location: &'static Location<'static>,
    },
    #[error("internal error: {message} (at {location})")]
    Internal {
        message: String,
        location: &'static Location<'static>,
    },
}

impl CaptureError {
    #[track_caller]
    pub fn bad_config(message: impl Into<String>) -> Self {
        Self::BadConfig {
            message: message.into(),
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn platform<E>(context: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::Platform {
            context: context.into(),
            source: Arc::from(source.into()),
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn no_capture_device() -> Self {
        Self::NoCaptureDevice {
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn bad_format() -> Self {
        Self::BadFormat {
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn invalid_command(message: &'static str) -> Self {
        Self::InvalidCommand {
            message,
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            location: Location::caller(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            CaptureError::BadConfig { .. } => FailureKind::BadConfig,
            CaptureError::Platform { .. } => FailureKind::Platform,
            CaptureError::NoCaptureDevice { .. } => FailureKind::NoCaptureDevice,
            CaptureError::BadFormat { .. } => FailureKind::BadFormat,
            CaptureError::InvalidCommand { .. } => FailureKind::InvalidCommand,
            CaptureError::Internal { .. } => FailureKind::Internal,
        }
    }

    /// Source location that raised this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self {
            CaptureError::BadConfig { location, .. }
            | CaptureError::Platform { location, .. }
            | CaptureError::NoCaptureDevice { location }
            | CaptureError::BadFormat { location }
            | CaptureError::InvalidCommand { location, .. }
            | CaptureError::Internal { location, .. } => location,
        }
    }
}
