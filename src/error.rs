//! Error taxonomy for the acquisition pipeline
//!
//! Per-frame conditions (no frame this tick, a zero-byte audio read) never show
//! up here; they are plain `Option`s. These types cover what propagates to the
//! session controller or to the caller of a single operation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::capture::PixelFormat;
use crate::session::SessionState;

/// Failure to establish a frame source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OpenError {
    #[error("stream URL is empty")]
    InvalidArgument,
    #[error("failed to open stream: {0}")]
    ConnectionFailed(String),
}

/// Unrecoverable failure of an already opened frame source.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("stream error: {0}")]
    Stream(String),
    #[error("capture device I/O failed")]
    Io(#[from] io::Error),
}

/// A frame whose layout the converter cannot handle. Fatal to that frame only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),
    #[error("stride {stride} is smaller than a {row_bytes}-byte row")]
    StrideTooSmall { stride: usize, row_bytes: usize },
    #[error("buffer holds {actual} bytes, {required} required")]
    BufferTooSmall { required: usize, actual: usize },
    #[error("frame is {frame_width}x{frame_height}, surface is {surface_width}x{surface_height}")]
    DimensionMismatch {
        frame_width: u32,
        frame_height: u32,
        surface_width: u32,
        surface_height: u32,
    },
}

/// Audio path failures. None of these affect the video path.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio device error: {0}")]
    Device(String),
    #[error("demux process error: {0}")]
    Process(String),
    #[error("audio strategy unavailable: {0}")]
    Unavailable(String),
    #[error("audio path is already running")]
    AlreadyRunning,
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        Self::Device(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        Self::Device(err.to_string())
    }
}

impl From<cpal::SupportedStreamConfigsError> for AudioError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        Self::Device(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        Self::Device(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to create snapshot directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode snapshot {path}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Reasons `SessionController::connect` refuses or fails.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("a session is already {0:?}")]
    Busy(SessionState),
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error("failed to spawn acquisition thread")]
    Spawn(#[source] io::Error),
}
