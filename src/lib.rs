pub mod audio;
pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod snapshot;
#[cfg(target_os = "linux")]
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{Frame, FrameSource, PixelFormat};
pub use display::{DisplaySink, Presenter, Surface};
pub use error::{AudioError, CaptureError, ConnectError, FormatError, OpenError, SnapshotError};
pub use session::{MediaBackend, Notice, Notifier, SessionController, SessionState, SystemBackend};

/// Prefix for environment overrides, e.g. `STREAMVIEW__PIPELINE__FRAME_INTERVAL_MS=33`
pub const ENV_PREFIX: &str = "STREAMVIEW";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
    pub audio: AudioConfig,
    pub snapshot: SnapshotConfig,
    #[cfg(feature = "gstreamer-pipeline")]
    pub gstreamer: GStreamerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Upper bound for a connection attempt
    pub open_timeout_ms: u64,
    /// Upper bound for a single `read_frame` call
    pub read_timeout_ms: u64,
    /// Requested size for local (V4L2) devices
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Destination rows are padded to a multiple of this many bytes
    pub stride_alignment: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fixed sleep between acquisition iterations (~24 Hz by default)
    pub frame_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioStrategy {
    /// Detected at startup: external process first, then direct capture
    Auto,
    ExternalProcess,
    DirectCapture,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureDevice {
    /// Record what the default output device is playing
    Loopback,
    Microphone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub strategy: AudioStrategy,
    pub sample_rate: u32,
    pub channels: u16,
    /// Playback ring capacity in milliseconds of audio
    pub buffer_ms: u32,
    pub ffmpeg_path: String,
    pub read_chunk_bytes: usize,
    /// Pause after a read that produced nothing
    pub retry_delay_ms: u64,
    pub capture_device: CaptureDevice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub directory: PathBuf,
}

#[cfg(feature = "gstreamer-pipeline")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GStreamerConfig {
    /// Full launch line replacing the built-in one. Must contain an element
    /// named `source` with a `uri` property and an `appsink` named `appsink`.
    pub custom_pipeline: Option<String>,
    pub max_buffers: u32,
    /// Let the appsink pace file playback against the pipeline clock
    pub sync: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            open_timeout_ms: 5_000,
            read_timeout_ms: 100,
            width: 800,
            height: 600,
            buffer_count: 4,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            title: "streamview".into(),
            width: 800,
            height: 600,
            stride_alignment: 4,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 42,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            strategy: AudioStrategy::Auto,
            sample_rate: 44_100,
            channels: 2,
            buffer_ms: 2_000,
            ffmpeg_path: "ffmpeg".into(),
            read_chunk_bytes: 4096,
            retry_delay_ms: 50,
            capture_device: CaptureDevice::Loopback,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("savedframes"),
        }
    }
}

#[cfg(feature = "gstreamer-pipeline")]
impl Default for GStreamerConfig {
    fn default() -> Self {
        Self {
            custom_pipeline: None,
            max_buffers: 2,
            sync: true,
        }
    }
}

impl PipelineConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl AudioConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Ring capacity in interleaved samples at the configured format
    pub fn ring_capacity(&self) -> usize {
        audio::AudioFormat::from(self).ring_capacity(self.buffer_ms)
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `STREAMVIEW__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
