//! Audio paths: interchangeable strategies that feed a playback ring
//!
//! Both strategies share one lifecycle: `start` acquires everything or
//! nothing (a partial start is torn down before the error is returned), and
//! `stop` halts the output device first, then the producing side, then
//! releases the handles, so no device callback can fire into a ring whose
//! producer is half gone.

pub mod direct;
pub mod output;
pub mod process;

use std::process::{Command, Stdio};

use cpal::traits::HostTrait;
use tracing::{debug, info};

pub use direct::DirectCapture;
pub use output::{AudioOutput, DefaultOutput, OpenedOutput, OutputFactory, PlaybackDevice};
pub use process::ExternalProcess;

use crate::error::AudioError;
use crate::{AudioConfig, AudioStrategy, CaptureDevice};

/// One way of getting the stream's sound to the speakers
pub trait AudioPath {
    fn name(&self) -> &'static str;

    /// Begin producing and playing audio for `source`
    fn start(&mut self, source: &str) -> Result<(), AudioError>;

    /// Idempotent teardown: output device, then producer, then handles
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// PCM layout shared by capture, demux output and playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Interleaved samples in `buffer_ms` of audio, at least one frame
    pub fn ring_capacity(&self, buffer_ms: u32) -> usize {
        let per_second = self.sample_rate as usize * self.channels as usize;
        (per_second * buffer_ms as usize / 1000).max(self.channels.max(1) as usize)
    }
}

impl From<&AudioConfig> for AudioFormat {
    fn from(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
        }
    }
}

/// Resolve `Auto` (and sanity-check explicit choices) against what this
/// machine can actually do. Runs once at startup.
pub fn detect_strategy(config: &AudioConfig) -> AudioStrategy {
    let resolved = match config.strategy {
        AudioStrategy::Disabled => AudioStrategy::Disabled,
        AudioStrategy::ExternalProcess if ffmpeg_available(&config.ffmpeg_path) => {
            AudioStrategy::ExternalProcess
        }
        AudioStrategy::DirectCapture if capture_available(config.capture_device) => {
            AudioStrategy::DirectCapture
        }
        AudioStrategy::Auto if ffmpeg_available(&config.ffmpeg_path) => {
            AudioStrategy::ExternalProcess
        }
        AudioStrategy::Auto if capture_available(config.capture_device) => {
            AudioStrategy::DirectCapture
        }
        _ => AudioStrategy::Disabled,
    };
    info!(requested = ?config.strategy, ?resolved, "Audio strategy selected");
    resolved
}

/// A fresh, stopped audio path for one session
pub fn create_path(strategy: AudioStrategy, config: &AudioConfig) -> Option<Box<dyn AudioPath>> {
    match strategy {
        AudioStrategy::ExternalProcess => Some(Box::new(ExternalProcess::new(config.clone()))),
        AudioStrategy::DirectCapture => Some(Box::new(DirectCapture::new(config.clone()))),
        AudioStrategy::Auto | AudioStrategy::Disabled => None,
    }
}

fn ffmpeg_available(path: &str) -> bool {
    let available = Command::new(path)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);
    debug!(path, available, "Checked demuxer");
    available
}

fn capture_available(device: CaptureDevice) -> bool {
    let host = cpal::default_host();
    let available = host.default_output_device().is_some()
        && match device {
            // Loopback records from the output device itself
            CaptureDevice::Loopback => true,
            CaptureDevice::Microphone => host.default_input_device().is_some(),
        };
    debug!(host = ?host.id(), ?device, available, "Checked audio host");
    available
}
