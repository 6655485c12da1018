//! Playback device draining the sample ring

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    OutputCallbackInfo, Sample, SampleFormat, StreamConfig, StreamError, SupportedStreamConfig,
    SupportedStreamConfigRange,
};
use tracing::{debug, info, warn};

use super::AudioFormat;
use crate::error::AudioError;
use crate::pipeline::{sample_ring, SampleConsumer, SampleProducer};

/// A started-or-paused sink for ring samples
pub trait AudioOutput {
    fn play(&self) -> Result<(), AudioError>;

    /// Stop pulling from the ring; the device is released on drop
    fn pause(&self);
}

/// A playback sink plus the producer end of the ring feeding it
pub struct OpenedOutput {
    pub output: Box<dyn AudioOutput>,
    pub producer: SampleProducer,
    /// What the device actually runs at
    pub format: AudioFormat,
}

/// Opens playback for an audio path
pub trait OutputFactory {
    /// Open (but do not start) playback. The device may dictate a format
    /// other than `requested`; the ring holds `buffer_ms` of the final one.
    fn open(&self, requested: AudioFormat, buffer_ms: u32) -> Result<OpenedOutput, AudioError>;
}

/// The host's default output device
pub struct DefaultOutput;

impl OutputFactory for DefaultOutput {
    fn open(&self, requested: AudioFormat, buffer_ms: u32) -> Result<OpenedOutput, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::Device("no default output device".into()))?;
        let (format, sample_format) = negotiate(
            requested,
            device.default_output_config()?,
            device.supported_output_configs()?,
        );

        let (producer, consumer) = sample_ring(format.ring_capacity(buffer_ms));
        let playback = PlaybackDevice::build(&device, format, sample_format, consumer)?;
        Ok(OpenedOutput {
            output: Box::new(playback),
            producer,
            format,
        })
    }
}

/// Pick the stream format for a device.
///
/// `requested` is kept when one of the device's ranges covers its rate and
/// channel count; otherwise the device default wins. The sample format
/// prefers the device default.
pub fn negotiate(
    requested: AudioFormat,
    default: SupportedStreamConfig,
    supported: impl IntoIterator<Item = SupportedStreamConfigRange>,
) -> (AudioFormat, SampleFormat) {
    let matching: Vec<SampleFormat> = supported
        .into_iter()
        .filter(|range| {
            range.channels() == requested.channels
                && range.min_sample_rate().0 <= requested.sample_rate
                && requested.sample_rate <= range.max_sample_rate().0
                && convertible(range.sample_format())
        })
        .map(|range| range.sample_format())
        .collect();

    let preferred = default.sample_format();
    if let Some(&sample_format) = matching
        .iter()
        .find(|&&f| f == preferred)
        .or_else(|| matching.first())
    {
        return (requested, sample_format);
    }

    let dictated = AudioFormat {
        sample_rate: default.sample_rate().0,
        channels: default.channels(),
    };
    info!(?requested, ?dictated, "Device dictates its own format");
    (dictated, preferred)
}

fn convertible(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::I16 | SampleFormat::F32 | SampleFormat::U16)
}

/// Default output device pulling interleaved samples from a [`SampleConsumer`]
pub struct PlaybackDevice {
    stream: cpal::Stream,
    name: String,
}

impl PlaybackDevice {
    /// Build (but do not start) the output stream
    pub fn build(
        device: &cpal::Device,
        format: AudioFormat,
        sample_format: SampleFormat,
        mut consumer: SampleConsumer,
    ) -> Result<Self, AudioError> {
        let name = device.name().unwrap_or_else(|_| "unknown".into());
        let config = format.stream_config();
        info!(
            device = %name,
            rate = format.sample_rate,
            channels = format.channels,
            ?sample_format,
            "Opening playback device"
        );

        let err_fn = |err: StreamError| warn!("Playback stream error: {}", err);
        let stream = match sample_format {
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &OutputCallbackInfo| {
                    consumer.fill(data);
                },
                err_fn,
                None,
            )?,
            SampleFormat::F32 => {
                let mut scratch = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &OutputCallbackInfo| {
                        fill_converted(&mut consumer, &mut scratch, data)
                    },
                    err_fn,
                    None,
                )?
            }
            SampleFormat::U16 => {
                let mut scratch = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [u16], _: &OutputCallbackInfo| {
                        fill_converted(&mut consumer, &mut scratch, data)
                    },
                    err_fn,
                    None,
                )?
            }
            other => {
                return Err(AudioError::Device(format!(
                    "unsupported output sample format {other:?}"
                )))
            }
        };

        Ok(Self { stream, name })
    }
}

impl AudioOutput for PlaybackDevice {
    fn play(&self) -> Result<(), AudioError> {
        self.stream.play()?;
        Ok(())
    }

    fn pause(&self) {
        if let Err(e) = self.stream.pause() {
            debug!(device = %self.name, "Failed to pause playback: {}", e);
        }
    }
}

impl Drop for PlaybackDevice {
    fn drop(&mut self) {
        debug!(device = %self.name, "Playback device released");
    }
}

/// Fill a non-i16 device buffer; `scratch` only grows, so steady state does
/// not allocate.
fn fill_converted<T>(consumer: &mut SampleConsumer, scratch: &mut Vec<i16>, data: &mut [T])
where
    T: Sample + cpal::FromSample<i16>,
{
    scratch.resize(data.len(), 0);
    consumer.fill(scratch);
    for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
        *out = sample.to_sample::<T>();
    }
}

impl AudioFormat {
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleRate, SupportedBufferSize};

    const CD: AudioFormat = AudioFormat {
        sample_rate: 44_100,
        channels: 2,
    };

    fn range(
        channels: u16,
        min: u32,
        max: u32,
        format: SampleFormat,
    ) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    fn default_config(rate: u32, channels: u16, format: SampleFormat) -> SupportedStreamConfig {
        SupportedStreamConfig::new(channels, SampleRate(rate), SupportedBufferSize::Unknown, format)
    }

    #[test]
    fn requested_format_is_kept_when_supported() {
        let negotiated = negotiate(
            CD,
            default_config(48_000, 2, SampleFormat::F32),
            [
                range(2, 8_000, 192_000, SampleFormat::I16),
                range(2, 8_000, 192_000, SampleFormat::F32),
            ],
        );
        assert_eq!(negotiated, (CD, SampleFormat::F32));
    }

    #[test]
    fn device_fixed_rate_overrides_request() {
        // Shared-mode style device: only its own mix format
        let negotiated = negotiate(
            CD,
            default_config(48_000, 2, SampleFormat::F32),
            [range(2, 48_000, 48_000, SampleFormat::F32)],
        );
        let expected = AudioFormat {
            sample_rate: 48_000,
            channels: 2,
        };
        assert_eq!(negotiated, (expected, SampleFormat::F32));
    }

    #[test]
    fn channel_mismatch_falls_back_to_default() {
        let negotiated = negotiate(
            CD,
            default_config(44_100, 6, SampleFormat::I16),
            [range(6, 44_100, 48_000, SampleFormat::I16)],
        );
        assert_eq!(negotiated.0.channels, 6);
    }

    #[test]
    fn unconvertible_ranges_are_ignored() {
        let negotiated = negotiate(
            CD,
            default_config(44_100, 2, SampleFormat::I16),
            [
                range(2, 44_100, 44_100, SampleFormat::I32),
                range(2, 44_100, 44_100, SampleFormat::U16),
            ],
        );
        assert_eq!(negotiated, (CD, SampleFormat::U16));
    }
}
