//! Direct capture: a system capture device feeding playback through the ring

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{InputCallbackInfo, Sample, SampleFormat, StreamError};
use tracing::{debug, info, instrument, warn};

use super::output::negotiate;
use super::{AudioFormat, AudioOutput, AudioPath, DefaultOutput, OutputFactory};
use crate::error::AudioError;
use crate::pipeline::SampleProducer;
use crate::{AudioConfig, CaptureDevice};

/// Loopback or microphone capture played straight back out.
///
/// Capture callbacks push into the ring with no extra queue; the ring absorbs
/// jitter between the capture and playback callbacks. Capture runs at the
/// playback format, there is no resampling.
pub struct DirectCapture {
    config: AudioConfig,
    outputs: Box<dyn OutputFactory>,
    input: Option<cpal::Stream>,
    output: Option<Box<dyn AudioOutput>>,
}

impl DirectCapture {
    pub fn new(config: AudioConfig) -> Self {
        Self::with_output(config, Box::new(DefaultOutput))
    }

    pub fn with_output(config: AudioConfig, outputs: Box<dyn OutputFactory>) -> Self {
        Self {
            config,
            outputs,
            input: None,
            output: None,
        }
    }

    fn try_start(&mut self) -> Result<(), AudioError> {
        let opened = self
            .outputs
            .open(AudioFormat::from(&self.config), self.config.buffer_ms)?;
        let output = self.output.insert(opened.output);
        output.play()?;

        let input = self.input.insert(open_capture(
            &cpal::default_host(),
            self.config.capture_device,
            opened.format,
            opened.producer,
        )?);
        input.play()?;
        Ok(())
    }
}

impl AudioPath for DirectCapture {
    fn name(&self) -> &'static str {
        "direct-capture"
    }

    #[instrument(skip(self), fields(device = ?self.config.capture_device))]
    fn start(&mut self, source: &str) -> Result<(), AudioError> {
        if self.is_running() {
            return Err(AudioError::AlreadyRunning);
        }
        // The device, not the stream URL, is what gets captured here
        debug!("Ignoring source for direct capture");

        if let Err(e) = self.try_start() {
            self.stop();
            return Err(e);
        }
        info!("Direct audio capture running");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(output) = &self.output {
            output.pause();
        }
        if let Some(input) = &self.input {
            if let Err(e) = input.pause() {
                debug!("Failed to pause capture: {}", e);
            }
        }
        let released = self.output.take().is_some() | self.input.take().is_some();
        if released {
            info!("Direct audio capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.output.is_some() || self.input.is_some()
    }
}

impl Drop for DirectCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_capture(
    host: &cpal::Host,
    device: CaptureDevice,
    format: AudioFormat,
    mut producer: SampleProducer,
) -> Result<cpal::Stream, AudioError> {
    let (device, default, supported) = match device {
        CaptureDevice::Loopback => {
            // Input stream on the output device; hosts without loopback
            // support reject this when the stream is built
            let device = host
                .default_output_device()
                .ok_or_else(|| AudioError::Device("no output device to loop back".into()))?;
            let default = device.default_output_config()?;
            let supported: Vec<_> = device.supported_output_configs()?.collect();
            (device, default, supported)
        }
        CaptureDevice::Microphone => {
            let device = host
                .default_input_device()
                .ok_or_else(|| AudioError::Device("no default input device".into()))?;
            let default = device.default_input_config()?;
            let supported: Vec<_> = device.supported_input_configs()?.collect();
            (device, default, supported)
        }
    };

    let (negotiated, sample_format) = negotiate(format, default, supported);
    if negotiated != format {
        return Err(AudioError::Device(format!(
            "capture runs at {} Hz/{} ch, playback at {} Hz/{} ch",
            negotiated.sample_rate, negotiated.channels, format.sample_rate, format.channels
        )));
    }
    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".into()),
        ?sample_format,
        "Opening capture device"
    );

    let config = format.stream_config();
    let err_fn = |err: StreamError| warn!("Capture stream error: {}", err);
    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &InputCallbackInfo| {
                producer.push(data);
            },
            err_fn,
            None,
        )?,
        SampleFormat::F32 => {
            let mut scratch = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &InputCallbackInfo| {
                    push_converted(&mut producer, &mut scratch, data)
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::U16 => {
            let mut scratch = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &InputCallbackInfo| {
                    push_converted(&mut producer, &mut scratch, data)
                },
                err_fn,
                None,
            )?
        }
        other => {
            return Err(AudioError::Device(format!(
                "unsupported capture sample format {other:?}"
            )))
        }
    };
    Ok(stream)
}

fn push_converted<T>(producer: &mut SampleProducer, scratch: &mut Vec<i16>, data: &[T])
where
    T: Sample,
    i16: cpal::FromSample<T>,
{
    scratch.clear();
    scratch.extend(data.iter().map(|&s| s.to_sample::<i16>()));
    producer.push(scratch);
}
