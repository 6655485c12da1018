//! GStreamer-based URL capture: uridecodebin → videoconvert → appsink

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, instrument, warn};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::{await_first, FirstFrame, FrameSource};
use crate::error::{CaptureError, OpenError};
use crate::{CaptureConfig, GStreamerConfig};

/// Decoded frames of an arbitrary URL, pulled from an appsink
pub struct GstCapture {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    read_timeout: gst::ClockTime,
    sequence: u64,
    /// First frame of a live source, pulled while confirming the connection
    pending: Option<Frame>,
    closed: bool,
}

impl GstCapture {
    /// Build the pipeline for `url` and wait (bounded) for it to start playing
    #[instrument(skip(config, gst_config))]
    pub fn open(
        url: &str,
        config: &CaptureConfig,
        gst_config: &GStreamerConfig,
    ) -> Result<Self, OpenError> {
        gst::init().map_err(|e| {
            OpenError::ConnectionFailed(format!("failed to initialize GStreamer: {e}"))
        })?;

        let pipeline_str = Self::build_pipeline_string(gst_config);
        debug!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| OpenError::ConnectionFailed(format!("invalid pipeline: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| OpenError::ConnectionFailed("failed to create pipeline".into()))?;

        let source = pipeline.by_name("source").ok_or_else(|| {
            OpenError::ConnectionFailed("pipeline has no element named source".into())
        })?;
        source.set_property("uri", Self::to_uri(url)?);
        if gst_config.custom_pipeline.is_none() {
            // Only expose the video branch; audio belongs to the audio path
            if let Ok(caps) = "video/x-raw(ANY)".parse::<gst::Caps>() {
                source.set_property("caps", &caps);
                source.set_property("expose-all-streams", false);
            }
        }

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| OpenError::ConnectionFailed("failed to find appsink element".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| OpenError::ConnectionFailed("failed to cast to AppSink".into()))?;

        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", gst_config.max_buffers);
        appsink.set_property("drop", true); // Latest frame wins
        appsink.set_property("sync", gst_config.sync);

        let mut capture = Self {
            pipeline,
            appsink,
            read_timeout: gst::ClockTime::from_mseconds(config.read_timeout_ms),
            sequence: 0,
            pending: None,
            closed: false,
        };

        if let Err(e) = capture.start(gst::ClockTime::from_mseconds(config.open_timeout_ms)) {
            capture.close();
            return Err(e);
        }
        Ok(capture)
    }

    fn build_pipeline_string(config: &GStreamerConfig) -> String {
        if let Some(custom) = &config.custom_pipeline {
            return custom.clone();
        }
        "uridecodebin name=source ! \
         queue max-size-buffers=2 max-size-time=0 max-size-bytes=0 leaky=downstream ! \
         videoconvert ! \
         video/x-raw,format=(string){BGR,BGRA} ! \
         appsink name=appsink"
            .to_string()
    }

    /// uridecodebin wants a URI; bare paths are turned into `file://` URIs.
    fn to_uri(url: &str) -> Result<String, OpenError> {
        if url.contains("://") {
            return Ok(url.to_string());
        }
        let path = Path::new(url);
        let absolute = path
            .canonicalize()
            .map_err(|e| OpenError::ConnectionFailed(format!("{url}: {e}")))?;
        gst::glib::filename_to_uri(&absolute, None)
            .map(|uri| uri.to_string())
            .map_err(|e| OpenError::ConnectionFailed(format!("{url}: {e}")))
    }

    fn start(&mut self, timeout: gst::ClockTime) -> Result<(), OpenError> {
        info!("Starting GStreamer pipeline");

        if self.pipeline.set_state(gst::State::Playing).is_err() {
            return Err(OpenError::ConnectionFailed(
                self.bus_error()
                    .unwrap_or_else(|| "failed to start pipeline".into()),
            ));
        }

        let (state_change, current, _) = self.pipeline.state(Some(timeout));
        match state_change {
            Ok(gst::StateChangeSuccess::Success) => {
                info!("Pipeline started ({:?})", current);
                Ok(())
            }
            // Live sources report PLAYING before anything is connected; only
            // a first sample proves the stream is reachable
            Ok(gst::StateChangeSuccess::NoPreroll) => {
                info!("Live pipeline, waiting for the first frame");
                let wait = Duration::from_millis(timeout.mseconds());
                let step = self.read_timeout;
                let first = await_first(wait, || {
                    if let Some(reason) = self.bus_failure() {
                        return FirstFrame::Failed(reason);
                    }
                    match self.appsink.try_pull_sample(step) {
                        Some(sample) => FirstFrame::Ready(self.sample_to_frame(&sample)),
                        None => FirstFrame::Pending,
                    }
                })?;
                self.pending = first;
                info!("Live stream connected");
                Ok(())
            }
            Ok(gst::StateChangeSuccess::Async) => Err(OpenError::ConnectionFailed(format!(
                "stream did not start within {} ms",
                timeout.mseconds()
            ))),
            Err(_) => Err(OpenError::ConnectionFailed(
                self.bus_error()
                    .unwrap_or_else(|| "failed to start pipeline".into()),
            )),
        }
    }

    /// Drain the bus and return the first error message, if any
    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            if let gst::MessageView::Error(err) = msg.view() {
                return Some(describe(err));
            }
        }
        None
    }

    /// Like `bus_error`, but end of stream counts too: while connecting it
    /// means nothing will ever arrive
    fn bus_failure(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos])?;
        match msg.view() {
            gst::MessageView::Error(err) => Some(describe(err)),
            gst::MessageView::Eos(_) => Some("stream ended before the first frame".into()),
            _ => None,
        }
    }

    fn sample_to_frame(&mut self, sample: &gst::Sample) -> Option<Frame> {
        let buffer = sample.buffer()?;
        let caps = sample.caps()?;
        let info = match gst_video::VideoInfo::from_caps(caps) {
            Ok(info) => info,
            Err(_) => {
                warn!("Failed to parse video info from caps");
                return None;
            }
        };

        let format = match info.format() {
            gst_video::VideoFormat::Bgr => PixelFormat::Bgr24,
            gst_video::VideoFormat::Bgra => PixelFormat::Bgra32,
            gst_video::VideoFormat::Rgb => PixelFormat::Rgb24,
            gst_video::VideoFormat::Rgba => PixelFormat::Rgba32,
            gst_video::VideoFormat::Nv12 => PixelFormat::Nv12,
            gst_video::VideoFormat::Yuy2 => PixelFormat::Yuyv4,
            other => {
                warn!("Unexpected video format {:?}", other);
                return None;
            }
        };

        let map = buffer.map_readable().ok()?;
        // Still a copy: the mapped memory goes back to the pool when `map` drops
        let data = Bytes::copy_from_slice(map.as_slice());

        self.sequence += 1;
        Some(Frame::new(
            data,
            FrameMetadata {
                sequence: self.sequence,
                width: info.width(),
                height: info.height(),
                stride: info.stride()[0].max(0) as usize,
                format,
                device_timestamp: buffer.pts().map(|pts| pts.into()),
            },
        ))
    }
}

impl FrameSource for GstCapture {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.closed {
            return Ok(None);
        }
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        if let Some(err) = self.bus_error() {
            return Err(CaptureError::Stream(err));
        }

        match self.appsink.try_pull_sample(self.read_timeout) {
            Some(sample) => Ok(self.sample_to_frame(&sample)),
            // Timeout or end of stream; live sources may resume
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        info!("Stopping GStreamer pipeline");
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline: {:?}", e);
        }
        self.pending = None;
        self.closed = true;
    }

    fn is_open(&self) -> bool {
        !self.closed
    }
}

fn describe(err: &gst::message::Error) -> String {
    match err.debug() {
        Some(debug) => format!("{} ({})", err.error(), debug),
        None => err.error().to_string(),
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        self.close();
    }
}
