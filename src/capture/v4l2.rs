//! V4L2 capture for local cameras, MJPEG decoded to RGB24

use std::io;
use std::time::Duration;

use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::decoder::decode_mjpeg;
use super::{Frame, FrameSource};
use crate::error::{CaptureError, OpenError};
use crate::utils;
use crate::CaptureConfig;

const SCHEME: &str = "v4l2://";

/// Map a connection string onto a V4L2 device node, if it names one.
///
/// Accepts `/dev/videoN`, `v4l2:///dev/videoN`, `v4l2://N` and `v4l2://auto`.
pub fn device_path(url: &str) -> Option<String> {
    if url.starts_with("/dev/video") {
        return Some(url.to_string());
    }
    let rest = url.strip_prefix(SCHEME)?;
    if rest.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() {
        return Some(format!("/dev/video{rest}"));
    }
    Some(rest.to_string())
}

/// Memory-mapped MJPEG capture from a V4L2 device
pub struct V4l2Capture {
    stream: Option<MmapStream<'static>>,
    _device: Device,
    sequence: u64,
}

impl V4l2Capture {
    #[instrument(skip(config))]
    pub fn open(path: &str, config: &CaptureConfig) -> Result<Self, OpenError> {
        let path = if path == "auto" {
            utils::auto_detect_device()?
        } else {
            path.to_string()
        };
        info!("Opening V4L2 device {}", path);

        let failed = |what: &str, e: io::Error| {
            OpenError::ConnectionFailed(format!("{path}: {what}: {e}"))
        };

        let device = Device::with_path(&path).map_err(|e| failed("open", e))?;
        let caps = device.query_caps().map_err(|e| failed("query caps", e))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(OpenError::ConnectionFailed(format!(
                "{path}: device doesn't support video capture"
            )));
        }

        let mut fmt = device.format().map_err(|e| failed("get format", e))?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(b"MJPG");
        let fmt = device.set_format(&fmt).map_err(|e| failed("set format", e))?;
        if fmt.fourcc != FourCC::new(b"MJPG") {
            return Err(OpenError::ConnectionFailed(format!(
                "{path}: device negotiated {} instead of MJPG",
                fmt.fourcc
            )));
        }
        info!("Negotiated {}x{} MJPG", fmt.width, fmt.height);

        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
            .map_err(|e| failed("map buffers", e))?;
        stream.set_timeout(Duration::from_millis(config.read_timeout_ms));

        Ok(Self {
            stream: Some(stream),
            _device: device,
            sequence: 0,
        })
    }
}

impl FrameSource for V4l2Capture {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };

        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                ) =>
            {
                return Ok(None)
            }
            Err(e) => return Err(CaptureError::Io(e)),
        };

        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Ok(None);
        }

        self.sequence += 1;
        let device_timestamp = Duration::from_secs(meta.timestamp.sec as u64)
            + Duration::from_micros(meta.timestamp.usec as u64);

        Ok(decode_mjpeg(&buf[..used], self.sequence).map(|mut frame| {
            if let Some(meta) = std::sync::Arc::get_mut(&mut frame.meta) {
                meta.device_timestamp = Some(device_timestamp);
            }
            frame
        }))
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("V4L2 stream closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for V4l2Capture {
    fn drop(&mut self) {
        self.close();
    }
}
