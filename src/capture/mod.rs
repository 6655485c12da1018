//! Frame sources: pull-based access to decoded video frames

pub mod decoder;
pub mod frame;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;
#[cfg(target_os = "linux")]
pub mod v4l2;

pub use frame::{Frame, FrameMetadata, PixelFormat};
#[cfg(feature = "gstreamer-pipeline")]
pub use gst_capture::GstCapture;
#[cfg(target_os = "linux")]
pub use v4l2::V4l2Capture;

use std::time::{Duration, Instant};

use crate::error::{CaptureError, OpenError};
use crate::Config;

/// An opened, decodable stream.
///
/// `read_frame` may block for a bounded time while the decoder waits for data.
/// `Ok(None)` means "no frame this tick" (timeout, gap, end of stream) and the
/// caller is expected to keep polling. `Err` is reserved for failures after
/// which the source will never produce again.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Release the underlying connection. Safe to call more than once.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Reject blank connection strings before any backend sees them.
pub fn validate_url(url: &str) -> Result<&str, OpenError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(OpenError::InvalidArgument);
    }
    Ok(url)
}

/// One look at a source that is still connecting
#[cfg_attr(not(feature = "gstreamer-pipeline"), allow(dead_code))]
pub(crate) enum FirstFrame<T> {
    Ready(T),
    Failed(String),
    Pending,
}

/// Poll a live source until it produces, fails, or `timeout` passes.
///
/// `poll` is expected to block for a short bounded time itself.
#[cfg_attr(not(feature = "gstreamer-pipeline"), allow(dead_code))]
pub(crate) fn await_first<T>(
    timeout: Duration,
    mut poll: impl FnMut() -> FirstFrame<T>,
) -> Result<T, OpenError> {
    let deadline = Instant::now() + timeout;
    loop {
        match poll() {
            FirstFrame::Ready(value) => return Ok(value),
            FirstFrame::Failed(reason) => return Err(OpenError::ConnectionFailed(reason)),
            FirstFrame::Pending if Instant::now() >= deadline => {
                return Err(OpenError::ConnectionFailed(format!(
                    "no frame within {} ms",
                    timeout.as_millis()
                )))
            }
            FirstFrame::Pending => {}
        }
    }
}

/// Pick a capture backend for `url` and open it.
///
/// Local V4L2 devices (`/dev/videoN`, `v4l2://...`) go to the V4L2 backend,
/// everything else to the GStreamer decoder.
pub fn open(url: &str, config: &Config) -> Result<Box<dyn FrameSource>, OpenError> {
    let url = validate_url(url)?;

    #[cfg(target_os = "linux")]
    if let Some(device) = v4l2::device_path(url) {
        let source = V4l2Capture::open(&device, &config.capture)?;
        return Ok(Box::new(source));
    }

    #[cfg(feature = "gstreamer-pipeline")]
    {
        let source = GstCapture::open(url, &config.capture, &config.gstreamer)?;
        Ok(Box::new(source))
    }

    #[cfg(not(feature = "gstreamer-pipeline"))]
    {
        let _ = config;
        Err(OpenError::ConnectionFailed(format!(
            "no capture backend available for {url}"
        )))
    }
}
