use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One decoded image, valid for a single pipeline iteration
#[derive(Clone)]
pub struct Frame {
    /// Row-major pixel data, `meta.stride` bytes per row
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes between the starts of consecutive rows
    pub stride: usize,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

impl Frame {
    pub fn new(data: Bytes, meta: FrameMetadata) -> Self {
        Self {
            data,
            meta: Arc::new(meta),
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    /// Zero-sized frames mean "nothing this tick", not an error.
    pub fn is_empty(&self) -> bool {
        self.meta.width == 0 || self.meta.height == 0 || self.data.is_empty()
    }
}

/// Pixel layouts a decoder can hand us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Rgba32,
    Bgra32,
    Yuyv4,
    Mjpeg,
    Nv12,
}

impl PixelFormat {
    /// Packed bytes per pixel, `None` for planar or compressed layouts.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Rgba32 | PixelFormat::Bgra32 => Some(4),
            PixelFormat::Yuyv4 | PixelFormat::Mjpeg | PixelFormat::Nv12 => None,
        }
    }
}
