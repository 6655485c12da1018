use bytes::Bytes;
use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};
use tracing::debug;

use super::frame::{Frame, FrameMetadata, PixelFormat};

/// Decode one MJPEG payload into a packed RGB24 frame.
///
/// Corrupt or truncated JPEGs are common on USB cameras right after stream
/// start; they come back as `None` so the caller simply skips the tick.
pub fn decode_mjpeg(data: &[u8], sequence: u64) -> Option<Frame> {
    let mut decoder = Decoder::new(data);
    let pixels = match decoder.decode() {
        Ok(pixels) => pixels,
        Err(e) => {
            debug!(sequence, "Dropping undecodable MJPEG frame: {}", e);
            return None;
        }
    };
    let info = decoder.info()?;

    let width = info.width as u32;
    let height = info.height as u32;
    let rgb = match info.pixel_format {
        JpegPixelFormat::RGB24 => pixels,
        JpegPixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
        other => {
            debug!(sequence, "Unsupported JPEG pixel format {:?}", other);
            return None;
        }
    };

    Some(Frame::new(
        Bytes::from(rgb),
        FrameMetadata {
            sequence,
            width,
            height,
            stride: width as usize * 3,
            format: PixelFormat::Rgb24,
            device_timestamp: None,
        },
    ))
}
