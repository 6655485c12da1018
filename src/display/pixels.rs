//! Pixel conversion from decoder layouts into the BGRA display surface

use std::time::Instant;

use crate::capture::{Frame, PixelFormat};
use crate::display::sink::Surface;
use crate::error::FormatError;

const OPAQUE: u8 = 255;

/// Convert `frame` into `surface`, which must already have the frame's size.
pub fn convert_frame(frame: &Frame, surface: &mut Surface) -> Result<(), FormatError> {
    let meta = &frame.meta;
    if surface.width() != meta.width || surface.height() != meta.height {
        return Err(FormatError::DimensionMismatch {
            frame_width: meta.width,
            frame_height: meta.height,
            surface_width: surface.width(),
            surface_height: surface.height(),
        });
    }

    let start = Instant::now();
    let dst_stride = surface.stride();
    convert_rows(
        meta.format,
        meta.width as usize,
        meta.height as usize,
        &frame.data,
        meta.stride,
        surface.pixels_mut(),
        dst_stride,
    )?;
    metrics::histogram!("convert_time_us").record(start.elapsed().as_micros() as f64);
    Ok(())
}

/// Bytes a strided buffer must hold: full strides for all rows but the last.
fn required_len(stride: usize, row_bytes: usize, height: usize) -> usize {
    match height {
        0 => 0,
        h => stride * (h - 1) + row_bytes,
    }
}

/// Check that `frame` can be converted at all, before any surface is touched.
pub fn validate_frame(frame: &Frame) -> Result<(), FormatError> {
    let meta = &frame.meta;
    check_source(
        meta.format,
        meta.width as usize,
        meta.height as usize,
        frame.data.len(),
        meta.stride,
    )
    .map(|_| ())
}

/// Source-side preconditions; returns the source row length in bytes
fn check_source(
    format: PixelFormat,
    width: usize,
    height: usize,
    src_len: usize,
    src_stride: usize,
) -> Result<usize, FormatError> {
    let bpp = format
        .bytes_per_pixel()
        .ok_or(FormatError::UnsupportedFormat(format))?;

    let src_row = width * bpp;
    if src_stride < src_row {
        return Err(FormatError::StrideTooSmall {
            stride: src_stride,
            row_bytes: src_row,
        });
    }
    let src_required = required_len(src_stride, src_row, height);
    if src_len < src_required {
        return Err(FormatError::BufferTooSmall {
            required: src_required,
            actual: src_len,
        });
    }
    Ok(src_row)
}

/// Row-by-row conversion into B, G, R, A byte order.
///
/// Only the logical `width` pixels of each row are read and written; padding
/// on either side is never touched. All validation happens before the first
/// byte is written.
pub fn convert_rows(
    format: PixelFormat,
    width: usize,
    height: usize,
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
) -> Result<(), FormatError> {
    let src_row = check_source(format, width, height, src.len(), src_stride)?;

    let dst_row = width * 4;
    if dst_stride < dst_row {
        return Err(FormatError::StrideTooSmall {
            stride: dst_stride,
            row_bytes: dst_row,
        });
    }
    let dst_required = required_len(dst_stride, dst_row, height);
    if dst.len() < dst_required {
        return Err(FormatError::BufferTooSmall {
            required: dst_required,
            actual: dst.len(),
        });
    }

    for y in 0..height {
        let s = &src[y * src_stride..y * src_stride + src_row];
        let d = &mut dst[y * dst_stride..y * dst_stride + dst_row];

        match format {
            PixelFormat::Bgra32 => d.copy_from_slice(s),
            PixelFormat::Bgr24 => {
                for (d, s) in d.chunks_exact_mut(4).zip(s.chunks_exact(3)) {
                    d[..3].copy_from_slice(s);
                    d[3] = OPAQUE;
                }
            }
            PixelFormat::Rgb24 => {
                for (d, s) in d.chunks_exact_mut(4).zip(s.chunks_exact(3)) {
                    d[0] = s[2];
                    d[1] = s[1];
                    d[2] = s[0];
                    d[3] = OPAQUE;
                }
            }
            PixelFormat::Rgba32 => {
                for (d, s) in d.chunks_exact_mut(4).zip(s.chunks_exact(4)) {
                    d[0] = s[2];
                    d[1] = s[1];
                    d[2] = s[0];
                    d[3] = s[3];
                }
            }
            PixelFormat::Yuyv4 | PixelFormat::Mjpeg | PixelFormat::Nv12 => {
                unreachable!("rejected by bytes_per_pixel")
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameMetadata;
    use bytes::Bytes;

    const SENTINEL: u8 = 0xA5;

    fn frame(format: PixelFormat, width: u32, height: u32, stride: usize, data: Vec<u8>) -> Frame {
        Frame::new(
            Bytes::from(data),
            FrameMetadata {
                sequence: 1,
                width,
                height,
                stride,
                format,
                device_timestamp: None,
            },
        )
    }

    #[test]
    fn bgr_pixels_gain_opaque_alpha() {
        let src = [10, 20, 30, 40, 50, 60];
        let mut dst = [0u8; 8];
        convert_rows(PixelFormat::Bgr24, 2, 1, &src, 6, &mut dst, 8).unwrap();
        assert_eq!(dst, [10, 20, 30, 255, 40, 50, 60, 255]);
    }

    #[test]
    fn bgra_rows_are_copied_verbatim() {
        let src = [1, 2, 3, 4, 5, 6, 7, 0];
        let mut dst = [0u8; 8];
        convert_rows(PixelFormat::Bgra32, 2, 1, &src, 8, &mut dst, 8).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn rgb_sources_are_reordered() {
        let src = [30, 20, 10, 60, 50, 40];
        let mut dst = [0u8; 8];
        convert_rows(PixelFormat::Rgb24, 2, 1, &src, 6, &mut dst, 8).unwrap();
        assert_eq!(dst, [10, 20, 30, 255, 40, 50, 60, 255]);

        let src = [30, 20, 10, 128];
        let mut dst = [0u8; 4];
        convert_rows(PixelFormat::Rgba32, 1, 1, &src, 4, &mut dst, 4).unwrap();
        assert_eq!(dst, [10, 20, 30, 128]);
    }

    #[test]
    fn compressed_and_planar_formats_are_rejected() {
        let mut dst = [0u8; 16];
        for format in [PixelFormat::Mjpeg, PixelFormat::Yuyv4, PixelFormat::Nv12] {
            assert_eq!(
                convert_rows(format, 2, 2, &[0; 16], 8, &mut dst, 8),
                Err(FormatError::UnsupportedFormat(format))
            );
        }
        assert_eq!(dst, [0u8; 16]);
    }

    #[test]
    fn short_buffers_fail_before_writing() {
        let mut dst = [SENTINEL; 16];
        let err = convert_rows(PixelFormat::Bgr24, 2, 2, &[0; 8], 6, &mut dst, 8).unwrap_err();
        assert_eq!(err, FormatError::BufferTooSmall { required: 12, actual: 8 });
        assert_eq!(dst, [SENTINEL; 16]);

        let err = convert_rows(PixelFormat::Bgr24, 2, 1, &[0; 6], 4, &mut dst, 8).unwrap_err();
        assert_eq!(err, FormatError::StrideTooSmall { stride: 4, row_bytes: 6 });
    }

    /// Every (width, height, padding) combination leaves row padding and the
    /// guard bytes after the destination untouched, and every pixel gets the
    /// right alpha.
    #[test]
    fn padding_and_guards_survive_all_shapes() {
        for format in [PixelFormat::Bgr24, PixelFormat::Bgra32] {
            let bpp = format.bytes_per_pixel().unwrap();
            for width in 1..=9usize {
                for height in 1..=5usize {
                    for (src_pad, dst_pad) in [(0, 0), (1, 4), (5, 12), (3, 0), (0, 8)] {
                        let src_stride = width * bpp + src_pad;
                        let dst_stride = width * 4 + dst_pad;

                        // Source: pixel bytes count up, padding holds the sentinel
                        let mut src = vec![SENTINEL; src_stride * height];
                        for y in 0..height {
                            for x in 0..width * bpp {
                                src[y * src_stride + x] = ((y * 31 + x * 7) % 251) as u8;
                            }
                        }

                        let guard = 16;
                        let mut dst = vec![SENTINEL; dst_stride * height + guard];
                        convert_rows(format, width, height, &src, src_stride, &mut dst, dst_stride)
                            .unwrap();

                        for y in 0..height {
                            for x in 0..width {
                                let d = &dst[y * dst_stride + x * 4..][..4];
                                let s = &src[y * src_stride + x * bpp..][..bpp];
                                assert_eq!(&d[..3], &s[..3]);
                                let alpha = if bpp == 4 { s[3] } else { 255 };
                                assert_eq!(d[3], alpha);
                            }
                            let padding = &dst[y * dst_stride + width * 4..(y + 1) * dst_stride];
                            assert!(padding.iter().all(|&b| b == SENTINEL));
                        }
                        assert!(dst[dst_stride * height..].iter().all(|&b| b == SENTINEL));
                    }
                }
            }
        }
    }

    #[test]
    fn last_row_needs_no_trailing_padding() {
        // Decoders may drop the padding after the final row
        let src = [1, 2, 3, 0xEE, 4, 5, 6];
        let mut dst = [0u8; 8];
        convert_rows(PixelFormat::Bgr24, 1, 2, &src, 4, &mut dst, 4).unwrap();
        assert_eq!(dst, [1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn convert_frame_checks_surface_size() {
        let frame = frame(PixelFormat::Bgr24, 2, 1, 6, vec![10, 20, 30, 40, 50, 60]);

        let mut wrong = Surface::new(3, 1, 4);
        assert!(matches!(
            convert_frame(&frame, &mut wrong),
            Err(FormatError::DimensionMismatch { .. })
        ));

        let mut surface = Surface::new(2, 1, 16);
        convert_frame(&frame, &mut surface).unwrap();
        assert_eq!(surface.row(0), &[10, 20, 30, 255, 40, 50, 60, 255]);
        assert_eq!(&surface.pixels()[8..], &[0u8; 8]);
    }
}
