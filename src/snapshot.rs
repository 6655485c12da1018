//! Still-image capture of the presented frame

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use image::{ImageFormat, RgbImage};
use tracing::info;

use crate::display::{DisplaySink, Surface};
use crate::error::SnapshotError;

/// `frame_YYYYMMDD_HHMMSS.bmp`
pub fn file_name(now: DateTime<Local>) -> String {
    format!("frame_{}.bmp", now.format("%Y%m%d_%H%M%S"))
}

/// Write the sink's current surface into `dir` as a BMP.
///
/// `Ok(None)` when no surface is bound. The directory is created if needed.
pub fn save_latest(
    sink: &DisplaySink,
    dir: &Path,
    now: DateTime<Local>,
) -> Result<Option<PathBuf>, SnapshotError> {
    let Some(surface) = sink.latest() else {
        return Ok(None);
    };

    fs::create_dir_all(dir).map_err(|source| SnapshotError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = dir.join(file_name(now));
    to_rgb(&surface)
        .save_with_format(&path, ImageFormat::Bmp)
        .map_err(|source| SnapshotError::Encode {
            path: path.clone(),
            source,
        })?;

    info!(
        path = %path.display(),
        width = surface.width(),
        height = surface.height(),
        "Snapshot saved"
    );
    Ok(Some(path))
}

/// Drop alpha and row padding, BGRA to RGB
fn to_rgb(surface: &Surface) -> RgbImage {
    let (width, height) = (surface.width(), surface.height());
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for px in surface.row(y).chunks_exact(4) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
    }
    // Length is exactly width * height * 3
    RgbImage::from_raw(width, height, rgb).unwrap_or_else(|| RgbImage::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn file_name_uses_local_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        assert_eq!(file_name(at), "frame_20240307_090502.bmp");
    }

    #[test]
    fn nothing_bound_saves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("shots");
        let (sink, _presenter) = DisplaySink::new(4);

        let saved = save_latest(&sink, &target, Local::now()).unwrap();
        assert!(saved.is_none());
        assert!(!target.exists());
    }

    #[test]
    fn saves_bmp_with_padding_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("shots");
        // 3 pixels wide: 12-byte rows padded to 16
        let (sink, _presenter) = DisplaySink::new(16);
        sink.ensure_size(3, 2);
        sink.with_locked_buffer(|surface| {
            for y in 0..2 {
                let start = y * surface.stride();
                let row = &mut surface.pixels_mut()[start..start + 12];
                for px in row.chunks_exact_mut(4) {
                    px.copy_from_slice(&[10, 20, 30, 255]);
                }
            }
            Ok::<_, ()>(())
        })
        .unwrap()
        .unwrap();

        let at = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let path = save_latest(&sink, &target, at).unwrap().unwrap();
        assert_eq!(path, target.join("frame_20240102_030405.bmp"));

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (3, 2));
        assert!(img.pixels().all(|p| p.0 == [30, 20, 10]));
    }
}
