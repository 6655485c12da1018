use std::path::{Path, PathBuf};

use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::error::OpenError;

/// Highest `videoN` index tried
const MAX_NODES: u32 = 10;

/// Existing `video0..9` nodes under `dev_dir`, in index order
fn candidate_nodes(dev_dir: &Path) -> Vec<PathBuf> {
    (0..MAX_NODES)
        .map(|i| dev_dir.join(format!("video{i}")))
        .filter(|path| path.exists())
        .collect()
}

/// Path of the first MJPEG-capable capture node among `/dev/video0..9`
pub fn auto_detect_device() -> Result<String, OpenError> {
    info!("Auto-detecting capture devices...");

    for path in candidate_nodes(Path::new("/dev")) {
        let path = path.to_string_lossy().into_owned();
        let Ok(dev) = Device::with_path(&path) else {
            debug!("Skipping {}: cannot open", path);
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        if let Ok(formats) = dev.enum_formats() {
            if formats.iter().any(|fmt| fmt.fourcc == FourCC::new(b"MJPG")) {
                info!("Found MJPEG device: {} - {}", path, caps.card);
                return Ok(path);
            }
            debug!("Skipping {}: no MJPEG format", path);
        }
    }

    Err(OpenError::ConnectionFailed(
        "no MJPEG capture device found".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_existing_nodes_are_tried_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["video3", "video0", "video12", "media0"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let nodes = candidate_nodes(dir.path());
        assert_eq!(nodes, vec![dir.path().join("video0"), dir.path().join("video3")]);
    }
}
