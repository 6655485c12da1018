use std::io::Write;
use std::path::PathBuf;

use streamview::{AudioStrategy, CaptureDevice, Config};

#[test]
fn defaults_load_without_a_file() {
    let config = Config::load(None).unwrap();

    assert_eq!(config.capture.read_timeout_ms, 100);
    assert_eq!(config.display.stride_alignment, 4);
    assert_eq!(config.audio.strategy, AudioStrategy::Auto);
    assert_eq!(config.audio.sample_rate, 44_100);
    assert_eq!(config.audio.retry_delay_ms, 50);
    assert_eq!(config.snapshot.directory, PathBuf::from("savedframes"));
}

#[test]
fn file_overrides_only_what_it_names() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[audio]
strategy = "direct-capture"
capture_device = "microphone"
buffer_ms = 500

[snapshot]
directory = "/tmp/shots"
"#
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();

    assert_eq!(config.audio.strategy, AudioStrategy::DirectCapture);
    assert_eq!(config.audio.capture_device, CaptureDevice::Microphone);
    assert_eq!(config.audio.buffer_ms, 500);
    assert_eq!(config.audio.ring_capacity(), 44_100 * 2 / 2);
    assert_eq!(config.snapshot.directory, PathBuf::from("/tmp/shots"));
    // Untouched sections keep their defaults
    assert_eq!(config.audio.sample_rate, 44_100);
    assert_eq!(config.capture.open_timeout_ms, 5_000);
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
}

#[test]
fn environment_overrides_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[pipeline]\nframe_interval_ms = 100").unwrap();

    std::env::set_var("STREAMVIEW__PIPELINE__FRAME_INTERVAL_MS", "33");
    let config = Config::load(Some(file.path()));
    std::env::remove_var("STREAMVIEW__PIPELINE__FRAME_INTERVAL_MS");

    let config = config.unwrap();
    assert_eq!(config.pipeline.frame_interval_ms, 33);
}
