//! In-memory media backend recording what the controller does to it

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use streamview::audio::AudioPath;
use streamview::capture::FrameMetadata;
use streamview::{
    AudioError, CaptureError, Config, Frame, FrameSource, MediaBackend, Notice, Notifier,
    OpenError, PixelFormat,
};

pub const UNREACHABLE: &str = "rtsp://unreachable.invalid/stream";

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn position(log: &EventLog, event: &str) -> Option<usize> {
    events(log).iter().position(|e| e == event)
}

/// 2x1 BGR frame, every byte `value`
pub fn bgr_frame(sequence: u64, value: u8) -> Frame {
    Frame::new(
        Bytes::from(vec![value; 6]),
        FrameMetadata {
            sequence,
            width: 2,
            height: 1,
            stride: 6,
            format: PixelFormat::Bgr24,
            device_timestamp: None,
        },
    )
}

pub fn test_config(snapshot_dir: &Path) -> Config {
    let mut config = Config::default();
    config.pipeline.frame_interval_ms = 5;
    config.snapshot.directory = snapshot_dir.to_path_buf();
    config
}

pub struct FakeSource {
    log: EventLog,
    /// Fail on this read (1-based); `None` streams forever
    fail_on: Option<u64>,
    reads: u64,
    open: bool,
}

impl FrameSource for FakeSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        self.reads += 1;
        if self.fail_on == Some(self.reads) {
            self.log.lock().unwrap().push("source.fail".into());
            return Err(CaptureError::Stream("connection reset".into()));
        }
        Ok(Some(bgr_frame(self.reads, self.reads as u8)))
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.log.lock().unwrap().push("source.close".into());
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

pub struct FakeAudio {
    log: EventLog,
    fail_start: bool,
    running: bool,
}

impl AudioPath for FakeAudio {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn start(&mut self, _source: &str) -> Result<(), AudioError> {
        self.log.lock().unwrap().push("audio.start".into());
        if self.fail_start {
            return Err(AudioError::Device("no output device".into()));
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().push("audio.stop".into());
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

#[derive(Default)]
pub struct FakeBackend {
    pub log: EventLog,
    pub fail_source_on: Option<u64>,
    pub audio: bool,
    pub fail_audio: bool,
}

impl MediaBackend for FakeBackend {
    fn open_source(&self, url: &str) -> Result<Box<dyn FrameSource>, OpenError> {
        self.log.lock().unwrap().push(format!("source.open {url}"));
        if url == UNREACHABLE {
            return Err(OpenError::ConnectionFailed(format!("could not resolve {url}")));
        }
        Ok(Box::new(FakeSource {
            log: self.log.clone(),
            fail_on: self.fail_source_on,
            reads: 0,
            open: true,
        }))
    }

    fn audio_path(&self) -> Option<Box<dyn AudioPath>> {
        self.audio.then(|| {
            Box::new(FakeAudio {
                log: self.log.clone(),
                fail_start: self.fail_audio,
                running: false,
            }) as Box<dyn AudioPath>
        })
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// Spin until `cond` holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
