//! Fixed-interval acquisition loop
//!
//! The pacer reads a frame, converts it into the display sink and sleeps a
//! fixed interval, regardless of whether a frame arrived. Decode time is not
//! subtracted from the sleep. Stopping is cooperative: the running flag is
//! checked once per iteration.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::capture::{Frame, FrameSource};
use crate::display::{convert_frame, validate_frame, DisplaySink};
use crate::error::CaptureError;

/// Why the loop ended
#[derive(Debug)]
pub enum PacerExit {
    Stopped,
    Failed(CaptureError),
}

/// What the acquisition thread hands back when it finishes
pub struct PacerOutcome {
    pub source: Box<dyn FrameSource>,
    pub exit: PacerExit,
    pub stats: PacerStats,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PacerStats {
    pub iterations: u64,
    pub frames_presented: u64,
    /// Frames the converter rejected
    pub frames_skipped: u64,
}

pub struct FramePacer {
    interval: Duration,
    sink: DisplaySink,
}

/// Handle on a running acquisition thread
pub struct PacerHandle {
    running: Arc<AtomicBool>,
    thread: JoinHandle<PacerOutcome>,
}

impl FramePacer {
    pub fn new(interval: Duration, sink: DisplaySink) -> Self {
        Self { interval, sink }
    }

    /// Move `source` onto a dedicated acquisition thread
    pub fn spawn(self, source: Box<dyn FrameSource>) -> io::Result<PacerHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread = thread::Builder::new()
            .name("frame-pacer".into())
            .spawn(move || self.run(source, &flag))?;
        Ok(PacerHandle { running, thread })
    }

    /// The acquisition loop itself; runs until `running` is cleared or the
    /// source fails.
    pub fn run(&self, mut source: Box<dyn FrameSource>, running: &AtomicBool) -> PacerOutcome {
        info!(interval_ms = self.interval.as_millis() as u64, "Acquisition loop started");
        let mut stats = PacerStats::default();

        let exit = loop {
            if !running.load(Ordering::Acquire) {
                break PacerExit::Stopped;
            }
            stats.iterations += 1;

            match source.read_frame() {
                Ok(Some(frame)) if !frame.is_empty() => {
                    if self.present(&frame) {
                        stats.frames_presented += 1;
                    } else {
                        stats.frames_skipped += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Capture failed: {}", e);
                    break PacerExit::Failed(e);
                }
            }

            thread::sleep(self.interval);
        };

        info!(
            presented = stats.frames_presented,
            skipped = stats.frames_skipped,
            "Acquisition loop finished"
        );
        PacerOutcome {
            source,
            exit,
            stats,
        }
    }

    /// Convert into the sink. A bad frame is dropped, the loop goes on.
    fn present(&self, frame: &Frame) -> bool {
        // Reject before resizing so a bad frame cannot replace the last good one
        let converted = validate_frame(frame).map(|()| {
            self.sink.ensure_size(frame.width(), frame.height());
            self.sink
                .with_locked_buffer(|surface| convert_frame(frame, surface))
        });
        match converted.and_then(|r| r.transpose()) {
            Ok(Some(())) => {
                metrics::counter!("frames_presented").increment(1);
                metrics::histogram!("frame_latency_ms")
                    .record(frame.timestamp.elapsed().as_secs_f64() * 1000.0);
                true
            }
            Err(e) => {
                warn!(sequence = frame.meta.sequence, "Skipping frame: {}", e);
                metrics::counter!("frames_dropped").increment(1);
                false
            }
            Ok(None) => {
                debug!("No surface bound, frame discarded");
                false
            }
        }
    }
}

impl PacerHandle {
    /// Ask the loop to stop; it notices within one interval
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// The loop ended on its own (source failure)
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Stop and wait for the thread, getting the source back for closing.
    ///
    /// `None` if the acquisition thread panicked; the source was dropped (and
    /// thereby closed) during unwinding.
    pub fn join(self) -> Option<PacerOutcome> {
        self.request_stop();
        match self.thread.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                error!("Acquisition thread panicked");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat};
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    enum Step {
        Frame(Frame),
        Nothing,
        Fail,
    }

    struct Scripted {
        steps: VecDeque<Step>,
        reads: Arc<Mutex<u32>>,
    }

    impl FrameSource for Scripted {
        fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
            *self.reads.lock().unwrap() += 1;
            match self.steps.pop_front() {
                Some(Step::Frame(f)) => Ok(Some(f)),
                Some(Step::Nothing) | None => Ok(None),
                Some(Step::Fail) => Err(CaptureError::Stream("boom".into())),
            }
        }
        fn close(&mut self) {}
        fn is_open(&self) -> bool {
            true
        }
    }

    fn bgr(width: u32, height: u32, value: u8, format: PixelFormat) -> Frame {
        let bpp = format.bytes_per_pixel().unwrap_or(3);
        let stride = width as usize * bpp;
        Frame::new(
            Bytes::from(vec![value; stride * height as usize]),
            FrameMetadata {
                sequence: 0,
                width,
                height,
                stride,
                format,
                device_timestamp: None,
            },
        )
    }

    fn scripted(steps: Vec<Step>) -> (Box<dyn FrameSource>, Arc<Mutex<u32>>) {
        let reads = Arc::new(Mutex::new(0));
        let source = Scripted {
            steps: steps.into(),
            reads: reads.clone(),
        };
        (Box::new(source), reads)
    }

    #[test]
    fn failure_ends_loop_and_returns_source() {
        let (sink, presenter) = DisplaySink::new(4);
        let pacer = FramePacer::new(Duration::from_millis(1), sink);
        let (source, reads) = scripted(vec![
            Step::Frame(bgr(2, 2, 7, PixelFormat::Bgr24)),
            Step::Nothing,
            Step::Frame(bgr(2, 2, 1, PixelFormat::Yuyv4)),
            Step::Frame(bgr(3, 1, 9, PixelFormat::Bgr24)),
            Step::Fail,
        ]);

        let running = AtomicBool::new(true);
        let outcome = pacer.run(source, &running);

        assert!(matches!(outcome.exit, PacerExit::Failed(_)));
        assert_eq!(*reads.lock().unwrap(), 5);
        assert_eq!(outcome.stats.frames_presented, 2);
        assert_eq!(outcome.stats.frames_skipped, 1);
        // Latest frame wins and dimensions followed it
        let shown = presenter
            .with_current(|s| (s.width(), s.height(), s.row(0).to_vec()))
            .unwrap();
        assert_eq!(shown, (3, 1, vec![9, 9, 9, 255, 9, 9, 9, 255, 9, 9, 9, 255]));
    }

    #[test]
    fn rejected_frame_keeps_last_good_surface() {
        let (sink, presenter) = DisplaySink::new(4);
        let pacer = FramePacer::new(Duration::from_millis(1), sink);
        let (source, _) = scripted(vec![
            Step::Frame(bgr(2, 2, 7, PixelFormat::Bgr24)),
            Step::Frame(bgr(3, 1, 1, PixelFormat::Yuyv4)),
            Step::Fail,
        ]);

        let outcome = pacer.run(source, &AtomicBool::new(true));
        assert_eq!(outcome.stats.frames_presented, 1);
        assert_eq!(outcome.stats.frames_skipped, 1);

        let shown = presenter
            .with_current(|s| (s.width(), s.height(), s.row(1).to_vec()))
            .unwrap();
        assert_eq!(shown, (2, 2, vec![7, 7, 7, 255, 7, 7, 7, 255]));
    }

    #[test]
    fn empty_frames_are_not_presented() {
        let (sink, presenter) = DisplaySink::new(4);
        let pacer = FramePacer::new(Duration::from_millis(1), sink);
        let (source, _) = scripted(vec![Step::Frame(bgr(0, 0, 1, PixelFormat::Bgr24)), Step::Fail]);

        let outcome = pacer.run(source, &AtomicBool::new(true));
        assert_eq!(outcome.stats.frames_presented, 0);
        assert!(presenter.with_current(|_| ()).is_none());
    }

    #[test]
    fn stop_is_observed_within_one_interval() {
        let interval = Duration::from_millis(50);
        let (sink, _presenter) = DisplaySink::new(4);
        let (source, reads) = scripted(Vec::new());
        let handle = FramePacer::new(interval, sink).spawn(source).unwrap();

        thread::sleep(interval * 3);
        let stopped_at = Instant::now();
        let outcome = handle.join().expect("thread finished");
        let reads_at_stop = *reads.lock().unwrap();

        assert!(matches!(outcome.exit, PacerExit::Stopped));
        assert!(stopped_at.elapsed() < interval + Duration::from_millis(150));
        assert!(reads_at_stop >= 2);
        assert_eq!(outcome.stats.iterations as u32, reads_at_stop);
    }
}
