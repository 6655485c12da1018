//! External-process audio: an ffmpeg child demuxes the stream's audio track to
//! WAV on stdout, a reader thread turns it into samples for the playback ring.

use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::{AudioFormat, AudioOutput, AudioPath, DefaultOutput, OutputFactory};
use crate::error::AudioError;
use crate::pipeline::SampleProducer;
use crate::AudioConfig;

/// Headers larger than this are not WAV as far as we are concerned
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Build the demuxer command: audio track of `url` as 16-bit WAV on stdout,
/// resampled by ffmpeg to the playback `format`.
pub fn build_ffmpeg_command(ffmpeg_path: &str, url: &str, format: AudioFormat) -> Command {
    let mut cmd = Command::new(ffmpeg_path);
    cmd.arg("-nostdin")
        .arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg(url)
        .arg("-vn")
        .arg("-f")
        .arg("wav")
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg("-ar")
        .arg(format.sample_rate.to_string())
        .arg("-ac")
        .arg(format.channels.to_string())
        .arg("pipe:1");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    cmd
}

/// Demux subprocess feeding a pull-driven playback device
pub struct ExternalProcess {
    config: AudioConfig,
    outputs: Box<dyn OutputFactory>,
    output: Option<Box<dyn AudioOutput>>,
    child: Option<Arc<Mutex<Child>>>,
    reader: Option<JoinHandle<ReaderExit>>,
    running: Arc<AtomicBool>,
}

impl ExternalProcess {
    pub fn new(config: AudioConfig) -> Self {
        Self::with_output(config, Box::new(DefaultOutput))
    }

    pub fn with_output(config: AudioConfig, outputs: Box<dyn OutputFactory>) -> Self {
        Self {
            config,
            outputs,
            output: None,
            child: None,
            reader: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn try_start(&mut self, url: &str) -> Result<(), AudioError> {
        let opened = self
            .outputs
            .open(AudioFormat::from(&self.config), self.config.buffer_ms)?;
        self.output = Some(opened.output);
        let producer = opened.producer;

        let mut child = build_ffmpeg_command(&self.config.ffmpeg_path, url, opened.format)
            .spawn()
            .map_err(|e| {
                let ffmpeg = &self.config.ffmpeg_path;
                match e.kind() {
                    io::ErrorKind::NotFound => AudioError::Unavailable(ffmpeg.clone()),
                    _ => AudioError::Process(format!("failed to launch {ffmpeg}: {e}")),
                }
            })?;
        info!(pid = child.id(), "Demux process started");
        let stdout = child.stdout.take();
        let child = Arc::new(Mutex::new(child));
        self.child = Some(child.clone());
        let stdout =
            stdout.ok_or_else(|| AudioError::Process("demux stdout not captured".into()))?;

        self.running.store(true, Ordering::Release);
        let reader = PcmReader::new(
            stdout,
            producer,
            self.config.read_chunk_bytes,
            self.config.retry_delay(),
        );
        let running = self.running.clone();
        let handle = thread::Builder::new()
            .name("audio-reader".into())
            .spawn(move || reader.run(&running, || child_exited(&child)))
            .map_err(|e| AudioError::Process(format!("failed to spawn reader: {e}")))?;
        self.reader = Some(handle);

        if let Some(output) = &self.output {
            output.play()?;
        }
        Ok(())
    }
}

impl AudioPath for ExternalProcess {
    fn name(&self) -> &'static str {
        "external-process"
    }

    #[instrument(skip(self))]
    fn start(&mut self, source: &str) -> Result<(), AudioError> {
        if self.is_running() {
            return Err(AudioError::AlreadyRunning);
        }
        if let Err(e) = self.try_start(source) {
            self.stop();
            return Err(e);
        }
        Ok(())
    }

    fn stop(&mut self) {
        // Output device first: no callback may outlive the producer side
        if let Some(output) = &self.output {
            output.pause();
        }

        self.running.store(false, Ordering::Release);
        if let Some(child) = self.child.take() {
            let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = child.kill() {
                // Already exited on its own
                debug!("Demux process kill: {}", e);
            }
            match child.wait() {
                Ok(status) => info!(%status, "Demux process stopped"),
                Err(e) => warn!("Failed to reap demux process: {}", e),
            }
        }
        if let Some(reader) = self.reader.take() {
            match reader.join() {
                Ok(exit) => debug!(?exit, "Audio reader finished"),
                Err(_) => warn!("Audio reader panicked"),
            }
        }

        self.output = None;
    }

    fn is_running(&self) -> bool {
        self.output.is_some() || self.child.is_some() || self.reader.is_some()
    }
}

impl Drop for ExternalProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn child_exited(child: &Mutex<Child>) -> bool {
    let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
    !matches!(child.try_wait(), Ok(None))
}

/// Why a reader loop ended
#[derive(Debug)]
pub enum ReaderExit {
    /// The running flag was cleared
    Stopped,
    /// Nothing left to read and the producer is gone
    SourceEnded,
    Failed(io::Error),
}

/// Reads raw demuxer output and pushes whole samples into the ring.
pub struct PcmReader<R> {
    reader: R,
    producer: SampleProducer,
    assembler: PcmAssembler,
    chunk_bytes: usize,
    retry_delay: Duration,
}

impl<R: Read> PcmReader<R> {
    pub fn new(
        reader: R,
        producer: SampleProducer,
        chunk_bytes: usize,
        retry_delay: Duration,
    ) -> Self {
        Self {
            reader,
            producer,
            assembler: PcmAssembler::default(),
            chunk_bytes: chunk_bytes.max(2),
            retry_delay,
        }
    }

    /// Loop until `running` is cleared, the source ends or a read fails.
    ///
    /// A read that yields nothing (zero bytes, `WouldBlock`) is "no data yet":
    /// the loop pauses for the retry delay and tries again. Only when
    /// `source_ended` also reports the producer gone does it stop.
    pub fn run(
        mut self,
        running: &AtomicBool,
        mut source_ended: impl FnMut() -> bool,
    ) -> ReaderExit {
        let mut buf = vec![0u8; self.chunk_bytes];
        let mut empty_reads = 0u64;

        let exit = loop {
            if !running.load(Ordering::Acquire) {
                break ReaderExit::Stopped;
            }

            match self.reader.read(&mut buf) {
                Ok(0) => {
                    empty_reads += 1;
                    if source_ended() {
                        break ReaderExit::SourceEnded;
                    }
                    thread::sleep(self.retry_delay);
                }
                Ok(n) => {
                    let samples = self.assembler.feed(&buf[..n]);
                    if !deliver(&mut self.producer, samples, running, self.retry_delay) {
                        break ReaderExit::Stopped;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    empty_reads += 1;
                    thread::sleep(self.retry_delay);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => break ReaderExit::Failed(e),
            }
        };

        let stats = self.producer.stats();
        info!(
            ?exit,
            empty_reads,
            samples = stats.written,
            dropped = stats.dropped,
            "Audio reader loop ended"
        );
        exit
    }
}

/// Queue every sample, waiting for the consumer to make room.
///
/// The pipe is the back-pressure point: while the ring is full the demuxer
/// blocks on its write instead of samples being dropped. Returns `false` if
/// `running` was cleared while waiting.
fn deliver(
    producer: &mut SampleProducer,
    mut samples: &[i16],
    running: &AtomicBool,
    retry_delay: Duration,
) -> bool {
    loop {
        let written = producer.push_available(samples);
        samples = &samples[written..];
        if samples.is_empty() {
            return true;
        }
        if !running.load(Ordering::Acquire) {
            return false;
        }
        thread::sleep(retry_delay.max(Duration::from_millis(1)));
    }
}

enum HeaderState {
    /// Collecting bytes until the `data` chunk is found
    Probing(Vec<u8>),
    Streaming,
}

/// Turns a byte stream (optionally WAV-framed) into little-endian i16 samples.
///
/// Reads can split the stream anywhere, including inside a sample; the odd
/// byte is carried over to the next chunk.
pub struct PcmAssembler {
    header: HeaderState,
    carry: Option<u8>,
    samples: Vec<i16>,
}

impl Default for PcmAssembler {
    fn default() -> Self {
        Self {
            header: HeaderState::Probing(Vec::new()),
            carry: None,
            samples: Vec::new(),
        }
    }
}

enum HeaderScan {
    NeedMore,
    /// Sample data starts at this offset
    DataAt(usize),
    NotWav,
}

fn scan_wav_header(bytes: &[u8]) -> HeaderScan {
    const RIFF: &[u8] = b"RIFF";
    let head = bytes.len().min(4);
    if bytes[..head] != RIFF[..head] {
        return HeaderScan::NotWav;
    }
    if bytes.len() < 12 {
        return HeaderScan::NeedMore;
    }
    if &bytes[8..12] != b"WAVE" {
        return HeaderScan::NotWav;
    }

    let mut offset = 12;
    loop {
        if bytes.len() < offset + 8 {
            return HeaderScan::NeedMore;
        }
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;
        if id == b"data" {
            return HeaderScan::DataAt(offset + 8);
        }
        // Chunks are word aligned
        offset = offset.saturating_add(8).saturating_add(size).saturating_add(size & 1);
        if offset > MAX_HEADER_BYTES {
            return HeaderScan::NotWav;
        }
    }
}

impl PcmAssembler {
    /// Consume `bytes`, returning the whole samples they complete
    pub fn feed(&mut self, bytes: &[u8]) -> &[i16] {
        self.samples.clear();

        let payload: &[u8];
        let scanned;
        match &mut self.header {
            HeaderState::Streaming => payload = bytes,
            HeaderState::Probing(pending) => {
                pending.extend_from_slice(bytes);
                match scan_wav_header(pending) {
                    HeaderScan::NeedMore if pending.len() <= MAX_HEADER_BYTES => {
                        return &self.samples
                    }
                    HeaderScan::DataAt(start) => {
                        debug!(header_bytes = start, "WAV header skipped");
                        scanned = pending.split_off(start);
                    }
                    HeaderScan::NeedMore | HeaderScan::NotWav => {
                        debug!("No WAV header, treating stream as raw PCM");
                        scanned = std::mem::take(pending);
                    }
                }
                self.header = HeaderState::Streaming;
                payload = &scanned;
            }
        }

        let mut rest = payload;
        if let Some(low) = self.carry.take() {
            match rest.split_first() {
                Some((&high, tail)) => {
                    self.samples.push(i16::from_le_bytes([low, high]));
                    rest = tail;
                }
                None => self.carry = Some(low),
            }
        }
        let mut pairs = rest.chunks_exact(2);
        self.samples
            .extend(pairs.by_ref().map(|pair| i16::from_le_bytes([pair[0], pair[1]])));
        if let [odd] = pairs.remainder() {
            self.carry = Some(*odd);
        }

        &self.samples
    }
}
