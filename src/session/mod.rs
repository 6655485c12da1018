//! Session lifecycle: connect, stream, disconnect
//!
//! A [`Session`] owns every per-connection resource (acquisition thread, frame
//! source, audio path). The controller is the only place that creates or
//! destroys one, and it always tears down in the same order: stop flag, audio,
//! join the acquisition thread, close the source, clear the surface.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use tracing::{error, info, instrument, warn};

use crate::audio::{self, AudioPath};
use crate::capture::{self, FrameSource};
use crate::display::DisplaySink;
use crate::error::{ConnectError, OpenError, SnapshotError};
use crate::pipeline::{FramePacer, PacerExit, PacerHandle};
use crate::{snapshot, AudioStrategy, Config};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Disconnecting,
}

/// Something the user should be told about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ConnectFailed(String),
    SnapshotSaved(PathBuf),
    StreamLost(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::ConnectFailed(reason) => write!(f, "Could not connect: {reason}"),
            Notice::SnapshotSaved(path) => write!(f, "Frame saved to {}", path.display()),
            Notice::StreamLost(reason) => write!(f, "Stream lost: {reason}"),
        }
    }
}

pub trait Notifier {
    fn notify(&self, notice: Notice);
}

/// Where sessions get their frame sources and audio paths from
pub trait MediaBackend {
    fn open_source(&self, url: &str) -> Result<Box<dyn FrameSource>, OpenError>;

    /// A fresh, stopped audio path, or `None` when audio is disabled
    fn audio_path(&self) -> Option<Box<dyn AudioPath>>;
}

/// GStreamer/V4L2 capture plus whichever audio strategy probing selected
pub struct SystemBackend {
    config: Config,
    strategy: AudioStrategy,
}

impl SystemBackend {
    /// Detects the audio strategy once; sessions reuse the result.
    pub fn new(config: Config) -> Self {
        let strategy = audio::detect_strategy(&config.audio);
        Self { config, strategy }
    }

    pub fn audio_strategy(&self) -> AudioStrategy {
        self.strategy
    }
}

impl MediaBackend for SystemBackend {
    fn open_source(&self, url: &str) -> Result<Box<dyn FrameSource>, OpenError> {
        capture::open(url, &self.config)
    }

    fn audio_path(&self) -> Option<Box<dyn AudioPath>> {
        audio::create_path(self.strategy, &self.config.audio)
    }
}

/// Resources of one live connection
struct Session {
    url: String,
    pacer: PacerHandle,
    audio: Option<Box<dyn AudioPath>>,
}

pub struct SessionController {
    backend: Box<dyn MediaBackend>,
    sink: DisplaySink,
    notifier: Box<dyn Notifier>,
    frame_interval: Duration,
    snapshot_dir: PathBuf,
    state: SessionState,
    session: Option<Session>,
}

impl SessionController {
    pub fn new(
        backend: Box<dyn MediaBackend>,
        sink: DisplaySink,
        notifier: Box<dyn Notifier>,
        config: &Config,
    ) -> Self {
        Self {
            backend,
            sink,
            notifier,
            frame_interval: config.pipeline.frame_interval(),
            snapshot_dir: config.snapshot.directory.clone(),
            state: SessionState::Idle,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the current session has a running audio path
    pub fn has_audio(&self) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.audio.as_ref())
            .is_some_and(|a| a.is_running())
    }

    /// Open `url` and start streaming it.
    ///
    /// Fails with [`ConnectError::Busy`] unless idle. An open failure notifies
    /// the user once and leaves the controller idle. Audio that fails to start
    /// is logged and the session streams without it.
    #[instrument(skip(self))]
    pub fn connect(&mut self, url: &str) -> Result<(), ConnectError> {
        if self.state != SessionState::Idle {
            return Err(ConnectError::Busy(self.state));
        }
        self.state = SessionState::Connecting;

        let opened = capture::validate_url(url).and_then(|url| self.backend.open_source(url));
        let source = match opened {
            Ok(source) => source,
            Err(e) => {
                warn!("Connection failed: {}", e);
                self.state = SessionState::Idle;
                self.notifier.notify(Notice::ConnectFailed(e.to_string()));
                return Err(e.into());
            }
        };
        let url = url.trim().to_string();
        info!(url = %url, "Source opened");

        let pacer = FramePacer::new(self.frame_interval, self.sink.clone());
        // Audio joins only once video is certain to run
        let pacer = match pacer.spawn(source) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to spawn acquisition thread: {}", e);
                // The source moved into the failed spawn closure and was dropped
                self.sink.clear();
                self.state = SessionState::Idle;
                self.notifier.notify(Notice::ConnectFailed(e.to_string()));
                return Err(ConnectError::Spawn(e));
            }
        };

        let audio = self.backend.audio_path().and_then(|mut path| {
            match path.start(&url) {
                Ok(()) => {
                    info!(strategy = path.name(), "Audio started");
                    Some(path)
                }
                Err(e) => {
                    warn!(strategy = path.name(), "Audio unavailable, continuing without: {}", e);
                    path.stop();
                    None
                }
            }
        });

        self.session = Some(Session { url, pacer, audio });
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Tear the session down. No-op when idle.
    pub fn disconnect(&mut self) {
        if let Some(exit) = self.teardown() {
            info!(?exit, "Disconnected");
        }
    }

    /// Check the acquisition thread; a source failure ends the session and
    /// notifies the user. Call regularly from the presentation loop.
    pub fn poll(&mut self) {
        let faulted = self
            .session
            .as_ref()
            .is_some_and(|session| session.pacer.is_finished());
        if !faulted {
            return;
        }

        match self.teardown() {
            Some(PacerExit::Failed(e)) => {
                error!("Stream lost: {}", e);
                self.notifier.notify(Notice::StreamLost(e.to_string()));
            }
            Some(PacerExit::Stopped) => {}
            None => self
                .notifier
                .notify(Notice::StreamLost("acquisition thread panicked".into())),
        }
    }

    /// Save the latest presented frame. `Ok(None)` when there is nothing to save.
    pub fn snapshot(&self) -> Result<Option<PathBuf>, SnapshotError> {
        let saved = snapshot::save_latest(&self.sink, &self.snapshot_dir, Local::now())?;
        if let Some(path) = &saved {
            self.notifier.notify(Notice::SnapshotSaved(path.clone()));
        }
        Ok(saved)
    }

    /// Returns how the acquisition loop ended, `None` if there was no
    /// session or the thread panicked.
    fn teardown(&mut self) -> Option<PacerExit> {
        let session = self.session.take()?;
        self.state = SessionState::Disconnecting;
        info!(url = %session.url, "Tearing down session");

        let Session { pacer, audio, .. } = session;
        pacer.request_stop();
        if let Some(mut audio) = audio {
            audio.stop();
        }

        let exit = match pacer.join() {
            Some(mut outcome) => {
                outcome.source.close();
                info!(
                    iterations = outcome.stats.iterations,
                    presented = outcome.stats.frames_presented,
                    skipped = outcome.stats.frames_skipped,
                    "Acquisition stopped"
                );
                Some(outcome.exit)
            }
            None => None,
        };

        self.sink.clear();
        self.state = SessionState::Idle;
        exit
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.disconnect();
    }
}
