//! streamview: watch an IP camera or video stream with sound in an SDL2 window

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use streamview::display::{MessageBoxNotifier, Sdl2Display};
use streamview::{Config, DisplaySink, SessionController, SystemBackend};

#[derive(Parser, Debug)]
#[command(version, about = "Real-time viewer for IP cameras and video streams")]
struct Args {
    /// Stream URL, file path or V4L2 device (`/dev/video0`, `v4l2://auto`)
    url: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("streamview=info"));
    let registry = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()),
    );

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let args = Args::parse();
    info!("streamview launching...");

    let config = Config::load(args.config.as_deref())?;

    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = quit.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received");
                quit.store(true, Ordering::Relaxed);
            }
        });
    }

    let (sink, presenter) = DisplaySink::new(config.display.stride_alignment);
    let backend = SystemBackend::new(config.clone());
    info!(audio = ?backend.audio_strategy(), "Media backend ready");
    let mut controller = SessionController::new(
        Box::new(backend),
        sink,
        Box::new(MessageBoxNotifier),
        &config,
    );

    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let mut app = Sdl2Display::new(&sdl_context, &config.display, presenter)?;

    // A failed first attempt is not fatal: `C` retries from the window
    if let Err(e) = controller.connect(&args.url) {
        warn!("Initial connect failed: {}", e);
    }

    // SDL must stay on the main thread; the runtime only serves the signal task
    let result = tokio::task::block_in_place(|| {
        app.run(&sdl_context, &mut controller, &args.url, quit)
    });

    controller.disconnect();
    info!("streamview shutting down");
    result
}
