//! SDL2 Window Display Module
//! Presents the display sink's surface in an SDL2 window and turns key presses
//! into session commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Scancode;
use sdl2::messagebox::{show_simple_message_box, MessageBoxFlag};
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, Texture, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::{info, warn};

use crate::display::Presenter;
use crate::session::{Notice, Notifier, SessionController};
use crate::DisplayConfig;

/// How long one loop turn waits for a repaint before polling events again
const REPAINT_WAIT: Duration = Duration::from_millis(10);

/// Byte order the sink writes (B, G, R, A), whatever the host endianness
const SURFACE_FORMAT: PixelFormatEnum = PixelFormatEnum::BGRA32;

/// SDL2 Window Display
/// Surfaces are uploaded without conversion.
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    presenter: Presenter,
}

impl Sdl2Display {
    pub fn new(
        sdl_context: &sdl2::Sdl,
        config: &DisplayConfig,
        presenter: Presenter,
    ) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window(&config.title, config.width, config.height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            presenter,
        })
    }

    /// Event loop: runs until the window closes, Esc is pressed or `quit` is set.
    ///
    /// Keys: `S` snapshot, `C` connect to `url`, `D` disconnect.
    pub fn run(
        &mut self,
        sdl_context: &sdl2::Sdl,
        controller: &mut SessionController,
        url: &str,
        quit: Arc<AtomicBool>,
    ) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
        let mut texture: Option<(Texture<'_>, u32, u32)> = None;

        'running: while !quit.load(Ordering::Relaxed) {
            for event in event_pump.poll_iter() {
                match event {
                    Event::Quit { .. }
                    | Event::KeyDown {
                        scancode: Some(Scancode::Escape),
                        ..
                    } => {
                        info!("Quit event received");
                        break 'running;
                    }
                    Event::KeyDown {
                        scancode: Some(Scancode::S),
                        ..
                    } => {
                        if let Err(e) = controller.snapshot() {
                            warn!("Snapshot failed: {}", e);
                        }
                    }
                    Event::KeyDown {
                        scancode: Some(Scancode::C),
                        ..
                    } => {
                        if let Err(e) = controller.connect(url) {
                            warn!("Connect failed: {}", e);
                        }
                    }
                    Event::KeyDown {
                        scancode: Some(Scancode::D),
                        ..
                    } => controller.disconnect(),
                    _ => {}
                }
            }

            controller.poll();

            if !self.presenter.wait_repaint(REPAINT_WAIT) {
                continue;
            }

            let creator = &self.texture_creator;
            let uploaded = self.presenter.with_current(|surface| -> Result<()> {
                let (width, height) = (surface.width(), surface.height());
                let stale = !matches!(&texture, Some((_, w, h)) if *w == width && *h == height);
                if stale {
                    let fresh = creator
                        .create_texture_streaming(SURFACE_FORMAT, width, height)
                        .map_err(|e| eyre!(e))?;
                    texture = Some((fresh, width, height));
                }
                if let Some((tex, _, _)) = texture.as_mut() {
                    tex.update(None, surface.pixels(), surface.stride())
                        .map_err(|e| eyre!(e))?;
                }
                Ok(())
            });

            self.canvas.clear();
            match uploaded {
                Some(result) => {
                    result?;
                    if let Some((tex, _, _)) = texture.as_ref() {
                        self.canvas.copy(tex, None, None).map_err(|e| eyre!(e))?;
                    }
                }
                // Surface released on disconnect
                None => texture = None,
            }
            self.canvas.present();
        }

        Ok(())
    }
}

/// Modal SDL message boxes for session notices
pub struct MessageBoxNotifier;

impl Notifier for MessageBoxNotifier {
    fn notify(&self, notice: Notice) {
        let (flag, title) = match &notice {
            Notice::ConnectFailed(_) | Notice::StreamLost(_) => {
                (MessageBoxFlag::ERROR, "Connection")
            }
            Notice::SnapshotSaved(_) => (MessageBoxFlag::INFORMATION, "Snapshot"),
        };
        if let Err(e) = show_simple_message_box(flag, title, &notice.to_string(), None::<&Window>) {
            warn!("Failed to show message box: {}", e);
        }
    }
}
