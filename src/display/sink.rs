//! Display sink: the surface shared between the acquisition thread and the
//! presentation thread.
//!
//! The sink side resizes and writes the surface inside a lock bracket and then
//! posts a repaint. The presenter side waits for repaints and reads the
//! currently bound surface under the same lock. Repaints are coalesced through
//! a one-slot channel, so a slow presenter only ever sees the latest frame.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use flume::{Receiver, Sender, TrySendError};
use tracing::debug;

/// BGRA, alpha-premultiplied pixel surface with padded rows
#[derive(Clone)]
pub struct Surface {
    width: u32,
    height: u32,
    stride: usize,
    data: Vec<u8>,
}

impl Surface {
    /// Allocate a zeroed surface whose rows are padded to `alignment` bytes
    pub fn new(width: u32, height: u32, alignment: usize) -> Self {
        let row_bytes = width as usize * 4;
        let alignment = alignment.max(1);
        let stride = row_bytes.div_ceil(alignment) * alignment;
        Self {
            width,
            height,
            stride,
            data: vec![0; stride * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The visible bytes of row `y`, without padding
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * 4]
    }
}

type SurfaceCell = Mutex<Surface>;

struct Shared {
    current: ArcSwapOption<SurfaceCell>,
    repaint_tx: Sender<()>,
    stride_alignment: usize,
}

fn lock(cell: &SurfaceCell) -> MutexGuard<'_, Surface> {
    // A panic inside a writer leaves the bytes, not the bookkeeping, in doubt
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer side: owned by the acquisition loop
#[derive(Clone)]
pub struct DisplaySink {
    shared: Arc<Shared>,
}

/// Consumer side: owned by the presentation thread
pub struct Presenter {
    shared: Arc<Shared>,
    repaint_rx: Receiver<()>,
}

impl DisplaySink {
    pub fn new(stride_alignment: usize) -> (Self, Presenter) {
        let (repaint_tx, repaint_rx) = flume::bounded(1);
        let shared = Arc::new(Shared {
            current: ArcSwapOption::empty(),
            repaint_tx,
            stride_alignment: stride_alignment.max(1),
        });
        (
            Self {
                shared: shared.clone(),
            },
            Presenter { shared, repaint_rx },
        )
    }

    /// Make sure the bound surface is `width`x`height`.
    ///
    /// Returns `true` when a new surface was allocated and bound. Identical
    /// dimensions keep the existing allocation.
    pub fn ensure_size(&self, width: u32, height: u32) -> bool {
        if let Some(cell) = self.shared.current.load().as_ref() {
            let surface = lock(cell);
            if surface.width == width && surface.height == height {
                return false;
            }
        }

        debug!(width, height, "Allocating display surface");
        let surface = Surface::new(width, height, self.shared.stride_alignment);
        self.shared
            .current
            .store(Some(Arc::new(Mutex::new(surface))));
        true
    }

    /// Run `write` with exclusive access to the bound surface.
    ///
    /// The lock is released on every exit path. A successful write schedules a
    /// repaint. Returns `None` when no surface is bound.
    pub fn with_locked_buffer<T, E>(
        &self,
        write: impl FnOnce(&mut Surface) -> Result<T, E>,
    ) -> Option<Result<T, E>> {
        let cell = self.shared.current.load_full()?;
        let result = {
            let mut surface = lock(&cell);
            write(&mut surface)
        };
        if result.is_ok() {
            self.request_repaint();
        }
        Some(result)
    }

    /// Post a repaint unless one is already pending
    pub fn request_repaint(&self) {
        match self.shared.repaint_tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => debug!("Presenter is gone"),
        }
    }

    /// Unbind the surface, releasing the last rendered frame
    pub fn clear(&self) {
        if self.shared.current.swap(None).is_some() {
            debug!("Display surface released");
        }
        self.request_repaint();
    }

    pub fn is_bound(&self) -> bool {
        self.shared.current.load().is_some()
    }

    /// Copy of the latest surface, if any
    pub fn latest(&self) -> Option<Surface> {
        let cell = self.shared.current.load_full()?;
        let surface = lock(&cell).clone();
        Some(surface)
    }
}

impl Presenter {
    /// Block up to `timeout` for a repaint request
    pub fn wait_repaint(&self, timeout: Duration) -> bool {
        self.repaint_rx.recv_timeout(timeout).is_ok()
    }

    pub fn take_repaint(&self) -> bool {
        self.repaint_rx.try_recv().is_ok()
    }

    /// Read the bound surface under its lock; `None` when nothing is bound
    pub fn with_current<R>(&self, read: impl FnOnce(&Surface) -> R) -> Option<R> {
        let cell = self.shared.current.load_full()?;
        let surface = lock(&cell);
        Some(read(&surface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_addr(sink: &DisplaySink) -> usize {
        sink.with_locked_buffer(|s| Ok::<_, ()>(s.pixels().as_ptr() as usize))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn stride_is_padded_to_alignment() {
        let surface = Surface::new(3, 2, 16);
        assert_eq!(surface.stride(), 16);
        assert_eq!(surface.pixels().len(), 32);
        assert_eq!(surface.row(1).len(), 12);

        let tight = Surface::new(3, 2, 4);
        assert_eq!(tight.stride(), 12);
    }

    #[test]
    fn ensure_size_keeps_buffer_for_same_dimensions() {
        let (sink, _presenter) = DisplaySink::new(4);
        assert!(sink.ensure_size(64, 48));
        let first = buffer_addr(&sink);

        assert!(!sink.ensure_size(64, 48));
        assert_eq!(buffer_addr(&sink), first);

        assert!(sink.ensure_size(32, 48));
        let resized = sink.latest().unwrap();
        assert_eq!((resized.width(), resized.height()), (32, 48));
    }

    #[test]
    fn unbound_sink_refuses_writes() {
        let (sink, presenter) = DisplaySink::new(4);
        assert!(sink.with_locked_buffer(|_| Ok::<_, ()>(())).is_none());
        assert!(presenter.with_current(|_| ()).is_none());
        assert!(!presenter.take_repaint());
    }

    #[test]
    fn repaints_are_coalesced() {
        let (sink, presenter) = DisplaySink::new(4);
        sink.ensure_size(2, 2);
        for value in 1..=5u8 {
            sink.with_locked_buffer(|s| {
                s.pixels_mut().fill(value);
                Ok::<_, ()>(())
            });
        }

        assert!(presenter.take_repaint());
        assert!(!presenter.take_repaint());
        assert_eq!(presenter.with_current(|s| s.pixels()[0]), Some(5));
    }

    #[test]
    fn failed_write_does_not_repaint_and_releases_lock() {
        let (sink, presenter) = DisplaySink::new(4);
        sink.ensure_size(2, 2);
        let result = sink.with_locked_buffer(|_| Err::<(), _>("bad frame"));
        assert_eq!(result, Some(Err("bad frame")));
        assert!(!presenter.take_repaint());

        // Lock was released: a second write goes through
        assert_eq!(sink.with_locked_buffer(|_| Ok::<_, ()>(1)), Some(Ok(1)));
    }

    #[test]
    fn clear_unbinds_and_notifies() {
        let (sink, presenter) = DisplaySink::new(4);
        sink.ensure_size(4, 4);
        sink.clear();
        assert!(!sink.is_bound());
        assert!(sink.latest().is_none());
        assert!(presenter.take_repaint());
        assert!(presenter.with_current(|_| ()).is_none());
    }
}
