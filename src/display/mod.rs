pub mod display;
pub mod pixels;
pub mod sink;

pub use display::{MessageBoxNotifier, Sdl2Display};
pub use pixels::{convert_frame, convert_rows, validate_frame};
pub use sink::{DisplaySink, Presenter, Surface};
