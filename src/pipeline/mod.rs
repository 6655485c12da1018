pub mod pacer;
pub mod ringbuf;

pub use pacer::{FramePacer, PacerExit, PacerHandle, PacerOutcome, PacerStats};
pub use ringbuf::{sample_ring, RingStats, SampleConsumer, SampleProducer};
