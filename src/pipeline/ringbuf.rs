//! Lock-free ring buffer between audio producers and the playback callback

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Create an SPSC ring of interleaved 16-bit samples.
///
/// The producer lives on the capture callback or the demux reader thread, the
/// consumer inside the output device callback.
pub fn sample_ring(capacity: usize) -> (SampleProducer, SampleConsumer) {
    let (prod, cons) = HeapRb::<i16>::new(capacity.max(1)).split();
    let stats = Arc::new(CachePadded::new(Stats::default()));
    (
        SampleProducer {
            prod,
            stats: stats.clone(),
        },
        SampleConsumer { cons, stats },
    )
}

#[derive(Default)]
struct Stats {
    samples_written: AtomicU64,
    samples_read: AtomicU64,
    samples_dropped: AtomicU64,
    underrun_samples: AtomicU64,
}

/// Counters shared by both ends of a ring
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub written: u64,
    pub read: u64,
    /// Incoming samples discarded because the ring was full
    pub dropped: u64,
    /// Output samples filled with silence because the ring was empty
    pub underrun: u64,
}

pub struct SampleProducer {
    prod: HeapProd<i16>,
    stats: Arc<CachePadded<Stats>>,
}

pub struct SampleConsumer {
    cons: HeapCons<i16>,
    stats: Arc<CachePadded<Stats>>,
}

impl SampleProducer {
    /// Append samples in order. Whatever does not fit is dropped and counted;
    /// the samples already queued are never touched.
    pub fn push(&mut self, samples: &[i16]) -> usize {
        let written = self.prod.push_slice(samples);
        self.stats
            .samples_written
            .fetch_add(written as u64, Ordering::Relaxed);

        let dropped = samples.len() - written;
        if dropped > 0 {
            self.stats
                .samples_dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
            metrics::counter!("audio_overflow_samples").increment(dropped as u64);
        }
        written
    }

    /// Append as many samples as fit right now, in order, and report how
    /// many that was. Nothing is dropped; the caller keeps the rest.
    pub fn push_available(&mut self, samples: &[i16]) -> usize {
        let written = self.prod.push_slice(samples);
        self.stats
            .samples_written
            .fetch_add(written as u64, Ordering::Relaxed);
        written
    }

    pub fn free_len(&self) -> usize {
        self.prod.vacant_len()
    }

    pub fn stats(&self) -> RingStats {
        load(&self.stats)
    }
}

impl SampleConsumer {
    /// Fill `out` from the ring, padding with silence on underrun.
    ///
    /// Returns how many real samples were copied.
    pub fn fill(&mut self, out: &mut [i16]) -> usize {
        let read = self.cons.pop_slice(out);
        out[read..].fill(0);
        self.stats
            .samples_read
            .fetch_add(read as u64, Ordering::Relaxed);

        let missing = out.len() - read;
        if missing > 0 && read > 0 {
            // Only count gaps inside a stream, not idle silence before data
            self.stats
                .underrun_samples
                .fetch_add(missing as u64, Ordering::Relaxed);
            metrics::counter!("audio_underrun_samples").increment(missing as u64);
        }
        read
    }

    pub fn len(&self) -> usize {
        self.cons.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.cons.is_empty()
    }

    pub fn stats(&self) -> RingStats {
        load(&self.stats)
    }
}

fn load(stats: &Stats) -> RingStats {
    RingStats {
        written: stats.samples_written.load(Ordering::Relaxed),
        read: stats.samples_read.load(Ordering::Relaxed),
        dropped: stats.samples_dropped.load(Ordering::Relaxed),
        underrun: stats.underrun_samples.load(Ordering::Relaxed),
    }
}
