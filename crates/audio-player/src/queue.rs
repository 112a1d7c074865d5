//! FIFO queue of mono `f32` samples between the network handler and the output pull.
//!
//! The queue grows on every inbound chunk and shrinks on every output pull. Reads never
//! block and never pad: asking for more than is buffered returns what is there.
//! The queue does no locking of its own; [`SharedQueue`] is how the controller shares it
//! with the audio thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Queue handle shared between the controller and the output pull callback.
pub type SharedQueue = Arc<Mutex<SampleQueue>>;

/// Lock a shared queue, recovering the data if a previous holder panicked.
pub fn lock_queue(queue: &SharedQueue) -> MutexGuard<'_, SampleQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Append/consume buffer of mono samples.
///
/// Samples are read back in exactly the order they were written, regardless of how
/// writes and reads are sized. An optional cap bounds memory by evicting the oldest
/// samples once the buffered length would exceed it.
#[derive(Debug, Default)]
pub struct SampleQueue {
    samples: VecDeque<f32>,
    max_samples: Option<usize>,
}

impl SampleQueue {
    /// Unbounded empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty queue holding at most `max_samples` (a cap of zero means unbounded).
    pub fn with_max_samples(max_samples: Option<usize>) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.filter(|max| *max > 0),
        }
    }

    /// Configured cap, if any.
    pub fn max_samples(&self) -> Option<usize> {
        self.max_samples
    }

    /// Append `chunk` to the tail.
    ///
    /// Returns how many samples were evicted from the head to stay under the cap
    /// (always 0 for an unbounded queue).
    pub fn write(&mut self, chunk: &[f32]) -> usize {
        let Some(max) = self.max_samples else {
            self.samples.extend(chunk.iter().copied());
            return 0;
        };

        if chunk.len() >= max {
            let evicted = self.samples.len() + chunk.len() - max;
            self.samples.clear();
            self.samples.extend(chunk[chunk.len() - max..].iter().copied());
            return evicted;
        }

        self.samples.extend(chunk.iter().copied());
        let excess = self.samples.len().saturating_sub(max);
        if excess > 0 {
            self.samples.drain(..excess);
        }
        excess
    }

    /// Remove and return the first `min(n, len)` samples.
    pub fn read(&mut self, n: usize) -> Vec<f32> {
        let take = n.min(self.samples.len());
        self.samples.drain(..take).collect()
    }

    /// Move the first `min(out.len(), len)` samples into `out`, returning the count.
    ///
    /// Samples past the returned count are left untouched.
    pub fn read_into(&mut self, out: &mut [f32]) -> usize {
        let take = out.len().min(self.samples.len());
        for (dst, src) in out.iter_mut().zip(self.samples.drain(..take)) {
            *dst = src;
        }
        take
    }

    /// Buffered sample count.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
