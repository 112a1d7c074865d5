use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use live_audio_types::{ListenerStatus, PlaybackState};

/// Counters updated by the chunk handler and the output pull callback.
///
/// Shared between threads; all counters use relaxed ordering since they are only
/// read for reporting.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Gauge of samples waiting in the queue after the last write/read.
    pub buffered_samples: AtomicU64,
    /// Pulls that found the queue empty.
    pub underrun_events: AtomicU64,
    /// Samples emitted as silence, including zero padding of short blocks.
    pub underrun_samples: AtomicU64,
    /// Samples dropped from the queue head to honor the cap.
    pub evicted_samples: AtomicU64,
    /// Sound chunks written into the queue.
    pub received_chunks: AtomicU64,
    /// Sound chunks ignored while stopped.
    pub discarded_chunks: AtomicU64,
    /// Sound chunks whose payload failed to decode.
    pub malformed_chunks: AtomicU64,
}

impl PipelineStats {
    /// Create a shared counter set.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_buffered(&self, samples: usize) {
        self.buffered_samples.store(samples as u64, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        if n > 0 {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    /// Build a status snapshot from the counters plus controller-owned fields.
    pub fn snapshot(
        &self,
        state: PlaybackState,
        block_size: usize,
        sample_rate: u32,
        device: Option<String>,
        capacity: Option<usize>,
    ) -> ListenerStatus {
        ListenerStatus {
            state,
            block_size,
            sample_rate,
            device,
            buffered_samples: self.buffered_samples.load(Ordering::Relaxed),
            buffer_capacity_samples: capacity.map(|c| c as u64),
            underrun_events: self.underrun_events.load(Ordering::Relaxed),
            underrun_samples: self.underrun_samples.load(Ordering::Relaxed),
            evicted_samples: self.evicted_samples.load(Ordering::Relaxed),
            received_chunks: self.received_chunks.load(Ordering::Relaxed),
            discarded_chunks: self.discarded_chunks.load(Ordering::Relaxed),
            malformed_chunks: self.malformed_chunks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_includes_counters() {
        let stats = PipelineStats::default();
        stats.set_buffered(1024);
        PipelineStats::add(&stats.underrun_events, 3);
        PipelineStats::add(&stats.underrun_samples, 12);
        PipelineStats::add(&stats.discarded_chunks, 2);

        let snap = stats.snapshot(PlaybackState::Playing, 512, 48_000, None, Some(4096));
        assert_eq!(snap.state, PlaybackState::Playing);
        assert_eq!(snap.block_size, 512);
        assert_eq!(snap.buffered_samples, 1024);
        assert_eq!(snap.buffer_capacity_samples, Some(4096));
        assert_eq!(snap.underrun_events, 3);
        assert_eq!(snap.underrun_samples, 12);
        assert_eq!(snap.discarded_chunks, 2);
        assert_eq!(snap.malformed_chunks, 0);
    }

    #[test]
    fn add_ignores_zero() {
        let stats = PipelineStats::default();
        PipelineStats::add(&stats.evicted_samples, 0);
        assert_eq!(stats.evicted_samples.load(Ordering::Relaxed), 0);
    }
}
