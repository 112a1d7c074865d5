/// How the pull callback presents a block when the queue holds fewer samples than requested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PartialBlock {
    /// Zero-fill the tail so every block has exactly `block_size` samples.
    #[default]
    PadSilence,
    /// Present only the samples that were read; the output sink decides what fills the tail.
    Truncate,
}

/// Listener playback parameters, fixed for the lifetime of a controller.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Samples requested by the output device per pull.
    pub block_size: usize,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Queue cap in samples; oldest samples are evicted beyond it. `None` leaves it unbounded.
    pub max_buffered_samples: Option<usize>,
    /// Short-read policy for the pull callback.
    pub partial_block: PartialBlock,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            block_size: 2048,
            sample_rate: 44_100,
            max_buffered_samples: Some(calc_max_buffered_samples(44_100, 1, 5.0)),
            partial_block: PartialBlock::PadSilence,
        }
    }
}

/// Compute a queue cap in **samples** for a `(rate, channels, seconds)` target.
///
/// - If `buffer_seconds` is non-finite or `<= 0.0`, a 2 second fallback is used.
/// - The returned value is `ceil(rate_hz * buffer_seconds) * channels` (saturating).
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels)
}
