//! Output pull stage.
//!
//! [`QueueProvider`] answers each pull from the output device with one block taken from
//! the shared [`SampleQueue`](crate::queue::SampleQueue):
//! - enough samples buffered: the next `block_size` samples
//! - some samples buffered: a short block, padded or not per [`PartialBlock`]
//! - nothing buffered: the precomputed silence block (underrun)
//!
//! [`build_output_stream`] wraps a provider in a CPAL output callback, converting the
//! mono block to the device channel count and sample format.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::config::PartialBlock;
use crate::queue::{SharedQueue, lock_queue};
use crate::status::PipelineStats;

const UNDERRUN_LOG_INTERVAL_MS: u64 = 1000;

/// Source of output samples, called from the audio thread once per output period.
pub trait SampleProvider: Send {
    /// Fill the head of `out` with the next block and return how many samples are valid.
    ///
    /// Must not block or panic. Samples past the returned count are unspecified.
    fn fill(&mut self, out: &mut [f32]) -> usize;
}

/// Pull callback reading blocks from the listener queue.
pub struct QueueProvider {
    queue: SharedQueue,
    silence: Arc<[f32]>,
    partial: PartialBlock,
    stats: Arc<PipelineStats>,
    last_underrun_log_ms: u64,
}

impl QueueProvider {
    pub fn new(
        queue: SharedQueue,
        silence: Arc<[f32]>,
        partial: PartialBlock,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            queue,
            silence,
            partial,
            stats,
            last_underrun_log_ms: 0,
        }
    }

    fn present_silence(&mut self, out: &mut [f32]) -> usize {
        if out.len() <= self.silence.len() {
            out.copy_from_slice(&self.silence[..out.len()]);
        } else {
            out.fill(0.0);
        }
        self.stats.underrun_events.fetch_add(1, Ordering::Relaxed);
        PipelineStats::add(&self.stats.underrun_samples, out.len());
        self.log_underrun();
        out.len()
    }

    fn log_underrun(&mut self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_millis(0))
            .as_millis() as u64;
        if now.saturating_sub(self.last_underrun_log_ms) > UNDERRUN_LOG_INTERVAL_MS {
            self.last_underrun_log_ms = now;
            tracing::debug!(
                underrun_events = self.stats.underrun_events.load(Ordering::Relaxed),
                "output underrun, playing silence"
            );
        }
    }
}

impl SampleProvider for QueueProvider {
    fn fill(&mut self, out: &mut [f32]) -> usize {
        let read = {
            let mut q = lock_queue(&self.queue);
            let read = q.read_into(out);
            self.stats.set_buffered(q.len());
            read
        };

        if read == 0 {
            return self.present_silence(out);
        }
        if read == out.len() {
            return read;
        }

        match self.partial {
            PartialBlock::PadSilence => {
                out[read..].fill(0.0);
                PipelineStats::add(&self.stats.underrun_samples, out.len() - read);
                out.len()
            }
            PartialBlock::Truncate => read,
        }
    }
}

/// Build a CPAL output stream whose callback pulls mono blocks from `provider`.
///
/// `block_size` presizes the callback scratch buffer so steady-state pulls do not allocate.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    block_size: usize,
    provider: Box<dyn SampleProvider>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, block_size, provider),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, block_size, provider),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, block_size, provider),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, block_size, provider),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    block_size: usize,
    mut provider: Box<dyn SampleProvider>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = (config.channels as usize).max(1);
    let mut scratch = vec![0.0f32; block_size.max(1)];

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / channels_out;
            if scratch.len() < frames {
                scratch.resize(frames, 0.0);
            }
            let block = &mut scratch[..frames];
            let valid = provider.fill(block).min(frames);
            block[valid..].fill(0.0);
            write_mono_block(block, data, channels_out);
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Copy a mono block into an interleaved device buffer, duplicating each sample per channel.
///
/// Any trailing samples of `data` beyond `block.len()` frames are set to silence.
fn write_mono_block<T>(block: &[f32], data: &mut [T], channels_out: usize)
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    let mut frames = data.chunks_exact_mut(channels_out);
    for (frame, sample) in frames.by_ref().zip(block.iter()) {
        frame.fill(<T as cpal::Sample>::from_sample::<f32>(*sample));
    }
    for frame in frames {
        frame.fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
    }
    let tail = data.len() - data.len() % channels_out;
    for sample in &mut data[tail..] {
        *sample = <T as cpal::Sample>::from_sample::<f32>(0.0);
    }
}
