//! Listener playback lifecycle.
//!
//! [`PlaybackController`] owns the sample queue and toggles between two states:
//! - **stopped**: no output device is held and inbound chunks are discarded
//! - **playing**: an output device pulls blocks from the queue through a [`QueueProvider`]
//!
//! Both `play()` and `stop()` reset the queue so a session always starts from silence.
//! `stop()` detaches the device before clearing the queue, so no pull can run against a
//! queue that belongs to a finished session.

use std::sync::{Arc, Mutex};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use live_audio_proto::FrameKind;
use live_audio_types::{ListenerStatus, PlaybackState};

use crate::config::PlaybackConfig;
use crate::playback::{QueueProvider, SampleProvider};
use crate::queue::{SampleQueue, SharedQueue, lock_queue};
use crate::status::PipelineStats;

const EVICTION_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Creates output devices on demand.
pub trait OutputFactory {
    /// Acquire an output device that will request `block_size` samples per pull.
    fn create(&mut self, block_size: usize, channels: u16) -> Result<Box<dyn OutputDevice>>;
}

/// An acquired output device.
///
/// Dropping the device releases it; implementations detach first if still attached.
pub trait OutputDevice {
    /// Install the pull callback and start output.
    fn attach(&mut self, provider: Box<dyn SampleProvider>) -> Result<()>;
    /// Stop output and drop the pull callback. Returns only once no further pull can run.
    fn detach(&mut self);
    /// Human-readable device name, if known.
    fn name(&self) -> Option<String> {
        None
    }
}

/// Two-state playback controller fed by the inbound chunk handler.
pub struct PlaybackController {
    config: PlaybackConfig,
    queue: SharedQueue,
    silence: Arc<[f32]>,
    factory: Box<dyn OutputFactory>,
    output: Option<Box<dyn OutputDevice>>,
    device_name: Option<String>,
    stats: Arc<PipelineStats>,
    last_eviction_log: Option<Instant>,
}

impl PlaybackController {
    /// Build a stopped controller. The block size is clamped to at least one sample.
    pub fn new(mut config: PlaybackConfig, factory: Box<dyn OutputFactory>) -> Self {
        config.block_size = config.block_size.max(1);
        let queue = Arc::new(Mutex::new(SampleQueue::with_max_samples(
            config.max_buffered_samples,
        )));
        let silence: Arc<[f32]> = vec![0.0; config.block_size].into();
        Self {
            config,
            queue,
            silence,
            factory,
            output: None,
            device_name: None,
            stats: PipelineStats::shared(),
            last_eviction_log: None,
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Fixed output block size in samples.
    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// The all-zero block presented on underrun.
    pub fn silence(&self) -> &[f32] {
        &self.silence
    }

    /// True iff an output device is currently held.
    pub fn is_playing(&self) -> bool {
        self.output.is_some()
    }

    pub fn state(&self) -> PlaybackState {
        if self.is_playing() {
            PlaybackState::Playing
        } else {
            PlaybackState::Stopped
        }
    }

    /// Samples currently buffered.
    pub fn queue_len(&self) -> usize {
        lock_queue(&self.queue).len()
    }

    /// Start playback: reset the queue, acquire a mono device and attach the pull callback.
    ///
    /// Calling this while already playing is a no-op. On failure the controller stays
    /// stopped and the call can be retried.
    pub fn play(&mut self) -> Result<()> {
        if self.is_playing() {
            tracing::info!("play requested while already playing; ignoring");
            return Ok(());
        }

        self.reset_queue();
        let mut output = self
            .factory
            .create(self.config.block_size, 1)
            .context("acquire output device")?;
        let provider = QueueProvider::new(
            self.queue.clone(),
            self.silence.clone(),
            self.config.partial_block,
            self.stats.clone(),
        );
        output
            .attach(Box::new(provider))
            .context("attach output pull callback")?;

        self.device_name = output.name();
        self.output = Some(output);
        tracing::info!(
            block_size = self.config.block_size,
            device = self.device_name.as_deref().unwrap_or("unknown"),
            "playback started"
        );
        Ok(())
    }

    /// Stop playback: detach and release the device, then clear the queue.
    ///
    /// Safe to call while stopped.
    pub fn stop(&mut self) {
        if let Some(mut output) = self.output.take() {
            output.detach();
            drop(output);
            self.device_name = None;
            tracing::info!("playback stopped");
        }
        self.reset_queue();
    }

    /// Handle one inbound sound chunk.
    ///
    /// While stopped the chunk is discarded without decoding. A payload that does not
    /// decode to samples is dropped with a warning; the stream keeps going.
    pub fn handle_chunk(&mut self, kind: FrameKind, payload: &[u8]) {
        if !self.is_playing() {
            self.stats.discarded_chunks.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match live_audio_proto::decode_sound(kind, payload) {
            Ok(samples) => {
                self.push_samples(&samples);
            }
            Err(e) => {
                self.stats.malformed_chunks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(kind = ?kind, len = payload.len(), "dropping malformed chunk: {e}");
            }
        }
    }

    /// Append decoded samples if playing. Returns whether they were accepted.
    pub fn push_samples(&mut self, samples: &[f32]) -> bool {
        if !self.is_playing() {
            self.stats.discarded_chunks.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let (evicted, buffered) = {
            let mut q = lock_queue(&self.queue);
            let evicted = q.write(samples);
            (evicted, q.len())
        };
        self.stats.set_buffered(buffered);
        self.stats.received_chunks.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 {
            PipelineStats::add(&self.stats.evicted_samples, evicted);
            self.log_eviction(evicted, buffered);
        }
        true
    }

    /// Snapshot for the console `status` command.
    pub fn status(&self) -> ListenerStatus {
        let capacity = lock_queue(&self.queue).max_samples();
        self.stats.snapshot(
            self.state(),
            self.config.block_size,
            self.config.sample_rate,
            self.device_name.clone(),
            capacity,
        )
    }

    fn reset_queue(&self) {
        lock_queue(&self.queue).clear();
        self.stats.set_buffered(0);
    }

    fn log_eviction(&mut self, evicted: usize, buffered: usize) {
        let due = self
            .last_eviction_log
            .map(|at| at.elapsed() >= EVICTION_LOG_INTERVAL)
            .unwrap_or(true);
        if due {
            self.last_eviction_log = Some(Instant::now());
            tracing::warn!(
                evicted_samples = evicted,
                buffered_samples = buffered,
                "listener backlog over cap; dropping oldest samples"
            );
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartialBlock;
    use anyhow::anyhow;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Shared view of what the mock devices saw.
    #[derive(Default)]
    struct MockLog {
        creates: usize,
        detaches: usize,
        requested_channels: Vec<u16>,
        provider: Option<Box<dyn SampleProvider>>,
        fail_create: bool,
        fail_attach: bool,
    }

    type SharedLog = Rc<RefCell<MockLog>>;

    struct MockFactory {
        log: SharedLog,
    }

    impl OutputFactory for MockFactory {
        fn create(&mut self, _block_size: usize, channels: u16) -> Result<Box<dyn OutputDevice>> {
            let mut log = self.log.borrow_mut();
            if log.fail_create {
                return Err(anyhow!("no audio hardware"));
            }
            log.creates += 1;
            log.requested_channels.push(channels);
            Ok(Box::new(MockDevice {
                log: self.log.clone(),
            }))
        }
    }

    struct MockDevice {
        log: SharedLog,
    }

    impl OutputDevice for MockDevice {
        fn attach(&mut self, provider: Box<dyn SampleProvider>) -> Result<()> {
            let mut log = self.log.borrow_mut();
            if log.fail_attach {
                return Err(anyhow!("permission denied"));
            }
            log.provider = Some(provider);
            Ok(())
        }

        fn detach(&mut self) {
            let mut log = self.log.borrow_mut();
            log.provider = None;
            log.detaches += 1;
        }

        fn name(&self) -> Option<String> {
            Some("mock".to_string())
        }
    }

    fn controller(block_size: usize, partial: PartialBlock) -> (PlaybackController, SharedLog) {
        let log: SharedLog = Rc::new(RefCell::new(MockLog::default()));
        let config = PlaybackConfig {
            block_size,
            sample_rate: 44_100,
            max_buffered_samples: None,
            partial_block: partial,
        };
        let factory = MockFactory { log: log.clone() };
        (PlaybackController::new(config, Box::new(factory)), log)
    }

    /// Simulate one hardware pull and return the block the device would present.
    fn pull(log: &SharedLog, block_size: usize) -> Vec<f32> {
        let mut log = log.borrow_mut();
        let provider = log.provider.as_mut().expect("no pull callback attached");
        let mut out = vec![f32::NAN; block_size];
        let valid = provider.fill(&mut out);
        out.truncate(valid);
        out
    }

    #[test]
    fn starts_stopped() {
        let (c, log) = controller(4, PartialBlock::PadSilence);
        assert!(!c.is_playing());
        assert_eq!(c.state(), PlaybackState::Stopped);
        assert_eq!(log.borrow().creates, 0);
        assert_eq!(c.silence(), &[0.0; 4]);
    }

    #[test]
    fn play_acquires_mono_device_once() {
        let (mut c, log) = controller(4, PartialBlock::PadSilence);
        c.play().unwrap();
        c.play().unwrap();
        assert!(c.is_playing());
        assert_eq!(log.borrow().creates, 1);
        assert_eq!(log.borrow().requested_channels, vec![1]);
        assert_eq!(c.status().device.as_deref(), Some("mock"));
    }

    #[test]
    fn stop_twice_is_harmless() {
        let (mut c, log) = controller(4, PartialBlock::PadSilence);
        c.play().unwrap();
        c.push_samples(&[0.1, 0.2]);
        c.stop();
        c.stop();
        assert!(!c.is_playing());
        assert_eq!(c.queue_len(), 0);
        assert_eq!(log.borrow().detaches, 1);
        assert!(log.borrow().provider.is_none());
    }

    #[test]
    fn stop_while_never_played_is_harmless() {
        let (mut c, log) = controller(4, PartialBlock::PadSilence);
        c.stop();
        assert!(!c.is_playing());
        assert_eq!(log.borrow().detaches, 0);
    }

    #[test]
    fn chunks_are_discarded_while_stopped() {
        let (mut c, _log) = controller(4, PartialBlock::PadSilence);
        let payload = live_audio_proto::encode_sound_f32(&[0.1, 0.2, 0.3]);
        c.handle_chunk(FrameKind::SoundF32, &payload);
        assert_eq!(c.queue_len(), 0);
        assert_eq!(c.status().discarded_chunks, 1);

        c.play().unwrap();
        assert_eq!(c.queue_len(), 0);
    }

    #[test]
    fn play_starts_from_an_empty_queue() {
        let (mut c, log) = controller(4, PartialBlock::PadSilence);
        c.play().unwrap();
        c.push_samples(&[0.7; 10]);
        c.stop();
        c.play().unwrap();
        assert_eq!(c.queue_len(), 0);
        assert_eq!(pull(&log, 4), vec![0.0; 4]);
        assert_eq!(log.borrow().creates, 2);
    }

    #[test]
    fn malformed_chunk_is_dropped_and_stream_continues() {
        let (mut c, log) = controller(2, PartialBlock::PadSilence);
        c.play().unwrap();
        c.handle_chunk(FrameKind::SoundF32, &[1, 2, 3]);
        assert_eq!(c.queue_len(), 0);
        assert_eq!(c.status().malformed_chunks, 1);

        c.handle_chunk(FrameKind::SoundF32, &live_audio_proto::encode_sound_f32(&[0.5, 0.25]));
        assert_eq!(pull(&log, 2), vec![0.5, 0.25]);
    }

    #[test]
    fn non_finite_chunk_is_dropped_as_malformed() {
        let (mut c, log) = controller(2, PartialBlock::PadSilence);
        c.play().unwrap();
        c.handle_chunk(
            FrameKind::SoundF32,
            &live_audio_proto::encode_sound_f32(&[0.5, f32::NAN]),
        );
        c.handle_chunk(
            FrameKind::SoundF32,
            &live_audio_proto::encode_sound_f32(&[f32::INFINITY]),
        );
        assert_eq!(c.queue_len(), 0);
        assert_eq!(c.status().malformed_chunks, 2);
        assert_eq!(c.status().received_chunks, 0);
        assert_eq!(pull(&log, 2), vec![0.0, 0.0]);
    }

    #[test]
    fn i16_chunks_are_converted() {
        let (mut c, log) = controller(2, PartialBlock::PadSilence);
        c.play().unwrap();
        c.handle_chunk(
            FrameKind::SoundI16,
            &live_audio_proto::encode_sound_i16(&[i16::MAX, i16::MIN]),
        );
        assert_eq!(pull(&log, 2), vec![1.0, -1.0]);
    }

    #[test]
    fn underrun_presents_silence_block() {
        let (mut c, log) = controller(4, PartialBlock::Truncate);
        c.play().unwrap();
        let block = pull(&log, 4);
        assert_eq!(block, c.silence());
        assert_eq!(c.status().underrun_events, 1);
    }

    #[test]
    fn device_failure_leaves_controller_stopped() {
        let (mut c, log) = controller(4, PartialBlock::PadSilence);
        log.borrow_mut().fail_create = true;
        let err = c.play().unwrap_err();
        assert!(format!("{err:#}").contains("no audio hardware"));
        assert!(!c.is_playing());

        log.borrow_mut().fail_create = false;
        c.play().unwrap();
        assert!(c.is_playing());
    }

    #[test]
    fn attach_failure_leaves_controller_stopped() {
        let (mut c, log) = controller(4, PartialBlock::PadSilence);
        log.borrow_mut().fail_attach = true;
        assert!(c.play().is_err());
        assert!(!c.is_playing());
        assert_eq!(c.state(), PlaybackState::Stopped);
    }

    #[test]
    fn cap_evicts_oldest_and_counts() {
        let log: SharedLog = Rc::new(RefCell::new(MockLog::default()));
        let config = PlaybackConfig {
            block_size: 2,
            sample_rate: 8_000,
            max_buffered_samples: Some(3),
            partial_block: PartialBlock::PadSilence,
        };
        let mut c = PlaybackController::new(config, Box::new(MockFactory { log: log.clone() }));
        c.play().unwrap();
        c.push_samples(&[1.0, 2.0]);
        c.push_samples(&[3.0, 4.0]);
        assert_eq!(c.queue_len(), 3);
        assert_eq!(c.status().evicted_samples, 1);
        assert_eq!(c.status().buffer_capacity_samples, Some(3));
        assert_eq!(pull(&log, 2), vec![2.0, 3.0]);
    }

    #[test]
    fn eviction_warning_is_rate_limited() {
        let log: SharedLog = Rc::new(RefCell::new(MockLog::default()));
        let config = PlaybackConfig {
            block_size: 2,
            sample_rate: 8_000,
            max_buffered_samples: Some(2),
            partial_block: PartialBlock::PadSilence,
        };
        let mut c = PlaybackController::new(config, Box::new(MockFactory { log }));
        c.play().unwrap();
        c.push_samples(&[1.0, 2.0]);
        assert!(c.last_eviction_log.is_none());

        c.push_samples(&[3.0]);
        let first = c.last_eviction_log.expect("first eviction is logged");

        c.push_samples(&[4.0]);
        assert_eq!(c.last_eviction_log, Some(first));
        assert_eq!(c.status().evicted_samples, 2);
    }

    #[test]
    fn end_to_end_with_silence_padding() {
        let (mut c, log) = controller(4, PartialBlock::PadSilence);
        c.play().unwrap();

        c.handle_chunk(FrameKind::SoundF32, &live_audio_proto::encode_sound_f32(&[0.1, 0.2, 0.3]));
        assert_eq!(pull(&log, 4), vec![0.1, 0.2, 0.3, 0.0]);

        c.handle_chunk(FrameKind::SoundF32, &live_audio_proto::encode_sound_f32(&[0.4, 0.5]));
        assert_eq!(pull(&log, 4), vec![0.4, 0.5, 0.0, 0.0]);
        assert_eq!(pull(&log, 4), vec![0.0; 4]);
    }

    #[test]
    fn end_to_end_with_truncated_blocks() {
        let (mut c, log) = controller(4, PartialBlock::Truncate);
        c.play().unwrap();

        c.handle_chunk(FrameKind::SoundF32, &live_audio_proto::encode_sound_f32(&[0.1, 0.2, 0.3]));
        assert_eq!(pull(&log, 4), vec![0.1, 0.2, 0.3]);

        c.handle_chunk(FrameKind::SoundF32, &live_audio_proto::encode_sound_f32(&[0.4, 0.5]));
        assert_eq!(pull(&log, 4), vec![0.4, 0.5]);
        assert_eq!(pull(&log, 4), vec![0.0; 4]);
    }

    #[test]
    fn fifo_order_survives_mismatched_chunk_and_block_sizes() {
        let (mut c, log) = controller(3, PartialBlock::Truncate);
        c.play().unwrap();
        let input: Vec<f32> = (0..10).map(|i| i as f32 / 10.0).collect();
        c.push_samples(&input[..4]);
        c.push_samples(&input[4..5]);
        c.push_samples(&input[5..]);

        let mut output = Vec::new();
        output.extend(pull(&log, 3));
        output.extend(pull(&log, 3));
        output.extend(pull(&log, 3));
        output.extend(pull(&log, 3));
        assert_eq!(output, input);
        assert_eq!(c.queue_len(), 0);
    }
}
