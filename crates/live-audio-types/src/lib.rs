use serde::{Deserialize, Serialize};

/// Playback lifecycle state of a listener.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No output device is held; inbound chunks are discarded.
    #[default]
    Stopped,
    /// An output device is pulling blocks from the sample queue.
    Playing,
}

impl PlaybackState {
    /// Label shown by the console toggle.
    pub fn label(self) -> &'static str {
        match self {
            PlaybackState::Stopped => "muted",
            PlaybackState::Playing => "unmuted",
        }
    }
}

/// Snapshot of the listener pipeline reported by the console `status` command.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenerStatus {
    /// Current lifecycle state.
    pub state: PlaybackState,
    /// Output block size in samples.
    pub block_size: usize,
    /// Configured output sample rate (Hz).
    pub sample_rate: u32,
    /// Active output device name, if known.
    pub device: Option<String>,
    /// Samples currently waiting in the queue.
    pub buffered_samples: u64,
    /// Queue cap in samples, when one is configured.
    pub buffer_capacity_samples: Option<u64>,
    /// Pulls that found the queue empty and emitted a silent block.
    pub underrun_events: u64,
    /// Samples emitted as silence, including padding of short blocks.
    pub underrun_samples: u64,
    /// Samples dropped from the head of the queue to honor the cap.
    pub evicted_samples: u64,
    /// Sound chunks accepted into the queue.
    pub received_chunks: u64,
    /// Sound chunks ignored because playback was stopped.
    pub discarded_chunks: u64,
    /// Sound chunks dropped because the payload could not be decoded.
    pub malformed_chunks: u64,
}
