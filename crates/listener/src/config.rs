use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub use audio_player::config::{PartialBlock, PlaybackConfig};
use audio_player::config::calc_max_buffered_samples;

use crate::cli::PartialBlockArg;

#[derive(Clone, Debug)]
pub struct ListenConfig {
    pub connect: SocketAddr,
    pub device: Option<String>,
    pub reconnect_delay: Duration,
    pub autoplay: bool,
    pub playback: PlaybackConfig,
}

#[derive(Clone, Debug)]
pub struct FeedConfig {
    pub bind: SocketAddr,
    pub path: PathBuf,
    pub chunk_frames: usize,
    pub pcm16: bool,
    pub looped: bool,
}

impl From<PartialBlockArg> for PartialBlock {
    fn from(arg: PartialBlockArg) -> Self {
        match arg {
            PartialBlockArg::Pad => PartialBlock::PadSilence,
            PartialBlockArg::Truncate => PartialBlock::Truncate,
        }
    }
}

/// Convert the `--max-buffer-seconds` option into a queue cap; `0` disables it.
pub fn max_buffered_samples(sample_rate: u32, seconds: f32) -> Option<usize> {
    if seconds == 0.0 {
        None
    } else {
        Some(calc_max_buffered_samples(sample_rate, 1, seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_seconds_disables_cap() {
        assert_eq!(max_buffered_samples(44_100, 0.0), None);
    }

    #[test]
    fn seconds_convert_to_mono_samples() {
        assert_eq!(max_buffered_samples(8_000, 1.5), Some(12_000));
    }

    #[test]
    fn partial_block_arg_maps_to_policy() {
        assert_eq!(PartialBlock::from(PartialBlockArg::Pad), PartialBlock::PadSilence);
        assert_eq!(PartialBlock::from(PartialBlockArg::Truncate), PartialBlock::Truncate);
    }
}
