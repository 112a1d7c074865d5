//! Live audio listener — plays a remote mono feed through the local output device.
//!
//! ## Pipeline
//! 1. **Feed**: a reader thread receives sound chunks over a framed TCP stream.
//! 2. **Queue**: while playing, chunks are appended to a FIFO sample queue.
//! 3. **Playback**: the CPAL callback pulls fixed-size blocks, substituting silence on underrun.
//!
//! ## Modes
//! - `listen`: connect to a feed; toggle playback from the console.
//! - `feed`: serve an audio file as a live feed (for testing without a capture device).
//! - `list-devices`: print output devices.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use listener::cli::{Args, Command};
use listener::config::{FeedConfig, ListenConfig, PlaybackConfig, max_buffered_samples};
use listener::{feed, runtime};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,listener=info")),
        )
        .init();

    match args.cmd {
        Command::ListDevices => runtime::list_devices(),
        Command::Listen {
            connect,
            device,
            buffer_size,
            sample_rate,
            max_buffer_seconds,
            partial_block,
            reconnect_secs,
            autoplay,
        } => runtime::run_listen(ListenConfig {
            connect,
            device,
            reconnect_delay: Duration::from_secs(reconnect_secs),
            autoplay,
            playback: PlaybackConfig {
                block_size: buffer_size,
                sample_rate,
                max_buffered_samples: max_buffered_samples(sample_rate, max_buffer_seconds),
                partial_block: partial_block.into(),
            },
        }),
        Command::Feed {
            bind,
            chunk_frames,
            pcm16,
            looped,
            path,
        } => feed::run_feed(FeedConfig {
            bind,
            path,
            chunk_frames,
            pcm16,
            looped,
        }),
    }
}
