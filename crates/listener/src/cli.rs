use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "listener", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List output devices and exit
    ListDevices,

    /// Connect to a live feed and play it on demand (toggle from the console)
    Listen {
        /// Feed address, e.g. 127.0.0.1:5560
        #[arg(long)]
        connect: SocketAddr,

        /// Use a specific output device by substring match
        #[arg(long)]
        device: Option<String>,

        /// Output block size in samples requested per device pull
        #[arg(long, default_value_t = 2048)]
        buffer_size: usize,

        /// Output sample rate in Hz
        #[arg(long, default_value_t = 44_100)]
        sample_rate: u32,

        /// Cap on buffered audio in seconds; oldest samples are dropped beyond it (0 = no cap)
        #[arg(long, default_value_t = 5.0, value_parser = parse_buffer_seconds)]
        max_buffer_seconds: f32,

        /// How to present a block when fewer samples than requested are buffered
        #[arg(long, value_enum, default_value_t = PartialBlockArg::Pad)]
        partial_block: PartialBlockArg,

        /// Seconds to wait before reconnecting after the feed drops
        #[arg(long, default_value_t = 2)]
        reconnect_secs: u64,

        /// Start playing immediately instead of waiting for a toggle
        #[arg(long)]
        autoplay: bool,
    },

    /// Serve an audio file as a live mono feed
    Feed {
        /// Listen address for listeners, e.g. 0.0.0.0:5560
        #[arg(long, default_value = "0.0.0.0:5560")]
        bind: SocketAddr,

        /// Samples per sound chunk
        #[arg(long, default_value_t = 1024)]
        chunk_frames: usize,

        /// Send 16-bit PCM chunks instead of f32
        #[arg(long)]
        pcm16: bool,

        /// Restart from the beginning when the file ends
        #[arg(long = "loop")]
        looped: bool,

        /// Path to an audio file
        path: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PartialBlockArg {
    /// Zero-fill short blocks to the full block size
    Pad,
    /// Present only the buffered samples
    Truncate,
}

fn parse_buffer_seconds(s: &str) -> Result<f32, String> {
    let secs: f32 = s.parse().map_err(|e| format!("{e}"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("{s} is not a non-negative number of seconds"));
    }
    Ok(secs)
}
