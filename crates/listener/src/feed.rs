//! Live feed source.
//!
//! Decodes a file to mono and broadcasts it to every connected listener as paced sound
//! chunks, the way a capture device would deliver them: real-time rate, no rewind for
//! late joiners.

use std::io::{self, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use audio_player::decode::MonoDecoder;
use live_audio_proto::FrameKind;

use crate::config::FeedConfig;

const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

type Clients = Arc<Mutex<Vec<TcpStream>>>;

/// Serve `config.path` until the file ends (or forever with `looped`).
pub fn run_feed(config: FeedConfig) -> Result<()> {
    let decoder = MonoDecoder::open(&config.path)?;
    let sample_rate = decoder.sample_rate();
    let listener =
        TcpListener::bind(config.bind).with_context(|| format!("bind {}", config.bind))?;
    tracing::info!(bind = %config.bind, rate_hz = sample_rate, "feed listening");

    let _ = ctrlc::set_handler(|| std::process::exit(130));

    let clients: Clients = Arc::new(Mutex::new(Vec::new()));
    {
        let clients = clients.clone();
        std::thread::spawn(move || accept_loop(listener, sample_rate, clients));
    }

    broadcast_loop(decoder, &config, &clients)
}

fn accept_loop(listener: TcpListener, sample_rate: u32, clients: Clients) {
    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("accept error: {e}");
                continue;
            }
        };
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        if let Err(e) = greet(&mut stream, sample_rate) {
            tracing::warn!(peer = %peer, "listener handshake failed: {e}");
            continue;
        }
        tracing::info!(peer = %peer, "listener connected");
        clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(stream);
    }
}

fn greet(stream: &mut TcpStream, sample_rate: u32) -> io::Result<()> {
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT))?;
    let mut hello = Vec::new();
    live_audio_proto::write_prelude(&mut hello)?;
    live_audio_proto::write_frame(
        &mut hello,
        FrameKind::StreamInfo,
        &live_audio_proto::encode_stream_info(sample_rate, 1),
    )?;
    stream.write_all(&hello)
}

fn broadcast_loop(decoder: MonoDecoder, config: &FeedConfig, clients: &Clients) -> Result<()> {
    let sample_rate = decoder.sample_rate();
    let path = config.path.clone();
    let mut source = LoopingSource::new(decoder, config.looped, move || MonoDecoder::open(&path));
    let start = Instant::now();
    let mut sent_samples: u64 = 0;

    loop {
        let chunk = match source.next_chunk(config.chunk_frames) {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                tracing::info!(sent_samples, "source finished");
                return Ok(());
            }
            Err(e) => {
                broadcast(clients, &error_frame(&e)?);
                return Err(e);
            }
        };

        let frame = encode_chunk(&chunk, config.pcm16)?;
        broadcast(clients, &frame);
        sent_samples += chunk.len() as u64;

        let delay = pace_delay(sent_samples, sample_rate, start.elapsed());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

/// Anything that hands out mono chunks until it runs dry.
pub(crate) trait ChunkSource {
    fn next_chunk(&mut self, frames: usize) -> Result<Option<Vec<f32>>>;
}

impl ChunkSource for MonoDecoder {
    fn next_chunk(&mut self, frames: usize) -> Result<Option<Vec<f32>>> {
        MonoDecoder::next_chunk(self, frames)
    }
}

/// Restarts its source at end of stream when `looped` is set.
///
/// A pass that yields no samples at all ends the stream with an error instead of reopening.
pub(crate) struct LoopingSource<S, F> {
    current: S,
    reopen: F,
    looped: bool,
    pass_produced: bool,
}

impl<S, F> LoopingSource<S, F>
where
    S: ChunkSource,
    F: FnMut() -> Result<S>,
{
    pub(crate) fn new(current: S, looped: bool, reopen: F) -> Self {
        Self {
            current,
            reopen,
            looped,
            pass_produced: false,
        }
    }

    pub(crate) fn next_chunk(&mut self, frames: usize) -> Result<Option<Vec<f32>>> {
        loop {
            if let Some(chunk) = self.current.next_chunk(frames)? {
                self.pass_produced = true;
                return Ok(Some(chunk));
            }
            if !self.looped {
                return Ok(None);
            }
            if !self.pass_produced {
                return Err(anyhow!("source produced no audio"));
            }
            self.current = (self.reopen)()?;
            self.pass_produced = false;
        }
    }
}

/// `Error` frame telling listeners why the feed is going away.
pub(crate) fn error_frame(err: &anyhow::Error) -> io::Result<Vec<u8>> {
    live_audio_proto::encode_frame(
        FrameKind::Error,
        &live_audio_proto::encode_error(&format!("{err:#}")),
    )
}

/// Encode one chunk as a complete sound frame.
pub(crate) fn encode_chunk(samples: &[f32], pcm16: bool) -> io::Result<Vec<u8>> {
    if pcm16 {
        let pcm: Vec<i16> = samples.iter().map(|s| f32_to_i16(*s)).collect();
        live_audio_proto::encode_frame(FrameKind::SoundI16, &live_audio_proto::encode_sound_i16(&pcm))
    } else {
        live_audio_proto::encode_frame(FrameKind::SoundF32, &live_audio_proto::encode_sound_f32(samples))
    }
}

/// Write `frame` to every client, dropping those whose connection failed.
///
/// Returns the number of clients still connected.
pub(crate) fn broadcast(clients: &Mutex<Vec<TcpStream>>, frame: &[u8]) -> usize {
    let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
    clients.retain_mut(|client| match client.write_all(frame) {
        Ok(()) => true,
        Err(e) => {
            tracing::info!("listener dropped: {e}");
            false
        }
    });
    clients.len()
}

/// How long to sleep so that `sent_samples` are released at `sample_rate`.
pub(crate) fn pace_delay(sent_samples: u64, sample_rate: u32, elapsed: Duration) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let due = Duration::from_secs_f64(sent_samples as f64 / sample_rate as f64);
    due.saturating_sub(elapsed)
}

fn f32_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32_768.0) as i16
    } else {
        (s * 32_767.0) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn pace_delay_waits_for_realtime() {
        let d = pace_delay(44_100, 44_100, Duration::from_millis(250));
        assert_eq!(d, Duration::from_millis(750));
    }

    #[test]
    fn pace_delay_never_negative() {
        assert_eq!(pace_delay(100, 44_100, Duration::from_secs(5)), Duration::ZERO);
        assert_eq!(pace_delay(100, 0, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn f32_to_i16_clamps_and_scales() {
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-1.0), i16::MIN);
        assert_eq!(f32_to_i16(2.5), i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn pcm16_chunk_decodes_back_to_unit_range() {
        let frame = encode_chunk(&[1.0, -1.0], true).unwrap();
        let (kind, payload) = live_audio_proto::read_frame(&frame[..]).unwrap();
        assert_eq!(kind, FrameKind::SoundI16);
        assert_eq!(live_audio_proto::decode_sound(kind, &payload).unwrap(), vec![1.0, -1.0]);
    }

    struct ScriptedSource(Vec<Vec<f32>>);

    impl ChunkSource for ScriptedSource {
        fn next_chunk(&mut self, _frames: usize) -> Result<Option<Vec<f32>>> {
            if self.0.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.0.remove(0)))
            }
        }
    }

    #[test]
    fn looping_empty_source_fails_instead_of_spinning() {
        let mut reopens = 0;
        let mut source = LoopingSource::new(ScriptedSource(Vec::new()), true, || {
            reopens += 1;
            Ok(ScriptedSource(Vec::new()))
        });
        let err = source.next_chunk(4).unwrap_err();
        assert!(err.to_string().contains("no audio"));
        drop(source);
        assert_eq!(reopens, 0);
    }

    #[test]
    fn looping_source_restarts_after_end() {
        let mut reopens = 0;
        let mut source = LoopingSource::new(ScriptedSource(vec![vec![0.1]]), true, || {
            reopens += 1;
            Ok(ScriptedSource(vec![vec![0.2]]))
        });
        assert_eq!(source.next_chunk(4).unwrap(), Some(vec![0.1]));
        assert_eq!(source.next_chunk(4).unwrap(), Some(vec![0.2]));
        assert_eq!(source.next_chunk(4).unwrap(), Some(vec![0.2]));
        drop(source);
        assert_eq!(reopens, 2);
    }

    #[test]
    fn looping_source_stops_when_a_later_pass_is_empty() {
        let mut source = LoopingSource::new(ScriptedSource(vec![vec![0.1]]), true, || {
            Ok(ScriptedSource(Vec::new()))
        });
        assert_eq!(source.next_chunk(4).unwrap(), Some(vec![0.1]));
        assert!(source.next_chunk(4).is_err());
    }

    #[test]
    fn non_looping_source_ends_with_none() {
        let mut source = LoopingSource::new(ScriptedSource(Vec::new()), false, || {
            Ok(ScriptedSource(vec![vec![0.1]]))
        });
        assert_eq!(source.next_chunk(4).unwrap(), None);
    }

    #[test]
    fn source_failure_becomes_error_frame() {
        let frame = error_frame(&anyhow!("source produced no audio")).unwrap();
        let (kind, payload) = live_audio_proto::read_frame(&frame[..]).unwrap();
        assert_eq!(kind, FrameKind::Error);
        assert_eq!(live_audio_proto::decode_error(&payload), "source produced no audio");
    }

    #[test]
    fn broadcast_reaches_connected_client() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut reader = TcpStream::connect(addr).unwrap();
        let (server_side, _) = listener.accept().unwrap();

        let clients = Mutex::new(vec![server_side]);
        let frame = encode_chunk(&[0.25, 0.5], false).unwrap();
        assert_eq!(broadcast(&clients, &frame), 1);

        let mut received = vec![0u8; frame.len()];
        reader.read_exact(&mut received).unwrap();
        assert_eq!(received, frame);
    }
}
