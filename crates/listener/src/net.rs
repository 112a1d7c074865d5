//! Feed connection: connect, validate the prelude and forward frames as events.
//!
//! The connection is process-wide and independent of playback: frames keep flowing to
//! the event loop whether or not the listener is playing. When the feed drops, the
//! reader waits and reconnects until shutdown.

use std::io::{self, BufReader, Read};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use live_audio_proto::FrameKind;

use crate::events::ListenerEvent;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawn the feed reader thread.
pub(crate) fn spawn_channel_reader(
    addr: SocketAddr,
    reconnect_delay: Duration,
    shutdown: Arc<AtomicBool>,
    tx: Sender<ListenerEvent>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !shutdown.load(Ordering::Relaxed) {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    if tx.send(ListenerEvent::Connected(addr)).is_err() {
                        return;
                    }
                    let reason = match read_channel(stream, &tx) {
                        Ok(()) => "feed closed the connection".to_string(),
                        Err(e) => format!("{e:#}"),
                    };
                    if tx.send(ListenerEvent::Disconnected(reason)).is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!(addr = %addr, "connect failed: {e}"),
            }
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(reconnect_delay);
        }
    })
}

/// Read one connection to completion, forwarding frames in order.
///
/// Sound chunks are dropped while the announced stream is not mono.
/// Returns `Ok(())` on a clean end of stream or when the event loop has gone away.
pub(crate) fn read_channel(reader: impl Read, tx: &Sender<ListenerEvent>) -> Result<()> {
    let mut reader = BufReader::new(reader);
    live_audio_proto::read_prelude(&mut reader).context("read prelude")?;
    let mut mono = true;

    loop {
        let (kind, payload) = match live_audio_proto::read_frame(&mut reader) {
            Ok(frame) => frame,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e).context("read frame"),
        };

        let event = match kind {
            FrameKind::StreamInfo => match live_audio_proto::decode_stream_info(&payload) {
                Ok((sample_rate, channels)) => {
                    mono = channels == 1;
                    ListenerEvent::StreamInfo {
                        sample_rate,
                        channels,
                    }
                }
                Err(e) => {
                    tracing::warn!("ignoring bad stream info: {e}");
                    continue;
                }
            },
            FrameKind::SoundF32 | FrameKind::SoundI16 if !mono => continue,
            FrameKind::SoundF32 | FrameKind::SoundI16 => ListenerEvent::Chunk { kind, payload },
            FrameKind::Error => ListenerEvent::RemoteError(live_audio_proto::decode_error(&payload)),
        };

        if tx.send(event).is_err() {
            return Ok(());
        }
    }
}
