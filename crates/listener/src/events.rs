use std::net::SocketAddr;

use live_audio_proto::FrameKind;

use crate::console::ConsoleCommand;

/// Everything the listener event loop reacts to, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ListenerEvent {
    Connected(SocketAddr),
    StreamInfo { sample_rate: u32, channels: u16 },
    Chunk { kind: FrameKind, payload: Vec<u8> },
    RemoteError(String),
    Disconnected(String),
    Console(ConsoleCommand),
    Shutdown,
}
