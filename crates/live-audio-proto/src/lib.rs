//! Wire protocol for the live audio channel between a `feed` source and a `listener`.
//!
//! One TCP connection carries an ordered stream of frames:
//! - stream info (sample rate / channel count) so the listener can check its output config
//! - sound chunks, either little-endian `f32` or `i16` PCM samples
//! - error messages
//!
//! Frame format:
//! - magic: 4 bytes "LAUD" (once, at connection start)
//! - version: u16 LE (once, at connection start)
//! - then repeated frames:
//!   - kind: u8
//!   - len: u32 LE
//!   - payload: [u8; len]

use std::io::{self, Read, Write};

pub const MAGIC: [u8; 4] = *b"LAUD";
pub const VERSION: u16 = 1;

/// Upper bound on a single frame payload; anything larger is treated as a corrupt header.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Sender → listener: sample rate and channel count of the following chunks.
    StreamInfo = 0x01,

    /// One chunk of little-endian `f32` samples.
    SoundF32 = 0x10,
    /// One chunk of little-endian `i16` PCM samples.
    SoundI16 = 0x11,

    Error = 0x7F,
}

impl FrameKind {
    pub fn from_u8(b: u8) -> io::Result<Self> {
        let k = match b {
            0x01 => FrameKind::StreamInfo,
            0x10 => FrameKind::SoundF32,
            0x11 => FrameKind::SoundI16,
            0x7F => FrameKind::Error,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown frame kind {b:#x}"),
                ))
            }
        };
        Ok(k)
    }
}

/// Connection prelude: magic + version.
pub fn write_prelude(mut w: impl Write) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    Ok(())
}

/// Read and validate the connection prelude.
pub fn read_prelude(mut r: impl Read) -> io::Result<()> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad magic"));
    }

    let mut ver = [0u8; 2];
    r.read_exact(&mut ver)?;
    let version = u16::from_le_bytes(ver);
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported version {version}"),
        ));
    }

    Ok(())
}

/// Write a frame header + payload.
pub fn write_frame(mut w: impl Write, kind: FrameKind, payload: &[u8]) -> io::Result<()> {
    let frame = encode_frame(kind, payload)?;
    w.write_all(&frame)?;
    Ok(())
}

/// Encode a frame into a single buffer (header + payload).
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> io::Result<Vec<u8>> {
    let len: u32 = payload
        .len()
        .try_into()
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "payload too large"))?;

    let mut out = Vec::with_capacity(1 + 4 + payload.len());
    out.push(kind as u8);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Read a frame header and return `(kind, len)`.
///
/// The caller should then read exactly `len` bytes of payload.
pub fn read_frame_header(mut r: impl Read) -> io::Result<(FrameKind, u32)> {
    let mut kindb = [0u8; 1];
    r.read_exact(&mut kindb)?;
    let kind = FrameKind::from_u8(kindb[0])?;

    let mut lenb = [0u8; 4];
    r.read_exact(&mut lenb)?;
    let len = u32::from_le_bytes(lenb);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit"),
        ));
    }
    Ok((kind, len))
}

/// Read one whole frame (header + payload).
pub fn read_frame(mut r: impl Read) -> io::Result<(FrameKind, Vec<u8>)> {
    let (kind, len) = read_frame_header(&mut r)?;
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok((kind, payload))
}

/// Encode `STREAM_INFO` payload:
/// - sample_rate: u32 LE
/// - channels:    u16 LE
pub fn encode_stream_info(sample_rate: u32, channels: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 2);
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out
}

/// Decode `STREAM_INFO` payload.
pub fn decode_stream_info(payload: &[u8]) -> io::Result<(u32, u16)> {
    if payload.len() != 6 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad STREAM_INFO length"));
    }
    let sr = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let ch = u16::from_le_bytes([payload[4], payload[5]]);
    Ok((sr, ch))
}

/// Encode a `SOUND_F32` payload: samples as consecutive `f32` LE.
pub fn encode_sound_f32(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Encode a `SOUND_I16` payload: samples as consecutive `i16` LE.
pub fn encode_sound_i16(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Decode a sound payload of the given kind into `f32` samples.
///
/// Returns `InvalidData` when the payload length is not a whole number of samples,
/// when an `f32` sample is NaN or infinite, or when `kind` does not carry audio.
pub fn decode_sound(kind: FrameKind, payload: &[u8]) -> io::Result<Vec<f32>> {
    match kind {
        FrameKind::SoundF32 => {
            if payload.len() % 4 != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("SOUND_F32 length {} is not a multiple of 4", payload.len()),
                ));
            }
            let samples: Vec<f32> = payload
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            if let Some(pos) = samples.iter().position(|s| !s.is_finite()) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("SOUND_F32 sample {pos} is not finite"),
                ));
            }
            Ok(samples)
        }
        FrameKind::SoundI16 => {
            if payload.len() % 2 != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("SOUND_I16 length {} is not a multiple of 2", payload.len()),
                ));
            }
            Ok(payload
                .chunks_exact(2)
                .map(|b| i16_to_f32(i16::from_le_bytes([b[0], b[1]])))
                .collect())
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{other:?} frame does not carry sound"),
        )),
    }
}

/// Map a signed 16-bit PCM sample onto `[-1.0, 1.0]`.
///
/// Negative values scale by 32768 and positive values by 32767 so both extremes land
/// exactly on -1.0 and 1.0.
pub fn i16_to_f32(v: i16) -> f32 {
    if v < 0 {
        v as f32 / 32_768.0
    } else {
        v as f32 / 32_767.0
    }
}

/// Encode an `ERROR` payload (UTF-8 message).
pub fn encode_error(message: &str) -> Vec<u8> {
    message.as_bytes().to_vec()
}

/// Decode an `ERROR` payload, replacing invalid UTF-8.
pub fn decode_error(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}
