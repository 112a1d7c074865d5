//! File decode for the `feed` source.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode packets into interleaved `f32` samples
//! - downmix to mono and hand out fixed-size chunks

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Streaming mono decoder over one audio file.
pub struct MonoDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    pending: VecDeque<f32>,
    eof: bool,
}

impl MonoDecoder {
    /// Probe `path` and prepare a decoder for its default track.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .with_context(|| format!("probe {:?}", path))?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let track_id = track.id;
        let codec_params: CodecParameters = track.codec_params.clone();

        let channels = codec_params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();
        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;

        let decoder =
            symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

        tracing::info!(
            path = ?path,
            rate_hz = sample_rate,
            channels,
            "source opened"
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            pending: VecDeque::new(),
            eof: false,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Next chunk of up to `frames` mono samples, or `None` once the file is exhausted.
    ///
    /// Only the final chunk may be shorter than `frames`.
    pub fn next_chunk(&mut self, frames: usize) -> Result<Option<Vec<f32>>> {
        let frames = frames.max(1);
        while self.pending.len() < frames && !self.eof {
            self.decode_next_packet()?;
        }
        if self.pending.is_empty() {
            return Ok(None);
        }
        let take = frames.min(self.pending.len());
        Ok(Some(self.pending.drain(..take).collect()))
    }

    fn decode_next_packet(&mut self) -> Result<()> {
        let packet = match self.format.next_packet() {
            Ok(p) => p,
            Err(_) => {
                self.eof = true;
                return Ok(());
            }
        };
        if packet.track_id() != self.track_id {
            return Ok(());
        }

        let decoded = match self.decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!("skipping undecodable packet: {e}");
                return Ok(());
            }
        };

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        self.pending
            .extend(downmix_to_mono(sample_buf.samples(), self.channels));
        Ok(())
    }
}

/// Average interleaved frames down to one channel.
///
/// A trailing partial frame is ignored.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_passes_mono_through() {
        assert_eq!(downmix_to_mono(&[0.1, 0.2, 0.3], 1), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn downmix_averages_stereo() {
        assert_eq!(downmix_to_mono(&[1.0, 0.0, -0.5, -0.5], 2), vec![0.5, -0.5]);
    }

    #[test]
    fn downmix_drops_partial_frame() {
        assert_eq!(downmix_to_mono(&[0.5, 0.5, 1.0], 2), vec![0.5]);
    }

    #[test]
    fn open_missing_file_fails() {
        let err = MonoDecoder::open(Path::new("/definitely/not/here.wav")).err().unwrap();
        assert!(format!("{err:#}").contains("open"));
    }
}
