//! Output device selection and the CPAL-backed [`OutputFactory`].
//!
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - opening a fixed-block output stream for the listener

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::controller::{OutputDevice, OutputFactory};
use crate::playback::{SampleProvider, build_output_stream};

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
///
/// Returns an error if no suitable device is found.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose the best output config for a target sample rate.
///
/// Prefers the highest supported rate that is **<= target_rate**, then the lowest
/// channel count, then the best sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();

    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;

    for range in ranges {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            below: rate <= target_rate,
            rate,
            channels: range.channels(),
            format_rank: sample_format_rank(range.sample_format()),
        };
        let replace = match &best {
            None => true,
            Some((b, _)) => candidate.is_better_than(b),
        };
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Request exactly `block_size` frames per callback when the device allows it.
///
/// Returns `None` when the device does not advertise a range containing the block size;
/// CPAL then uses its default and the pull callback copes with any period length.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    block_size: usize,
) -> Option<cpal::BufferSize> {
    let frames = u32::try_from(block_size).ok()?;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            Some(cpal::BufferSize::Fixed(frames))
        }
        _ => None,
    }
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    below: bool,
    rate: u32,
    channels: u16,
    format_rank: u8,
}

impl Candidate {
    fn is_better_than(&self, best: &Candidate) -> bool {
        if self.below != best.below {
            self.below && !best.below
        } else if self.rate != best.rate {
            if self.below {
                self.rate > best.rate
            } else {
                self.rate < best.rate
            }
        } else if self.channels != best.channels {
            self.channels < best.channels
        } else {
            self.format_rank < best.format_rank
        }
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// Log available output devices for the current host.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

/// Opens CPAL output streams on the selected device.
pub struct CpalOutputFactory {
    host: cpal::Host,
    device: Option<String>,
    sample_rate: u32,
}

impl CpalOutputFactory {
    /// `device` is an optional case-insensitive substring of the device name.
    pub fn new(host: cpal::Host, device: Option<String>, sample_rate: u32) -> Self {
        Self {
            host,
            device,
            sample_rate,
        }
    }
}

impl OutputFactory for CpalOutputFactory {
    fn create(&mut self, block_size: usize, channels: u16) -> Result<Box<dyn OutputDevice>> {
        let device = pick_device(&self.host, self.device.as_deref())?;
        let name = device.description().ok().map(|d| d.to_string());
        let supported = pick_output_config(&device, self.sample_rate)?;
        let mut stream_config: cpal::StreamConfig = supported.clone().into();
        match pick_buffer_size(&supported, block_size) {
            Some(buf) => stream_config.buffer_size = buf,
            None => tracing::warn!(
                block_size,
                "device does not accept the block size; using its default period"
            ),
        }
        if stream_config.sample_rate != self.sample_rate {
            tracing::warn!(
                requested_hz = self.sample_rate,
                output_hz = stream_config.sample_rate,
                "output rate differs from stream rate; pitch will shift"
            );
        }
        if stream_config.channels != channels {
            tracing::info!(
                channels = stream_config.channels,
                "device is not mono; duplicating samples across channels"
            );
        }
        tracing::info!(
            device = name.as_deref().unwrap_or("unknown"),
            output_rate_hz = stream_config.sample_rate,
            buffer_size = ?stream_config.buffer_size,
            "device output config"
        );

        Ok(Box::new(CpalOutput {
            device,
            name,
            stream_config,
            sample_format: supported.sample_format(),
            block_size,
            stream: None,
        }))
    }
}

/// CPAL device plus the stream that is running while attached.
struct CpalOutput {
    device: cpal::Device,
    name: Option<String>,
    stream_config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    block_size: usize,
    stream: Option<cpal::Stream>,
}

impl OutputDevice for CpalOutput {
    fn attach(&mut self, provider: Box<dyn SampleProvider>) -> Result<()> {
        self.detach();
        let stream = build_output_stream(
            &self.device,
            &self.stream_config,
            self.sample_format,
            self.block_size,
            provider,
        )?;
        stream.play().context("start output stream")?;
        self.stream = Some(stream);
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("stream pause on detach failed: {e}");
            }
            // Dropping the stream joins the callback; no pull runs after this returns.
            drop(stream);
        }
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(below: bool, rate: u32, channels: u16, format_rank: u8) -> Candidate {
        Candidate {
            below,
            rate,
            channels,
            format_rank,
        }
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, 48_000), 48_000);
    }

    #[test]
    fn pick_rate_for_range_clamps_below_min() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, 22_050), 44_100);
    }

    #[test]
    fn pick_rate_for_range_clamps_above_max() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, 192_000), 96_000);
    }

    #[test]
    fn candidate_prefers_below_target() {
        assert!(candidate(true, 44_100, 2, 1).is_better_than(&candidate(false, 48_000, 2, 1)));
    }

    #[test]
    fn candidate_prefers_higher_rate_below_target() {
        assert!(candidate(true, 44_100, 2, 2).is_better_than(&candidate(true, 22_050, 2, 2)));
    }

    #[test]
    fn candidate_prefers_closest_rate_above_target() {
        assert!(candidate(false, 48_000, 2, 2).is_better_than(&candidate(false, 96_000, 2, 2)));
    }

    #[test]
    fn candidate_prefers_fewer_channels() {
        assert!(candidate(true, 44_100, 1, 2).is_better_than(&candidate(true, 44_100, 2, 0)));
    }

    #[test]
    fn candidate_prefers_lower_format_rank() {
        assert!(candidate(true, 44_100, 2, 0).is_better_than(&candidate(true, 44_100, 2, 2)));
    }
}
