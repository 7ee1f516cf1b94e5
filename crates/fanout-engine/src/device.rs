//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - enumerating output-capable devices into an immutable catalog snapshot
//! - re-acquiring a device by catalog index when a session starts
//! - choosing a concrete output config for a buffer's rate and channel count

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

/// Immutable descriptor for one output-capable device.
///
/// `index` is the device's position in the host enumeration and stays valid
/// for the lifetime of the catalog snapshot that produced it. A fresh
/// [`discover`] pass replaces the whole catalog; descriptors are never
/// mutated in place.
#[derive(Clone, Debug, Serialize)]
pub struct AudioDevice {
    /// Stable handle within the current catalog snapshot.
    pub index: usize,
    /// Human-readable device name.
    pub name: String,
    /// Maximum input channels (0 for pure outputs).
    pub max_input_channels: u16,
    /// Maximum output channels.
    pub max_output_channels: u16,
    /// Default output sample rate in Hz.
    pub default_sample_rate: u32,
    /// Whether this is the host default output device.
    pub is_default: bool,
}

/// Enumerate output-capable devices in one pass.
///
/// Devices reporting no output channels are filtered out, but their
/// enumeration positions are preserved so `index` remains a stable handle
/// into the host ordering. Safe to call repeatedly; each call is a full
/// refresh.
pub fn discover(host: &cpal::Host) -> Result<Vec<AudioDevice>> {
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok().map(|n| n.to_string()));

    let mut out = Vec::new();
    for (index, device) in host.devices().context("No audio devices")?.enumerate() {
        let name = match device.description() {
            Ok(n) => n.to_string(),
            Err(e) => {
                tracing::warn!(index, error = %e, "skipping device with unreadable name");
                continue;
            }
        };

        let max_output_channels = max_channels(device.supported_output_configs().ok());
        if max_output_channels == 0 {
            continue;
        }
        let max_input_channels = max_channels(device.supported_input_configs().ok());

        let default_sample_rate = device
            .default_output_config()
            .map(|cfg| cfg.sample_rate())
            .unwrap_or(44_100);

        out.push(AudioDevice {
            index,
            name: name.clone(),
            max_input_channels,
            max_output_channels,
            default_sample_rate,
            is_default: default_name.as_deref() == Some(name.as_str()),
        });
    }

    tracing::info!(count = out.len(), "discovered output devices");
    Ok(out)
}

fn max_channels<I>(ranges: Option<I>) -> u16
where
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    ranges
        .map(|iter| iter.map(|r| r.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

/// Re-acquire the CPAL device at `index` in the host enumeration.
///
/// Returns an error when the index is out of range or the device no longer
/// reports output capability (e.g. unplugged since discovery).
pub fn open_output_device(host: &cpal::Host, index: usize) -> Result<cpal::Device> {
    let device = host
        .devices()
        .context("No audio devices")?
        .nth(index)
        .ok_or_else(|| anyhow!("No device at index {index}"))?;

    if max_channels(device.supported_output_configs().ok()) == 0 {
        return Err(anyhow!("Device {index} has no output channels"));
    }
    Ok(device)
}

/// Choose an output config for a buffer's sample rate and channel count.
///
/// The stream channel count is always a range's own count — some backends
/// refuse configs narrower than the range they came from. A wider stream is
/// filled by duplicating the last source channel in the playback callback; a
/// narrower one has the buffer downmixed by the caller. The sample rate is
/// the buffer's rate when a range contains it, otherwise clamped into the
/// closest range (basic normalization only; no resampling stage).
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
    want_channels: u16,
) -> Result<(cpal::StreamConfig, cpal::SampleFormat, u16)> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();
    if ranges.is_empty() {
        return Err(anyhow!("No supported output configs"));
    }

    let mut best: Option<(u32, u32, u8, u16, u32, cpal::SampleFormat)> = None;
    for range in &ranges {
        let channels = range.channels();
        if channels == 0 {
            continue;
        }
        let penalty = channel_penalty(channels, want_channels);
        let rate = clamp_rate(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let dist = rate.abs_diff(target_rate);
        let rank = sample_format_rank(range.sample_format());

        let replace = match &best {
            None => true,
            Some((b_pen, b_dist, b_rank, ..)) => {
                is_better_candidate(penalty, dist, rank, *b_pen, *b_dist, *b_rank)
            }
        };
        if replace {
            best = Some((penalty, dist, rank, channels, rate, range.sample_format()));
        }
    }

    let (_, _, _, channels, rate, sample_format) =
        best.ok_or_else(|| anyhow!("No usable output config"))?;

    let config = cpal::StreamConfig {
        channels,
        sample_rate: rate,
        buffer_size: cpal::BufferSize::Default,
    };
    Ok((config, sample_format, channels))
}

fn clamp_rate(min: u32, max: u32, target: u32) -> u32 {
    if target < min {
        min
    } else if target > max {
        max
    } else {
        target
    }
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

/// Lower is better. An exact channel match is 0; a wider layout costs its
/// extra channels; any narrower layout (forcing a downmix) is worse than
/// every wider one, closest-to-want first.
fn channel_penalty(channels: u16, want: u16) -> u32 {
    if channels >= want {
        (channels - want) as u32
    } else {
        1_000 + (want - channels) as u32
    }
}

fn is_better_candidate(
    penalty: u32,
    dist: u32,
    rank: u8,
    best_penalty: u32,
    best_dist: u32,
    best_rank: u8,
) -> bool {
    if penalty != best_penalty {
        penalty < best_penalty
    } else if dist != best_dist {
        // Prefer the rate closest to the buffer's own rate.
        dist < best_dist
    } else {
        rank < best_rank
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_rate_prefers_target_when_in_range() {
        assert_eq!(clamp_rate(44_100, 96_000, 48_000), 48_000);
    }

    #[test]
    fn clamp_rate_clamps_below_min() {
        assert_eq!(clamp_rate(44_100, 96_000, 22_050), 44_100);
    }

    #[test]
    fn clamp_rate_clamps_above_max() {
        assert_eq!(clamp_rate(44_100, 96_000, 192_000), 96_000);
    }

    #[test]
    fn channel_penalty_ranks_exact_then_wider_then_narrower() {
        // Stereo source: exact match beats quad beats mono.
        assert_eq!(channel_penalty(2, 2), 0);
        assert!(channel_penalty(4, 2) < channel_penalty(1, 2));
        // A stereo-only device still hosts a mono buffer (the callback
        // duplicates) rather than forcing a 1-channel config request.
        assert!(channel_penalty(2, 1) < channel_penalty(1, 2));
    }

    #[test]
    fn is_better_candidate_prefers_lower_channel_penalty() {
        assert!(is_better_candidate(0, 4000, 2, 1001, 0, 0));
    }

    #[test]
    fn is_better_candidate_prefers_closer_rate() {
        assert!(is_better_candidate(0, 0, 2, 0, 3900, 0));
    }

    #[test]
    fn is_better_candidate_prefers_lower_format_rank() {
        assert!(is_better_candidate(0, 0, 0, 0, 0, 2));
    }
}
