//! Decoded PCM audio held in memory.
//!
//! [`AudioBuffer`] is the "wire format" between the decode stage and playback
//! sessions: interleaved `f32` samples normalized to `[-1, 1]`, immutable once
//! built, and shared via `Arc` when the same content plays on several devices
//! at once.

use std::f32::consts::PI;

/// Interleaved `f32` PCM with a fixed channel count and sample rate.
///
/// ## Data model
/// Samples are stored interleaved:
/// `frame0[ch0], frame0[ch1], ..., frame1[ch0], frame1[ch1], ...`
///
/// Buffers are never mutated after construction; playback sessions only read.
#[derive(Clone, Debug)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap interleaved samples. Returns `None` for an empty buffer, a zero
    /// channel count, a zero sample rate, or a sample count that is not a
    /// whole number of frames.
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Option<Self> {
        if samples.is_empty() || channels == 0 || sample_rate == 0 {
            return None;
        }
        if samples.len() % channels as usize != 0 {
            return None;
        }
        Some(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    /// Interleaved sample data.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Channel count (fixed for the buffer's lifetime).
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.frames() as u64).saturating_mul(1000) / self.sample_rate as u64
    }

    /// Synthesize a stereo sine tone.
    ///
    /// Used for the device probe and the `/tone` endpoint. `amplitude` is
    /// clamped to `[0, 1]`; non-positive or non-finite durations yield a
    /// single silent frame rather than an invalid buffer.
    pub fn sine(duration_secs: f32, frequency_hz: f32, sample_rate: u32, amplitude: f32) -> Self {
        let secs = if duration_secs.is_finite() && duration_secs > 0.0 {
            duration_secs
        } else {
            0.0
        };
        let frames = ((sample_rate as f32 * secs).round() as usize).max(1);
        let amp = amplitude.clamp(0.0, 1.0);

        let mut samples = Vec::with_capacity(frames * 2);
        for n in 0..frames {
            let t = n as f32 / sample_rate as f32;
            let v = amp * (2.0 * PI * frequency_hz * t).sin();
            samples.push(v);
            samples.push(v);
        }

        Self {
            samples,
            channels: 2,
            sample_rate,
        }
    }

    /// Downmix to `target_channels` by averaging, never by dropping.
    ///
    /// Output channel `c` is the mean of source channels `c, c+target,
    /// c+2*target, ...`. Returns a borrowed clone when no mix is needed;
    /// upmixing is not performed here (the output callback duplicates
    /// channels when the device is wider than the buffer).
    pub fn downmixed(&self, target_channels: u16) -> Self {
        if target_channels == 0 || target_channels >= self.channels {
            return self.clone();
        }

        let src_ch = self.channels as usize;
        let dst_ch = target_channels as usize;
        let frames = self.frames();
        let mut out = Vec::with_capacity(frames * dst_ch);

        for frame in 0..frames {
            let base = frame * src_ch;
            for dst in 0..dst_ch {
                let mut sum = 0.0f32;
                let mut count = 0u32;
                let mut src = dst;
                while src < src_ch {
                    sum += self.samples[base + src];
                    count += 1;
                    src += dst_ch;
                }
                out.push(sum / count as f32);
            }
        }

        Self {
            samples: out,
            channels: target_channels,
            sample_rate: self.sample_rate,
        }
    }
}
