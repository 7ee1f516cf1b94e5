//! Audio decode stage.
//!
//! Uses Symphonia to probe the container/codec and decode the whole input
//! into an [`AudioBuffer`]. Unlike a streaming player, the engine wants the
//! full PCM up front: the same buffer may be handed to several device
//! sessions at once, so there is no per-session decode loop to coordinate.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::buffer::AudioBuffer;

/// Decode an in-memory byte payload (e.g. an HTTP upload) into a buffer.
///
/// `ext_hint` is the file extension without the dot, used to prime the probe.
pub fn decode_bytes(bytes: Vec<u8>, ext_hint: Option<&str>) -> Result<Arc<AudioBuffer>> {
    let mut hint = Hint::new();
    if let Some(ext) = ext_hint {
        hint.with_extension(ext);
    }
    decode_media_source(Box::new(Cursor::new(bytes)), hint)
}

/// Decode a file on disk into a buffer.
pub fn decode_file(path: &Path) -> Result<Arc<AudioBuffer>> {
    let file = std::fs::File::open(path).with_context(|| format!("open {:?}", path))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    decode_media_source(Box::new(file), hint)
}

/// Probe `source` and decode every packet into interleaved `f32`.
fn decode_media_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<Arc<AudioBuffer>> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("probe audio format")?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("No default audio track"))?;

    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| anyhow!("Unknown channels"))?
        .count();
    let rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("Unknown sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("instantiate decoder")?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(_) => break, // EOF
        };

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(_) => continue,
        };

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    let channels = u16::try_from(channels).map_err(|_| anyhow!("Too many channels"))?;
    let buffer = AudioBuffer::new(samples, channels, rate)
        .ok_or_else(|| anyhow!("Decoded audio is empty"))?;

    tracing::debug!(
        channels = buffer.channels(),
        rate_hz = buffer.sample_rate(),
        duration_ms = buffer.duration_ms(),
        "decoded audio payload"
    );

    Ok(Arc::new(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal 16-bit PCM WAV writer for fixture data.
    fn wav_bytes(frames: usize, channels: u16, rate: u32) -> Vec<u8> {
        let data_len = (frames * channels as usize * 2) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&(rate * channels as u32 * 2).to_le_bytes());
        out.extend_from_slice(&(channels * 2).to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for n in 0..frames * channels as usize {
            let v = ((n % 64) as i16 - 32) * 512;
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    #[test]
    fn decode_bytes_reads_pcm_wav() {
        let bytes = wav_bytes(4800, 2, 48_000);
        let buf = decode_bytes(bytes, Some("wav")).unwrap();
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.sample_rate(), 48_000);
        assert_eq!(buf.frames(), 4800);
        assert_eq!(buf.duration_ms(), 100);
    }

    #[test]
    fn decode_bytes_rejects_garbage() {
        let res = decode_bytes(vec![0u8; 128], Some("wav"));
        assert!(res.is_err());
    }

    #[test]
    fn decode_bytes_rejects_empty_payload() {
        assert!(decode_bytes(Vec::new(), None).is_err());
    }

    #[test]
    fn decode_file_missing_path_errors() {
        let res = decode_file(Path::new("/nonexistent/audio.wav"));
        assert!(res.is_err());
    }
}
