//! Per-device playback sessions.
//!
//! One session owns one CPAL output stream bound to one device and runs on
//! its own worker thread. The critical contract: once started, the stream and
//! its registry entry survive **until an explicit stop** — natural completion
//! of the buffer flips the reported state to `Finished` and keeps the stream
//! open, emitting silence. A naive "close when drained" worker caused the
//! whole playing flag to drop the instant the shortest buffer ran out while
//! longer files were still sounding; parking on the stop signal instead of
//! watching the drain removes that class of bug.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, bounded};
use serde::{Deserialize, Serialize};

use crate::buffer::AudioBuffer;
use crate::device;

/// Lifecycle state of a device session.
///
/// Transitions are monotonic and observable: `Idle → Playing → Finished` or
/// `→ Error`. A stopped session has no state at all — stop removes the
/// registry entry, and an absent device reads as `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Playing,
    Finished,
    Error,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Playing,
            2 => SessionState::Finished,
            3 => SessionState::Error,
            _ => SessionState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Playing => 1,
            SessionState::Finished => 2,
            SessionState::Error => 3,
        }
    }
}

/// Lock-free state slot shared between the audio callback, the worker, and
/// status readers. Status polls never block on the write loop.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(SessionState::Idle.as_u8()))
    }

    pub(crate) fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Relaxed))
    }

    /// Advance to `next` only if it is further along the lifecycle.
    pub(crate) fn advance(&self, next: SessionState) {
        self.0.fetch_max(next.as_u8(), Ordering::Relaxed);
    }
}

/// Cooperative stop signal backed by a condvar.
///
/// Workers park on [`wait`](Self::wait) rather than polling a flag in a
/// sleep loop, so a stop takes effect immediately instead of on the next
/// poll tick.
#[derive(Debug, Default)]
pub(crate) struct StopSignal {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Request stop and wake every waiter. Idempotent.
    pub(crate) fn signal(&self) {
        let mut g = self.flag.lock().unwrap_or_else(|e| e.into_inner());
        *g = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Block until stop has been requested.
    pub(crate) fn wait(&self) {
        let mut g = self.flag.lock().unwrap_or_else(|e| e.into_inner());
        while !*g {
            g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
        }
    }

    #[cfg(test)]
    pub(crate) fn is_signalled(&self) -> bool {
        *self.flag.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Engine-facing handle for a running session.
///
/// The worker thread is detached; `done_rx` carries its completion so stops
/// can join with a bounded wait instead of `JoinHandle::join`.
pub(crate) struct SessionHandle {
    pub(crate) state: Arc<StateCell>,
    pub(crate) stop: Arc<StopSignal>,
    pub(crate) done_rx: Receiver<()>,
}

/// Spawn the worker for one device session.
///
/// Returns the handle plus a handshake receiver that resolves once the
/// stream is open and playing (or has failed to open), so callers can report
/// a typed per-device start result.
pub(crate) fn spawn(
    device_index: usize,
    buffer: Arc<AudioBuffer>,
) -> (SessionHandle, Receiver<std::result::Result<(), String>>) {
    let state = Arc::new(StateCell::new());
    let stop = Arc::new(StopSignal::new());
    let (ready_tx, ready_rx) = bounded(1);
    let (done_tx, done_rx) = bounded(1);

    let state_worker = state.clone();
    let stop_worker = stop.clone();
    thread::spawn(move || {
        let host = cpal::default_host();
        match open_stream_for_buffer(&host, device_index, &buffer, &state_worker) {
            Ok(stream) => {
                state_worker.advance(SessionState::Playing);
                let _ = ready_tx.send(Ok(()));

                // Park until an explicit stop, even long after the buffer
                // has drained.
                stop_worker.wait();

                if let Err(e) = stream.pause() {
                    tracing::warn!(
                        device = device_index,
                        error = %e,
                        "graceful stream stop failed; aborting"
                    );
                }
                drop(stream);
            }
            Err(e) => {
                tracing::warn!(device = device_index, error = %format!("{e:#}"), "session open failed");
                let _ = ready_tx.send(Err(format!("{e:#}")));
            }
        }
        let _ = done_tx.send(());
    });

    (
        SessionHandle {
            state,
            stop,
            done_rx,
        },
        ready_rx,
    )
}

/// Open the device at `device_index`, build an output stream fed from
/// `buffer`, and start it.
///
/// The stream uses a channel count the device actually supports: a narrower
/// device gets the buffer downmixed by averaging so no channel is dropped,
/// and a wider one is filled by duplicating the last source channel in the
/// callback. The stream is opened at the buffer's sample rate when the
/// device range allows it.
fn open_stream_for_buffer(
    host: &cpal::Host,
    device_index: usize,
    buffer: &Arc<AudioBuffer>,
    state: &Arc<StateCell>,
) -> Result<cpal::Stream> {
    let device = device::open_output_device(host, device_index)?;
    let (config, sample_format, channels) =
        device::pick_output_config(&device, buffer.sample_rate(), buffer.channels())?;

    let playable = if channels < buffer.channels() {
        tracing::info!(
            device = device_index,
            from = buffer.channels(),
            to = channels,
            "downmixing for narrower device"
        );
        Arc::new(buffer.downmixed(channels))
    } else {
        buffer.clone()
    };

    if config.sample_rate != buffer.sample_rate() {
        tracing::warn!(
            device = device_index,
            buffer_hz = buffer.sample_rate(),
            stream_hz = config.sample_rate,
            "device does not support buffer rate; playing at clamped rate"
        );
    }

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, playable, state.clone()),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, playable, state.clone()),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, playable, state.clone()),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, playable, state.clone()),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }?;

    stream.play().context("start output stream")?;
    Ok(stream)
}

/// Type-specialized stream builder.
///
/// The callback applies a simple channel mapping per output frame
/// (pass-through when the layouts match, last-source-channel duplication
/// when the stream is wider than the buffer), then keeps emitting silence
/// once the cursor passes the end, flipping the session state to `Finished`
/// without tearing anything down.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    buffer: Arc<AudioBuffer>,
    state: Arc<StateCell>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let state_err = state.clone();
    let err_fn = move |err| {
        tracing::warn!("stream error: {err}");
        state_err.advance(SessionState::Error);
    };

    let src_channels = buffer.channels() as usize;
    let out_channels = config.channels as usize;
    let total = buffer.samples().len();
    let mut pos = 0usize;
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            for frame in data.chunks_mut(out_channels) {
                for (dst_ch, slot) in frame.iter_mut().enumerate() {
                    let v = mapped_sample(buffer.samples(), pos, src_channels, dst_ch);
                    *slot = <T as cpal::Sample>::from_sample::<f32>(v);
                }
                if pos < total {
                    pos += src_channels;
                }
            }
            if pos >= total {
                state.advance(SessionState::Finished);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// One output sample for `dst_ch` from the source frame at `frame_start`.
///
/// Destination channels past the source layout read the last source channel,
/// so a mono buffer fills every channel of a stereo-only device. Past the end
/// of the buffer this yields silence.
fn mapped_sample(samples: &[f32], frame_start: usize, src_channels: usize, dst_ch: usize) -> f32 {
    let idx = frame_start + dst_ch.min(src_channels.saturating_sub(1));
    samples.get(idx).copied().unwrap_or(0.0)
}

/// Synchronously play a short, low-amplitude sine probe on a device.
///
/// Every failure is swallowed into `false`; this is a health check, not a
/// fallible operation.
pub(crate) fn probe_device(host: &cpal::Host, device_index: usize) -> bool {
    const PROBE_SECS: f32 = 0.1;

    let buffer = Arc::new(AudioBuffer::sine(PROBE_SECS, 440.0, 44_100, 0.2));
    let state = Arc::new(StateCell::new());
    match open_stream_for_buffer(host, device_index, &buffer, &state) {
        Ok(stream) => {
            thread::sleep(Duration::from_millis((PROBE_SECS * 1000.0) as u64 + 50));
            drop(stream);
            true
        }
        Err(e) => {
            tracing::debug!(device = device_index, error = %format!("{e:#}"), "device probe failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cell_starts_idle() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), SessionState::Idle);
    }

    #[test]
    fn state_cell_advances_forward_only() {
        let cell = StateCell::new();
        cell.advance(SessionState::Playing);
        assert_eq!(cell.get(), SessionState::Playing);
        cell.advance(SessionState::Finished);
        assert_eq!(cell.get(), SessionState::Finished);
        // A late "playing" report cannot regress an observed terminal state.
        cell.advance(SessionState::Playing);
        assert_eq!(cell.get(), SessionState::Finished);
    }

    #[test]
    fn state_cell_error_overrides_finished() {
        let cell = StateCell::new();
        cell.advance(SessionState::Finished);
        cell.advance(SessionState::Error);
        assert_eq!(cell.get(), SessionState::Error);
    }

    #[test]
    fn stop_signal_wakes_waiter() {
        let signal = Arc::new(StopSignal::new());
        let waiter = signal.clone();
        let handle = thread::spawn(move || waiter.wait());
        signal.signal();
        handle.join().unwrap();
        assert!(signal.is_signalled());
    }

    #[test]
    fn stop_signal_is_idempotent() {
        let signal = StopSignal::new();
        signal.signal();
        signal.signal();
        assert!(signal.is_signalled());
        // A wait after signalling returns immediately.
        signal.wait();
    }

    #[test]
    fn mapped_sample_duplicates_mono_into_wider_streams() {
        let mono = [0.25_f32, -0.5];
        // Frame 0: both stereo channels read the single source channel.
        assert_eq!(mapped_sample(&mono, 0, 1, 0), 0.25);
        assert_eq!(mapped_sample(&mono, 0, 1, 1), 0.25);
        // Frame 1 (frame_start advanced by src_channels).
        assert_eq!(mapped_sample(&mono, 1, 1, 0), -0.5);
        assert_eq!(mapped_sample(&mono, 1, 1, 1), -0.5);
    }

    #[test]
    fn mapped_sample_passes_matched_layouts_through() {
        let stereo = [0.1_f32, 0.2, 0.3, 0.4];
        assert_eq!(mapped_sample(&stereo, 0, 2, 0), 0.1);
        assert_eq!(mapped_sample(&stereo, 0, 2, 1), 0.2);
        assert_eq!(mapped_sample(&stereo, 2, 2, 0), 0.3);
        assert_eq!(mapped_sample(&stereo, 2, 2, 1), 0.4);
    }

    #[test]
    fn mapped_sample_is_silent_past_the_end() {
        let stereo = [0.1_f32, 0.2];
        assert_eq!(mapped_sample(&stereo, 2, 2, 0), 0.0);
        assert_eq!(mapped_sample(&stereo, 2, 2, 1), 0.0);
    }

    #[test]
    fn spawn_reports_open_failure_for_bogus_device() {
        let buffer = Arc::new(AudioBuffer::sine(0.05, 440.0, 44_100, 0.1));
        let (handle, ready_rx) = spawn(usize::MAX, buffer);
        let result = ready_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("handshake");
        assert!(result.is_err());
        // Worker exits on its own after a failed open.
        assert!(handle.done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
