//! Session registry and playback orchestration.
//!
//! [`PlaybackEngine`] owns the device catalog snapshot and the per-device
//! session registry. It is constructed once at process start and shared by
//! `Arc` — there is no ambient global state. The registry mutex is the only
//! mutable shared domain; status reads take it briefly and read atomic state
//! cells, so a slow device's write loop can never block a poll.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use crate::buffer::AudioBuffer;
use crate::device::{self, AudioDevice};
use crate::session::{self, SessionHandle, SessionState};

/// Default cap on simultaneous sessions, chosen to avoid overwhelming the
/// host's audio backend.
pub const DEFAULT_MAX_SESSIONS: usize = 4;

/// How long a start waits for the worker's stream-open handshake.
const START_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded join applied to each worker during stop. A hung backend must not
/// hang the stop call.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Expected, recoverable engine conditions plus backend faults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineError {
    /// The device index is not in the current catalog snapshot.
    DeviceNotFound,
    /// The device already hosts a session (including a `Finished` one that
    /// has not been explicitly stopped yet).
    DeviceBusy,
    /// The concurrent-session cap is reached.
    CapacityExceeded,
    /// The payload could not be decoded into playable audio.
    DecodeError(String),
    /// Stream open/write/close failure reported by the audio backend.
    BackendIo(String),
    /// Stop requested for a device with no session. Callers treat this as
    /// success.
    AlreadyStopped,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::DeviceNotFound => write!(f, "device not found"),
            EngineError::DeviceBusy => write!(f, "device is already playing"),
            EngineError::CapacityExceeded => write!(f, "maximum simultaneous sessions reached"),
            EngineError::DecodeError(msg) => write!(f, "decode error: {msg}"),
            EngineError::BackendIo(msg) => write!(f, "audio backend error: {msg}"),
            EngineError::AlreadyStopped => write!(f, "already stopped"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Multi-device playback engine.
///
/// The catalog is read-mostly and swapped wholesale on rediscovery. Audio
/// buffers are shared read-only across sessions.
pub struct PlaybackEngine {
    catalog: RwLock<Vec<AudioDevice>>,
    registry: Mutex<HashMap<usize, SessionHandle>>,
    max_sessions: usize,
}

impl PlaybackEngine {
    /// Build an engine with an empty catalog. Call [`discover`](Self::discover)
    /// before playing.
    pub fn new(max_sessions: usize) -> Self {
        Self::with_catalog(Vec::new(), max_sessions)
    }

    /// Build an engine around a pre-populated catalog snapshot.
    pub fn with_catalog(devices: Vec<AudioDevice>, max_sessions: usize) -> Self {
        Self {
            catalog: RwLock::new(devices),
            registry: Mutex::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Run a discovery pass and replace the catalog snapshot wholesale.
    pub fn discover(&self) -> anyhow::Result<Vec<AudioDevice>> {
        let host = cpal::default_host();
        let devices = device::discover(&host)?;
        let mut catalog = self.catalog.write().unwrap_or_else(|e| e.into_inner());
        *catalog = devices.clone();
        Ok(devices)
    }

    /// Clone of the current catalog snapshot.
    pub fn devices(&self) -> Vec<AudioDevice> {
        self.catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn device_exists(&self, index: usize) -> bool {
        self.catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|d| d.index == index)
    }

    /// Play a short probe tone on `index`, reporting success as a boolean.
    pub fn test_device(&self, index: usize) -> bool {
        if !self.device_exists(index) {
            return false;
        }
        let host = cpal::default_host();
        session::probe_device(&host, index)
    }

    /// Start playback of `buffer` on the device at `index`.
    ///
    /// Fails with [`EngineError::DeviceBusy`] when the device already hosts a
    /// session and [`EngineError::CapacityExceeded`] when the cap is reached;
    /// both leave existing sessions untouched.
    pub fn play_on_device(
        &self,
        index: usize,
        buffer: Arc<AudioBuffer>,
    ) -> Result<(), EngineError> {
        if !self.device_exists(index) {
            return Err(EngineError::DeviceNotFound);
        }

        let ready_rx = {
            let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            if registry.contains_key(&index) {
                return Err(EngineError::DeviceBusy);
            }
            if registry.len() >= self.max_sessions {
                tracing::warn!(
                    device = index,
                    cap = self.max_sessions,
                    "session cap reached; refusing start"
                );
                return Err(EngineError::CapacityExceeded);
            }
            let (handle, ready_rx) = session::spawn(index, buffer);
            registry.insert(index, handle);
            ready_rx
        };

        match ready_rx.recv_timeout(START_HANDSHAKE_TIMEOUT) {
            Ok(Ok(())) => {
                tracing::info!(device = index, "playback started");
                Ok(())
            }
            Ok(Err(msg)) => {
                self.remove_entry(index);
                Err(EngineError::BackendIo(msg))
            }
            Err(_) => {
                // Signal stop so a late open tears itself down.
                if let Some(handle) = self.remove_entry(index) {
                    handle.stop.signal();
                }
                Err(EngineError::BackendIo("timed out opening stream".into()))
            }
        }
    }

    /// Play the same buffer on every working device.
    ///
    /// Each device is probed first; probe failures are skipped. Start
    /// attempts then fan out concurrently and the call returns once every
    /// attempt has resolved — it does not wait for playback to finish.
    pub fn play_on_all(&self, buffer: &Arc<AudioBuffer>) -> BTreeMap<usize, bool> {
        let devices = self.devices();
        let host = cpal::default_host();

        let mut working = Vec::new();
        for dev in &devices {
            if session::probe_device(&host, dev.index) {
                working.push(dev.index);
            } else {
                tracing::info!(device = dev.index, name = %dev.name, "skipping device that failed probe");
            }
        }

        let results = Mutex::new(BTreeMap::new());
        thread::scope(|scope| {
            for index in working {
                let buffer = buffer.clone();
                let results = &results;
                scope.spawn(move || {
                    let started = match self.play_on_device(index, buffer) {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::warn!(device = index, error = %e, "fan-out start failed");
                            false
                        }
                    };
                    results
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(index, started);
                });
            }
        });
        results.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    /// Play a distinct buffer per device.
    ///
    /// Per-device failures are isolated in their own result slot and never
    /// cancel sibling playbacks.
    pub fn play_multi(
        &self,
        assignments: Vec<(usize, Arc<AudioBuffer>)>,
    ) -> BTreeMap<usize, Result<(), EngineError>> {
        let results = Mutex::new(BTreeMap::new());
        thread::scope(|scope| {
            for (index, buffer) in assignments {
                let results = &results;
                scope.spawn(move || {
                    let outcome = self.play_on_device(index, buffer);
                    if let Err(e) = &outcome {
                        tracing::warn!(device = index, error = %e, "multi-file start failed");
                    }
                    results
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(index, outcome);
                });
            }
        });
        results.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    /// Stop one device's session and remove its registry entry.
    ///
    /// Idempotent: stopping an absent device returns
    /// [`EngineError::AlreadyStopped`], which callers treat as success.
    pub fn stop(&self, index: usize) -> Result<(), EngineError> {
        let Some(handle) = self.remove_entry(index) else {
            tracing::debug!(device = index, "stop for idle device");
            return Err(EngineError::AlreadyStopped);
        };

        handle.stop.signal();
        if handle.done_rx.recv_timeout(STOP_JOIN_TIMEOUT).is_err() {
            tracing::warn!(device = index, "session worker did not exit promptly");
        }
        tracing::info!(device = index, "playback stopped");
        Ok(())
    }

    /// Stop everything: signal every session first, then bounded-join each
    /// worker, then leave the registry empty regardless of partial failures.
    pub fn stop_all(&self) {
        let drained: Vec<(usize, SessionHandle)> = {
            let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.drain().collect()
        };

        if drained.is_empty() {
            return;
        }
        tracing::info!(count = drained.len(), "stopping all playback");

        for (_, handle) in &drained {
            handle.stop.signal();
        }
        for (index, handle) in &drained {
            if handle.done_rx.recv_timeout(STOP_JOIN_TIMEOUT).is_err() {
                tracing::warn!(device = index, "worker still alive after stop timeout; continuing");
            }
        }
    }

    /// Consistent point-in-time snapshot of every catalog device's state.
    ///
    /// Devices without a registry entry report [`SessionState::Idle`].
    pub fn status(&self) -> BTreeMap<usize, SessionState> {
        let catalog = self.catalog.read().unwrap_or_else(|e| e.into_inner());
        let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        catalog
            .iter()
            .map(|dev| {
                let state = registry
                    .get(&dev.index)
                    .map(|h| h.state.get())
                    .unwrap_or(SessionState::Idle);
                (dev.index, state)
            })
            .collect()
    }

    /// True iff any tracked session is currently `Playing`.
    pub fn is_playing(&self) -> bool {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .any(|h| h.state.get() == SessionState::Playing)
    }

    /// Number of tracked sessions (including `Finished` ones, which occupy a
    /// cap slot until explicitly stopped).
    pub fn active_sessions(&self) -> usize {
        self.registry.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn remove_entry(&self, index: usize) -> Option<SessionHandle> {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&index)
    }
}
