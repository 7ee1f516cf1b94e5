//! API models and OpenAPI schemas.
//!
//! Defines request/response structures for the fanout server API.

use std::collections::BTreeMap;

use fanout_engine::{AudioDevice, SessionState};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One output device as reported by discovery.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceInfo {
    /// Stable index within the current catalog snapshot.
    pub index: usize,
    /// Human-readable device name.
    pub name: String,
    /// Maximum input channels.
    pub max_input_channels: u16,
    /// Maximum output channels.
    pub max_output_channels: u16,
    /// Default sample rate in Hz.
    pub default_sample_rate: u32,
    /// Whether this is the host default output.
    pub is_default: bool,
}

impl From<AudioDevice> for DeviceInfo {
    fn from(d: AudioDevice) -> Self {
        Self {
            index: d.index,
            name: d.name,
            max_input_channels: d.max_input_channels,
            max_output_channels: d.max_output_channels,
            default_sample_rate: d.default_sample_rate,
            is_default: d.is_default,
        }
    }
}

/// Device listing response.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DevicesResponse {
    pub success: bool,
    pub devices: Vec<DeviceInfo>,
    pub count: usize,
}

/// Device probe request.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TestDeviceRequest {
    /// Catalog index of the device to probe.
    pub device_id: usize,
}

/// Device probe result.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TestDeviceResponse {
    pub success: bool,
    pub device_id: usize,
}

/// Tone playback request. Defaults: 2 s at 440 Hz.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ToneRequest {
    /// Tone duration in seconds.
    pub duration: Option<f32>,
    /// Tone frequency in Hz.
    pub frequency: Option<f32>,
}

/// Result of a single-device playback request.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PlayDeviceResponse {
    pub success: bool,
    pub device_id: usize,
    /// Failure reason when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a fan-out playback request (tone or play-all).
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FanoutResponse {
    pub success: bool,
    /// Batch id owning the spooled upload, when one was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    /// Devices on which playback started.
    pub devices_playing: usize,
    /// Devices attempted.
    pub total_devices: usize,
}

/// One file-to-device assignment in a multi-file request.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MultiPlayItem {
    /// Catalog index of the target device.
    pub device_id: usize,
    /// File extension of the payload (allow-listed).
    pub ext: String,
    /// Base64-encoded audio payload.
    pub data: String,
}

/// Multi-file playback request. The mapping is explicit per item, so a file
/// can never be cross-assigned to the wrong device.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MultiPlayRequest {
    pub items: Vec<MultiPlayItem>,
}

/// Per-device slot in a multi-file result.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Multi-file playback response.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MultiPlayResponse {
    pub success: bool,
    /// Batch id owning the spooled uploads; absent when nothing started (the
    /// files are reclaimed immediately).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub devices_playing: usize,
    pub total_devices: usize,
    /// Device index → start outcome.
    pub results: BTreeMap<usize, DeviceResult>,
}

/// Stop request: one batch when `batch_id` is given, everything otherwise.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct StopRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

/// Generic acknowledgement.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct OkResponse {
    pub success: bool,
    pub message: String,
}

/// Aggregated playback status.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub success: bool,
    /// Device index → lifecycle state (`Idle`, `Playing`, `Finished`,
    /// `Error`).
    pub devices: BTreeMap<usize, String>,
    /// True iff any tracked session is `Playing`.
    pub is_playing: bool,
}

/// Stable string label for a session state.
pub fn state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Idle => "Idle",
        SessionState::Playing => "Playing",
        SessionState::Finished => "Finished",
        SessionState::Error => "Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_labels_are_stable() {
        assert_eq!(state_label(SessionState::Idle), "Idle");
        assert_eq!(state_label(SessionState::Playing), "Playing");
        assert_eq!(state_label(SessionState::Finished), "Finished");
        assert_eq!(state_label(SessionState::Error), "Error");
    }

    #[test]
    fn fanout_response_omits_absent_batch_id() {
        let resp = FanoutResponse {
            success: true,
            batch_id: None,
            devices_playing: 2,
            total_devices: 3,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("batch_id").is_none());
    }
}
