use utoipa::OpenApi;

use crate::api;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::devices::devices_list,
        api::devices::device_test,
        api::playback::play_tone,
        api::playback::play_device,
        api::playback::play_all,
        api::playback::play_multi,
        api::playback::stop,
        api::playback::force_stop,
        api::status::status,
    ),
    components(
        schemas(
            models::DeviceInfo,
            models::DevicesResponse,
            models::TestDeviceRequest,
            models::TestDeviceResponse,
            models::ToneRequest,
            models::PlayDeviceResponse,
            models::FanoutResponse,
            models::MultiPlayItem,
            models::MultiPlayRequest,
            models::DeviceResult,
            models::MultiPlayResponse,
            models::StopRequest,
            models::OkResponse,
            models::StatusResponse,
        )
    ),
    tags(
        (name = "fanout-server", description = "Multi-device audio playback API")
    )
)]
pub struct ApiDoc;
