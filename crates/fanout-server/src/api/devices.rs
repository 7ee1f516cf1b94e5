//! Device discovery and probe handlers.

use actix_web::{HttpResponse, Responder, get, post, web};

use crate::models::{DevicesResponse, TestDeviceRequest, TestDeviceResponse};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/devices",
    responses(
        (status = 200, description = "Output devices", body = DevicesResponse),
        (status = 500, description = "Host enumeration failed")
    )
)]
#[get("/devices")]
/// Re-discover and list output devices.
pub async fn devices_list(state: web::Data<AppState>) -> impl Responder {
    let engine = state.engine.clone();
    let discovered = web::block(move || engine.discover()).await;
    match discovered {
        Ok(Ok(devices)) => {
            let devices: Vec<_> = devices.into_iter().map(Into::into).collect();
            let count = devices.len();
            HttpResponse::Ok().json(DevicesResponse {
                success: true,
                devices,
                count,
            })
        }
        Ok(Err(e)) => {
            tracing::error!(error = %format!("{e:#}"), "device discovery failed");
            HttpResponse::InternalServerError().body(format!("{e:#}"))
        }
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[utoipa::path(
    post,
    path = "/devices/test",
    request_body = TestDeviceRequest,
    responses(
        (status = 200, description = "Probe result", body = TestDeviceResponse)
    )
)]
#[post("/devices/test")]
/// Play a short probe tone on one device.
///
/// Failures are reported as `success: false`, never as an error status.
pub async fn device_test(
    state: web::Data<AppState>,
    body: web::Json<TestDeviceRequest>,
) -> impl Responder {
    let device_id = body.device_id;
    let engine = state.engine.clone();
    let success = web::block(move || engine.test_device(device_id))
        .await
        .unwrap_or(false);
    HttpResponse::Ok().json(TestDeviceResponse { success, device_id })
}
