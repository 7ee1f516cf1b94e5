//! Engine status handler.

use std::collections::BTreeMap;

use actix_web::{HttpResponse, Responder, get, web};

use crate::models::{StatusResponse, state_label};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Per-device session states", body = StatusResponse)
    )
)]
#[get("/status")]
/// Snapshot of every cataloged device's session state.
pub async fn status(state: web::Data<AppState>) -> impl Responder {
    let snapshot = state.engine.status();
    let devices: BTreeMap<usize, String> = snapshot
        .into_iter()
        .map(|(idx, s)| (idx, state_label(s).to_string()))
        .collect();

    HttpResponse::Ok().json(StatusResponse {
        success: true,
        is_playing: state.engine.is_playing(),
        devices,
    })
}
