//! Playback control handlers.
//!
//! Expected, recoverable conditions (device busy, at capacity, unknown
//! device) come back as `success: false` payloads; only malformed requests
//! get 4xx and only host-level faults get 5xx. Engine calls that may block
//! on audio hardware run on the blocking pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use actix_web::{HttpResponse, Responder, post, web};
use base64::Engine as _;
use fanout_engine::{AudioBuffer, EngineError, decode};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::models::{
    DeviceResult, FanoutResponse, MultiPlayRequest, MultiPlayResponse, OkResponse,
    PlayDeviceResponse, StopRequest, ToneRequest,
};
use crate::spool;
use crate::state::AppState;

/// Extension hint for raw-bytes uploads.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ExtQuery {
    /// File extension of the payload, e.g. `wav`.
    pub ext: String,
}

fn bad_request(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(OkResponse {
        success: false,
        message: message.into(),
    })
}

/// Failure out of a blocking spool-and-decode closure: the client's fault
/// (400) or the host's (500). Any files spooled before the failure are
/// already unlinked.
enum SpoolError {
    Reject(String),
    Io(anyhow::Error),
}

impl SpoolError {
    fn into_response(self) -> HttpResponse {
        match self {
            SpoolError::Reject(msg) => bad_request(msg),
            SpoolError::Io(e) => HttpResponse::InternalServerError().body(format!("{e:#}")),
        }
    }
}

#[utoipa::path(
    post,
    path = "/tone",
    request_body = ToneRequest,
    responses(
        (status = 200, description = "Tone fan-out result", body = FanoutResponse)
    )
)]
#[post("/tone")]
/// Synthesize a sine tone and play it on every working device.
pub async fn play_tone(state: web::Data<AppState>, body: web::Json<ToneRequest>) -> impl Responder {
    let duration = body.duration.unwrap_or(2.0).clamp(0.05, 30.0);
    let frequency = body.frequency.unwrap_or(440.0).clamp(20.0, 20_000.0);

    let engine = state.engine.clone();
    let results = web::block(move || {
        let buffer = Arc::new(AudioBuffer::sine(duration, frequency, 44_100, 1.0));
        engine.play_on_all(&buffer)
    })
    .await;

    match results {
        Ok(results) => {
            let devices_playing = results.values().filter(|ok| **ok).count();
            tracing::info!(duration, frequency, devices_playing, "tone dispatched");
            HttpResponse::Ok().json(FanoutResponse {
                success: devices_playing > 0,
                batch_id: None,
                devices_playing,
                total_devices: results.len(),
            })
        }
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[utoipa::path(
    post,
    path = "/play/device/{id}",
    params(
        ("id" = usize, Path, description = "Device catalog index"),
        ExtQuery
    ),
    request_body = Vec<u8>,
    responses(
        (status = 200, description = "Start outcome", body = PlayDeviceResponse),
        (status = 400, description = "Invalid payload")
    )
)]
#[post("/play/device/{id}")]
/// Decode the uploaded payload and play it on one device.
pub async fn play_device(
    state: web::Data<AppState>,
    id: web::Path<usize>,
    query: web::Query<ExtQuery>,
    bytes: web::Bytes,
) -> impl Responder {
    let device_id = id.into_inner();
    if !spool::is_allowed_extension(&query.ext) {
        return bad_request(format!("invalid file type: {}", query.ext));
    }
    if bytes.is_empty() {
        return bad_request("no audio payload provided");
    }

    let ext = query.ext.clone();
    let engine = state.engine.clone();
    let outcome = web::block(move || {
        let buffer = decode::decode_bytes(bytes.to_vec(), Some(&ext))
            .map_err(|e| EngineError::DecodeError(format!("{e:#}")))?;
        engine.play_on_device(device_id, buffer)
    })
    .await;

    match outcome {
        Ok(Ok(())) => HttpResponse::Ok().json(PlayDeviceResponse {
            success: true,
            device_id,
            error: None,
        }),
        Ok(Err(EngineError::DecodeError(msg))) => bad_request(format!("decode error: {msg}")),
        Ok(Err(e)) => {
            tracing::info!(device = device_id, error = %e, "single-device start refused");
            HttpResponse::Ok().json(PlayDeviceResponse {
                success: false,
                device_id,
                error: Some(e.to_string()),
            })
        }
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[utoipa::path(
    post,
    path = "/play/all",
    params(ExtQuery),
    request_body = Vec<u8>,
    responses(
        (status = 200, description = "Fan-out result", body = FanoutResponse),
        (status = 400, description = "Invalid payload")
    )
)]
#[post("/play/all")]
/// Spool the uploaded payload, decode it once, and play it on every working
/// device. The returned batch owns the spooled file.
pub async fn play_all(
    state: web::Data<AppState>,
    query: web::Query<ExtQuery>,
    bytes: web::Bytes,
) -> impl Responder {
    if !spool::is_allowed_extension(&query.ext) {
        return bad_request(format!("invalid file type: {}", query.ext));
    }
    if bytes.is_empty() {
        return bad_request("no audio payload provided");
    }

    let spool_dir = state.settings.spool_dir.clone();
    let ext = query.ext.clone();
    let engine = state.engine.clone();
    let outcome = web::block(move || {
        let path =
            spool::spool_payload(&spool_dir, &ext, &bytes).map_err(SpoolError::Io)?;
        match decode::decode_file(&path) {
            Ok(buffer) => Ok((path, engine.play_on_all(&buffer))),
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                Err(SpoolError::Reject(format!("decode error: {e:#}")))
            }
        }
    })
    .await;

    let (path, results) = match outcome {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return e.into_response(),
        Err(e) => return HttpResponse::InternalServerError().body(e.to_string()),
    };

    let started: Vec<usize> = results
        .iter()
        .filter(|(_, ok)| **ok)
        .map(|(idx, _)| *idx)
        .collect();
    let devices_playing = started.len();
    let total_devices = results.len();

    if devices_playing == 0 {
        // Nothing owns the spool file; reclaim it now.
        let _ = std::fs::remove_file(&path);
        return HttpResponse::Ok().json(FanoutResponse {
            success: false,
            batch_id: None,
            devices_playing,
            total_devices,
        });
    }

    let batch_id = state.batches.begin(vec![path], started);
    tracing::info!(batch_id = %batch_id, devices_playing, total_devices, "play-all dispatched");
    HttpResponse::Ok().json(FanoutResponse {
        success: true,
        batch_id: Some(batch_id),
        devices_playing,
        total_devices,
    })
}

#[utoipa::path(
    post,
    path = "/play/multi",
    request_body = MultiPlayRequest,
    responses(
        (status = 200, description = "Per-device results", body = MultiPlayResponse),
        (status = 400, description = "Malformed mapping or payload")
    )
)]
#[post("/play/multi")]
/// Play a distinct file per device.
///
/// The whole mapping is validated before any session starts; per-device
/// decode or start failures afterwards land in their own result slot and
/// never cancel siblings.
pub async fn play_multi(
    state: web::Data<AppState>,
    body: web::Json<MultiPlayRequest>,
) -> impl Responder {
    let items = body.into_inner().items;
    if items.is_empty() {
        return bad_request("no file-device mappings provided");
    }
    let mut seen = std::collections::HashSet::new();
    for item in &items {
        if !spool::is_allowed_extension(&item.ext) {
            return bad_request(format!("invalid file type: {}", item.ext));
        }
        if !seen.insert(item.device_id) {
            return bad_request(format!("duplicate device id: {}", item.device_id));
        }
    }

    let spool_dir = state.settings.spool_dir.clone();
    let engine = state.engine.clone();
    let outcome = web::block(move || {
        // Decode payloads and spool them up front, still before any start.
        let mut temp_files = Vec::new();
        let mut spooled = Vec::new();
        for item in &items {
            let bytes = match base64::engine::general_purpose::STANDARD.decode(&item.data) {
                Ok(b) if !b.is_empty() => b,
                _ => {
                    crate::batches::unlink_all(&temp_files);
                    return Err(SpoolError::Reject(format!(
                        "invalid payload for device {}",
                        item.device_id
                    )));
                }
            };
            match spool::spool_payload(&spool_dir, &item.ext, &bytes) {
                Ok(path) => {
                    temp_files.push(path.clone());
                    spooled.push((item.device_id, path));
                }
                Err(e) => {
                    crate::batches::unlink_all(&temp_files);
                    return Err(SpoolError::Io(e));
                }
            }
        }

        let mut results: BTreeMap<usize, DeviceResult> = BTreeMap::new();
        let mut assignments = Vec::new();
        for (device_id, path) in spooled {
            match decode::decode_file(&path) {
                Ok(buffer) => assignments.push((device_id, buffer)),
                Err(e) => {
                    results.insert(
                        device_id,
                        DeviceResult {
                            success: false,
                            error: Some(format!("decode error: {e:#}")),
                        },
                    );
                }
            }
        }
        for (device_id, result) in engine.play_multi(assignments) {
            results.insert(
                device_id,
                match result {
                    Ok(()) => DeviceResult {
                        success: true,
                        error: None,
                    },
                    Err(e) => DeviceResult {
                        success: false,
                        error: Some(e.to_string()),
                    },
                },
            );
        }
        Ok((temp_files, results))
    })
    .await;

    let (temp_files, results) = match outcome {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return e.into_response(),
        Err(e) => return HttpResponse::InternalServerError().body(e.to_string()),
    };

    let started: Vec<usize> = results
        .iter()
        .filter(|(_, r)| r.success)
        .map(|(idx, _)| *idx)
        .collect();
    let devices_playing = started.len();
    let total_devices = results.len();

    let batch_id = if devices_playing > 0 {
        Some(state.batches.begin(temp_files, started))
    } else {
        // No session owns anything; reclaim the spool files right away
        // instead of parking them until the sweep.
        crate::batches::unlink_all(&temp_files);
        None
    };

    tracing::info!(
        batch_id = batch_id.as_deref().unwrap_or("-"),
        devices_playing,
        total_devices,
        "multi-file dispatched"
    );
    HttpResponse::Ok().json(MultiPlayResponse {
        success: devices_playing > 0,
        batch_id,
        devices_playing,
        total_devices,
        results,
    })
}

#[utoipa::path(
    post,
    path = "/stop",
    request_body = StopRequest,
    responses(
        (status = 200, description = "Stopped", body = OkResponse)
    )
)]
#[post("/stop")]
/// Stop one batch when `batch_id` is given, otherwise everything.
///
/// Stopping an unknown batch or an already-idle engine succeeds.
pub async fn stop(
    state: web::Data<AppState>,
    body: Option<web::Json<StopRequest>>,
) -> impl Responder {
    let batch_id = body.and_then(|b| b.into_inner().batch_id);

    let engine = state.engine.clone();
    let batches = state.batches.clone();
    let message = web::block(move || match batch_id {
        Some(id) => match batches.end(&id) {
            Some(devices) => {
                for device in devices {
                    // AlreadyStopped is success.
                    let _ = engine.stop(device);
                }
                format!("batch {id} stopped")
            }
            None => format!("batch {id} already ended"),
        },
        None => {
            engine.stop_all();
            let ended = batches.end_all();
            format!("all playback stopped ({ended} batches ended)")
        }
    })
    .await;

    match message {
        Ok(message) => HttpResponse::Ok().json(OkResponse {
            success: true,
            message,
        }),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[utoipa::path(
    post,
    path = "/stop/force",
    responses(
        (status = 200, description = "Everything stopped", body = OkResponse)
    )
)]
#[post("/stop/force")]
/// Unconditional stop-all plus cleanup of every tracked batch.
///
/// Every sub-step is best-effort; the call reports success whenever the
/// registry ends up empty, which `stop_all` guarantees.
pub async fn force_stop(state: web::Data<AppState>) -> impl Responder {
    let engine = state.engine.clone();
    let batches = state.batches.clone();
    let _ = web::block(move || {
        engine.stop_all();
        let ended = batches.end_all();
        if ended > 0 {
            tracing::info!(count = ended, "force stop ended batches");
        }
    })
    .await;

    HttpResponse::Ok().json(OkResponse {
        success: true,
        message: "all playback force stopped".to_string(),
    })
}
