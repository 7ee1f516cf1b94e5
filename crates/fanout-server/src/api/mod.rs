//! HTTP API handlers.
//!
//! Defines the Actix routes for device discovery, playback control, and
//! engine status.

pub mod devices;
pub mod playback;
pub mod status;

pub use devices::{device_test, devices_list};
pub use playback::{force_stop, play_all, play_device, play_multi, play_tone, stop};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use actix_web::{App, test};
    use fanout_engine::PlaybackEngine;

    use crate::api;
    use crate::batches::BatchTracker;
    use crate::config::ServerSettings;
    use crate::models::{
        FanoutResponse, MultiPlayItem, MultiPlayRequest, MultiPlayResponse, OkResponse,
        StatusResponse, StopRequest,
    };
    use crate::state::AppState;

    fn make_state() -> actix_web::web::Data<AppState> {
        let spool_dir = std::env::temp_dir().join(format!(
            "fanout-api-test-{}",
            uuid::Uuid::new_v4()
        ));
        let settings = ServerSettings {
            bind: "127.0.0.1:0".parse().unwrap(),
            max_sessions: 4,
            spool_dir,
            sweep_interval: Duration::from_secs(300),
            batch_max_age: Duration::from_secs(600),
            max_upload_bytes: 100 * 1024 * 1024,
        };
        // Empty catalog: no audio hardware is touched by these tests.
        let engine = Arc::new(PlaybackEngine::with_catalog(Vec::new(), settings.max_sessions));
        let batches = BatchTracker::new(settings.batch_max_age);
        actix_web::web::Data::new(AppState::new(engine, batches, settings))
    }

    #[actix_web::test]
    async fn status_with_empty_catalog_is_idle() {
        let state = make_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).service(api::status::status)).await;

        let req = test::TestRequest::get().uri("/status").to_request();
        let resp: StatusResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.success);
        assert!(!resp.is_playing);
        assert!(resp.devices.is_empty());
    }

    #[actix_web::test]
    async fn force_stop_is_idempotent() {
        let state = make_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).service(api::force_stop)).await;

        for _ in 0..2 {
            let req = test::TestRequest::post().uri("/stop/force").to_request();
            let resp: OkResponse = test::call_and_read_body_json(&app, req).await;
            assert!(resp.success);
        }
    }

    #[actix_web::test]
    async fn stop_unknown_batch_still_succeeds() {
        let state = make_state();
        let app = test::init_service(App::new().app_data(state.clone()).service(api::stop)).await;

        let payload = StopRequest {
            batch_id: Some("no-such-batch".to_string()),
        };
        let req = test::TestRequest::post()
            .uri("/stop")
            .set_json(&payload)
            .to_request();
        let resp: OkResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.success);
    }

    #[actix_web::test]
    async fn stop_without_body_stops_everything() {
        let state = make_state();
        let app = test::init_service(App::new().app_data(state.clone()).service(api::stop)).await;

        let req = test::TestRequest::post().uri("/stop").to_request();
        let resp: OkResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.success);
    }

    #[actix_web::test]
    async fn play_multi_rejects_duplicate_device_ids() {
        let state = make_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).service(api::play_multi)).await;

        let item = |device_id| MultiPlayItem {
            device_id,
            ext: "wav".to_string(),
            data: "AAAA".to_string(),
        };
        let payload = MultiPlayRequest {
            items: vec![item(1), item(1)],
        };
        let req = test::TestRequest::post()
            .uri("/play/multi")
            .set_json(&payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn play_multi_rejects_empty_mapping() {
        let state = make_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).service(api::play_multi)).await;

        let payload = MultiPlayRequest { items: Vec::new() };
        let req = test::TestRequest::post()
            .uri("/play/multi")
            .set_json(&payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn play_multi_rejects_disallowed_extension() {
        let state = make_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).service(api::play_multi)).await;

        let payload = MultiPlayRequest {
            items: vec![MultiPlayItem {
                device_id: 0,
                ext: "exe".to_string(),
                data: "AAAA".to_string(),
            }],
        };
        let req = test::TestRequest::post()
            .uri("/play/multi")
            .set_json(&payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn play_multi_reclaims_spool_files_when_nothing_starts() {
        use base64::Engine as _;

        let state = make_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).service(api::play_multi)).await;

        // Valid base64, undecodable audio: the item spools, fails decode,
        // and nothing starts.
        let payload = MultiPlayRequest {
            items: vec![MultiPlayItem {
                device_id: 0,
                ext: "wav".to_string(),
                data: base64::engine::general_purpose::STANDARD.encode([0u8; 64]),
            }],
        };
        let req = test::TestRequest::post()
            .uri("/play/multi")
            .set_json(&payload)
            .to_request();
        let resp: MultiPlayResponse = test::call_and_read_body_json(&app, req).await;

        assert!(!resp.success);
        assert!(resp.batch_id.is_none());
        assert_eq!(resp.devices_playing, 0);
        assert!(state.batches.is_empty());
        // The spooled file was reclaimed immediately, not left for the sweep.
        let leftover = std::fs::read_dir(&state.settings.spool_dir)
            .map(|d| d.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0);
    }

    #[actix_web::test]
    async fn play_device_rejects_disallowed_extension() {
        let state = make_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).service(api::play_device)).await;

        let req = test::TestRequest::post()
            .uri("/play/device/0?ext=exe")
            .set_payload(vec![0u8; 16])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn play_all_rejects_empty_payload() {
        let state = make_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).service(api::play_all)).await;

        let req = test::TestRequest::post()
            .uri("/play/all?ext=wav")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn tone_with_empty_catalog_reports_nothing_playing() {
        let state = make_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).service(api::play_tone)).await;

        let req = test::TestRequest::post()
            .uri("/tone")
            .set_json(serde_json::json!({ "duration": 0.1 }))
            .to_request();
        let resp: FanoutResponse = test::call_and_read_body_json(&app, req).await;
        assert!(!resp.success);
        assert_eq!(resp.devices_playing, 0);
        assert_eq!(resp.total_devices, 0);
        assert!(resp.batch_id.is_none());
    }
}
