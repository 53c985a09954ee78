//! Exercises the control-plane HTTP surface end to end against an in-memory
//! router, the way `tower::ServiceExt::oneshot` tests axum services without
//! binding a real socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use daq_board::{BoardDriver, MockBoardDriver};
use daq_daemon::{create_router, AppState};
use daq_pipeline::SessionManager;
use daq_types::{AcquisitionSettings, Calibration, ChannelConfig, CsvSinkSettings, StationConfig, StorageSettings};
use tower::ServiceExt;

fn station() -> StationConfig {
    StationConfig {
        station_id: "station-01".into(),
        acquisition: AcquisitionSettings {
            sample_rate_hz: 1000.0,
            block_size: 50,
            duration_s: None,
            total_samples: Some(50),
            drift_correction_threshold_ns: None,
        },
        channels: vec![ChannelConfig {
            index: 0,
            name: "ch0".into(),
            unit: "V".into(),
            voltage_range: 10.0,
            calibration: Calibration::default(),
        }],
    }
}

fn storage() -> StorageSettings {
    StorageSettings {
        driver: "csv".into(),
        url: String::new(),
        org: String::new(),
        bucket: String::new(),
        token: String::new(),
        batch_size: 100,
        timeout_s: 5.0,
        queue_max_size: 1000,
        verify_ssl: true,
        retry: Default::default(),
        sinks: vec!["csv".into()],
        csv: Some(CsvSinkSettings {
            directory: std::env::temp_dir()
                .join("daq-daemon-api-test")
                .to_string_lossy()
                .to_string(),
            ..Default::default()
        }),
        ftp: None,
    }
}

fn app_state(auth_token: Option<String>) -> AppState {
    let session = Arc::new(SessionManager::new(
        station(),
        storage(),
        Arc::new(|| Box::new(MockBoardDriver::new()) as Box<dyn BoardDriver>),
    ));
    AppState { session, auth_token }
}

#[tokio::test]
async fn healthz_is_never_gated() {
    let app = create_router(app_state(Some("secret".into())));
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_bearer_token_is_rejected_when_configured() {
    let app = create_router(app_state(Some("secret".into())));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/acquisition/session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn correct_bearer_token_is_accepted() {
    let app = create_router(app_state(Some("secret".into())));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/acquisition/session")
                .header("Authorization", "Bearer secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn no_configured_token_is_a_no_op_gate() {
    let app = create_router(app_state(None));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/acquisition/session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn starting_twice_conflicts() {
    let app = create_router(app_state(None));

    let start_body = Body::from(r#"{"mode":"continuous","preview":false}"#);
    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/acquisition/start")
                .header("content-type", "application/json")
                .body(start_body)
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second_body = Body::from(r#"{"mode":"continuous","preview":false}"#);
    let second = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/acquisition/start")
                .header("content-type", "application/json")
                .body(second_body)
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn stopping_with_no_active_session_conflicts() {
    let app = create_router(app_state(None));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/acquisition/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
