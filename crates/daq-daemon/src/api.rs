//! Minimal control-plane HTTP surface: start/stop/status, live preview over
//! Server-Sent Events, and a health check.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;

use daq_pipeline::{AcquisitionMode, PreviewOptions, PreviewStreamer, SessionManager};

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionManager>,
    pub auth_token: Option<String>,
}

#[derive(Deserialize)]
pub struct StartRequest {
    pub mode: AcquisitionMode,
    #[serde(default)]
    pub preview: bool,
}

pub async fn start_handler(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> impl IntoResponse {
    match state.session.start(req.mode, req.preview).await {
        Ok(summary) => (StatusCode::ACCEPTED, Json(json!(summary))).into_response(),
        Err(err) => (StatusCode::CONFLICT, err.to_string()).into_response(),
    }
}

pub async fn stop_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.stop().await {
        Ok(summary) => (StatusCode::OK, Json(json!(summary))).into_response(),
        Err(err) => (StatusCode::CONFLICT, err.to_string()).into_response(),
    }
}

pub async fn session_handler(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.session.status().await;
    Json(json!(summary))
}

pub async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    #[serde(default)]
    pub channels: String,
    #[serde(default = "default_downsample")]
    pub downsample: usize,
    #[serde(default = "default_max_duration_s")]
    pub max_duration_s: f64,
}

fn default_downsample() -> usize {
    1
}
fn default_max_duration_s() -> f64 {
    30.0
}

#[derive(Serialize)]
struct PreviewChannelFrameJson {
    index: usize,
    name: String,
    unit: String,
    values: Vec<f64>,
}

#[derive(Serialize)]
struct PreviewFrameJson {
    station_id: String,
    captured_at_ns: i64,
    timestamps_ns: Vec<i64>,
    channels: Vec<PreviewChannelFrameJson>,
}

pub async fn preview_stream_handler(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let channels: Vec<usize> = query
        .channels
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    let receiver = state
        .session
        .subscribe_preview()
        .await
        .map_err(|e| (StatusCode::CONFLICT, e.to_string()))?;

    let options = PreviewOptions {
        channels,
        downsample: query.downsample,
        max_duration_s: query.max_duration_s,
    };
    let mut streamer = PreviewStreamer::new(receiver, &state.session.station().channels, options)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let frame_stream = stream::unfold(streamer, |mut streamer| async move {
        let frame = streamer.next_frame().await?;
        let json = PreviewFrameJson {
            station_id: frame.station_id,
            captured_at_ns: frame.captured_at_ns,
            timestamps_ns: frame.timestamps_ns,
            channels: frame
                .channels
                .into_iter()
                .map(|c| PreviewChannelFrameJson {
                    index: c.index,
                    name: c.name,
                    unit: c.unit,
                    values: c.values,
                })
                .collect(),
        };
        let event = serde_json::to_string(&json)
            .map(|body| Event::default().data(body))
            .unwrap_or_else(|_| Event::default().data("{}"));
        Some((Ok(event), streamer))
    });

    Ok(Sse::new(frame_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

pub fn create_router(state: AppState) -> Router {
    let gated = Router::new()
        .route("/acquisition/start", post(start_handler))
        .route("/acquisition/stop", post(stop_handler))
        .route("/acquisition/session", get(session_handler))
        .route("/preview/stream", get(preview_stream_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_bearer_token,
        ));

    Router::new()
        .route("/healthz", get(healthz_handler))
        .merge(gated)
        .with_state(state)
}
