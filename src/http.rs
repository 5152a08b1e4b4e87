use crate::metrics::Metrics;
use crate::state::State as CollectorState;
use crate::status::StatusDocument;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<CollectorState>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiStatus {
    pub started_at_unix: i64,
    pub last_cycle_timestamp_seconds: i64,
    pub cycles_completed: u64,
    pub hosts: Vec<StatusDocument>,
}

impl From<&CollectorState> for ApiStatus {
    fn from(value: &CollectorState) -> Self {
        Self {
            started_at_unix: value.started_at_unix,
            last_cycle_timestamp_seconds: value.last_cycle_timestamp_seconds,
            cycles_completed: value.cycles_completed,
            hosts: value.documents(),
        }
    }
}

pub fn build_router(metrics: Arc<Metrics>, state: Arc<RwLock<CollectorState>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/status", get(status_handler))
        .route("/api/status/:device", get(device_handler))
        .with_state(HttpAppState { metrics, state })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    {
        let guard = state.state.read().await;
        state.metrics.update_from_state(&guard);
    }
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn status_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(ApiStatus::from(&*guard))
}

async fn device_handler(
    State(state): State<HttpAppState>,
    Path(device): Path<String>,
) -> Response {
    let guard = state.state.read().await;
    match guard.document(&device) {
        Some(doc) => Json(doc).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("no status recorded for device '{device}'"),
        )
            .into_response(),
    }
}
