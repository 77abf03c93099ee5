use crate::metrics::Metrics;
use crate::snapshot::{HealthSummary, Snapshot};
use crate::state::{ChangeEntry, EngineState};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<EngineState>>,
}

/// Read-only view of the engine served on /api/state. The change log is
/// newest first.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiState {
    pub started_at_unix: i64,
    pub last_poll_unix: i64,
    pub poll_cycles: u64,
    pub cloud_name: Option<String>,
    pub summary: HealthSummary,
    pub recent_changes: Vec<ChangeEntry>,
    pub topology: Option<Snapshot>,
    pub last_error: Option<String>,
}

impl From<&EngineState> for ApiState {
    fn from(value: &EngineState) -> Self {
        Self {
            started_at_unix: value.started_at_unix,
            last_poll_unix: value.last_poll_unix,
            poll_cycles: value.poll_cycles,
            cloud_name: value
                .topology
                .as_ref()
                .and_then(|t| t.cloud_name.clone()),
            summary: value.summary.clone(),
            recent_changes: value.recent_changes.iter().cloned().collect(),
            topology: value.topology.clone(),
            last_error: value.last_error.clone(),
        }
    }
}

pub fn build_router(metrics: Arc<Metrics>, state: Arc<RwLock<EngineState>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/state", get(state_handler))
        .route("/api/summary", get(summary_handler))
        .route("/api/changes", get(changes_handler))
        .with_state(HttpAppState { metrics, state })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
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

async fn state_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(ApiState::from(&*guard))
}

async fn summary_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(guard.summary.clone())
}

async fn changes_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(guard.recent_changes.iter().cloned().collect::<Vec<_>>())
}
