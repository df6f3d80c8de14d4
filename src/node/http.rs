//! Admin HTTP endpoints
//!
//! - `GET /health`: liveness plus node identity
//! - `GET /metrics`: Prometheus text exposition
//! - `POST /ids?count=N`: mint up to [`MAX_IDS_PER_REQUEST`] ids

use crate::common::{CoordMetrics, Error};
use crate::idgen::IdAllocator;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const MAX_IDS_PER_REQUEST: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub node_id: String,
    pub allocator: Arc<IdAllocator>,
    pub metrics: Arc<CoordMetrics>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ids", post(mint_ids))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "node_id": state.node_id,
        "machine_id": state.allocator.machine_id(),
        "uptime_secs": state.metrics.uptime_seconds(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

#[derive(Debug, Deserialize)]
struct MintQuery {
    count: Option<usize>,
}

async fn mint_ids(
    State(state): State<AppState>,
    Query(query): Query<MintQuery>,
) -> Result<impl IntoResponse, Error> {
    let count = query.count.unwrap_or(1);
    if count == 0 || count > MAX_IDS_PER_REQUEST {
        return Err(Error::InvalidArgument(format!(
            "count must be between 1 and {}",
            MAX_IDS_PER_REQUEST
        )));
    }

    // generate() may spin until the next millisecond
    let allocator = state.allocator.clone();
    let ids: Vec<i64> = tokio::task::spawn_blocking(move || {
        (0..count).map(|_| allocator.generate()).collect()
    })
    .await
    .map_err(|e| Error::Internal(format!("id generation task failed: {}", e)))?;

    Ok(Json(json!({
        "machine_id": state.allocator.machine_id(),
        "ids": ids,
    })))
}
