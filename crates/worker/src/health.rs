//! `GET /health` reporting worker lifecycle states.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::consumer::WorkerState;
use crate::supervisor::Supervisor;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    consumers: Vec<ConsumerHealth>,
}

#[derive(Debug, Serialize)]
struct ConsumerHealth {
    name: String,
    state: WorkerState,
}

/// `ok` (200) when every registered consumer is running, otherwise
/// `degraded` (503).
async fn health_check(
    State(supervisor): State<Arc<Supervisor>>,
) -> (StatusCode, Json<HealthResponse>) {
    let consumers: Vec<ConsumerHealth> = supervisor
        .consumer_states()
        .into_iter()
        .map(|(name, state)| ConsumerHealth { name, state })
        .collect();

    let healthy = consumers.iter().all(|c| c.state == WorkerState::Running);
    let (code, status) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            consumers,
        }),
    )
}

pub fn router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(supervisor)
}
