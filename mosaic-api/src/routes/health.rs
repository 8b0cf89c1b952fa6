//! Probes mounted at `/health`, outside `/api/v1`.
//!
//! `/ping` answers as long as the process serves requests; `/ready` also
//! round-trips the store backend.

use std::time::Instant;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Body of `GET /health/ready`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub ready: bool,
    pub version: &'static str,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let start = Instant::now();
    let outcome = state.service.ping().await;

    let mut body = Readiness {
        ready: outcome.is_ok(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        store_latency_ms: None,
        error: None,
    };
    let status = match outcome {
        Ok(()) => {
            body.store_latency_ms = Some(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX));
            StatusCode::OK
        }
        Err(e) => {
            tracing::warn!(error = %e, "Store unreachable");
            body.error = Some(e.to_string());
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    (status, Json(body))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/ready", get(readiness))
}
