//! Health endpoint.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::time::Duration;

use tatami_realtime::AppState;

/// Dependency probes run under this budget each.
const PROBE_DEADLINE: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pubsub: &'static str,
    pub store: &'static str,
}

/// `GET /health` — OK iff the pub/sub bus is reachable and the store
/// answers a trivial query within 500 ms.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let pubsub_ok = tokio::time::timeout(PROBE_DEADLINE, state.bus.ping())
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    let store_ok = tokio::time::timeout(PROBE_DEADLINE, state.store.ping())
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);

    let healthy = pubsub_ok && store_ok;
    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        pubsub: if pubsub_ok { "ok" } else { "unreachable" },
        store: if store_ok { "ok" } else { "unreachable" },
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}
