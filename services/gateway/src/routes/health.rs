//! `GET /health`: liveness plus the pool's own health summary, never
//! exposing account tokens.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use storage::now_ms;

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = state
        .pool
        .health()
        .await
        .unwrap_or_else(|err| serde_json::json!({ "status": "unknown", "error": err.to_string() }));
    body["accounts"] = body["accounts_total"].clone();
    body["strategy"] = serde_json::json!(state.config.lb_strategy);
    body["uptime_seconds"] = serde_json::json!(state.started_at.elapsed().as_secs());
    body["timestamp"] = serde_json::json!(now_ms());
    Json(body)
}
