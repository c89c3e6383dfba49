//! Aggregate request statistics, derived from the in-memory ring
//! buffer rather than a durable running total, so a reset only clears
//! what operators are actively looking at.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::AppState;

pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let records = state.request_log.recent(state.request_log.len());

    let total = records.len();
    let successful = records.iter().filter(|r| r.success).count();
    let failed = total - successful;
    let total_input_tokens: i64 = records.iter().filter_map(|r| r.input_tokens).sum();
    let total_output_tokens: i64 = records.iter().filter_map(|r| r.output_tokens).sum();
    let total_cost_usd: f64 = records.iter().filter_map(|r| r.cost_usd).sum();
    let total_failover_attempts: i64 = records.iter().map(|r| r.failover_attempts).sum();
    let avg_response_time_ms = if total > 0 {
        records.iter().filter_map(|r| r.response_time_ms).sum::<i64>() as f64 / total as f64
    } else {
        0.0
    };

    Json(serde_json::json!({
        "total_requests": total,
        "successful_requests": successful,
        "failed_requests": failed,
        "total_input_tokens": total_input_tokens,
        "total_output_tokens": total_output_tokens,
        "total_cost_usd": total_cost_usd,
        "total_failover_attempts": total_failover_attempts,
        "avg_response_time_ms": avg_response_time_ms,
    }))
}

/// `POST /api/stats/reset`: clears the in-memory ring buffer the
/// figures above are computed from. Durable history in `/api/requests`
/// is unaffected.
pub async fn reset(State(state): State<AppState>) -> impl IntoResponse {
    state.request_log.clear();
    Json(serde_json::json!({ "reset": true }))
}
