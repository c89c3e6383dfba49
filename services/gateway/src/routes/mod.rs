//! The `/health` and `/api/*` surface (spec.md §6): account
//! management, OAuth enrollment, request history, aggregate stats, and
//! the live log stream. Everything under `/v1/*` instead goes through
//! [`crate::pipeline::handle`].

pub mod accounts;
pub mod health;
pub mod logs;
pub mod oauth;
pub mod requests;
pub mod stats;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/accounts", get(accounts::list))
        .route("/api/accounts/{id}/pause", post(accounts::pause))
        .route("/api/accounts/{id}/resume", post(accounts::resume))
        .route("/api/accounts/{id}/rename", post(accounts::rename))
        .route("/api/accounts/{name}", delete(accounts::remove))
        .route("/api/oauth/init", post(oauth::init))
        .route("/api/oauth/callback", post(oauth::callback))
        .route("/api/requests", get(requests::list))
        .route("/api/requests/detail", get(requests::list_detail))
        .route("/api/requests/{id}", get(requests::get_one))
        .route("/api/stats", get(stats::get_stats))
        .route("/api/stats/reset", post(stats::reset))
        .route("/api/logs/stream", get(logs::stream))
        .route("/api/logs/history", get(logs::history))
}
