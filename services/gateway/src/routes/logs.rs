//! Live and historical views over completed requests. `/api/logs/stream`
//! is a hand-rolled SSE body (the workspace's `axum`/`tokio-stream`
//! feature set isn't known to include the `sse` helpers, so this
//! formats events directly over `Body::from_stream`) fed by the
//! broadcast channel every finished request is published to.

use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{body::Body, Json};
use bytes::Bytes;
use futures_util::stream::unfold;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::error::Error;
use crate::AppState;

fn default_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// `GET /api/logs/stream`: an SSE feed, one `event: request` per
/// completed dispatch, emitted as soon as the pipeline's finalize task
/// publishes its record.
pub async fn stream(State(state): State<AppState>) -> Response {
    let rx = state.log_tx.subscribe();
    let body_stream = unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(record) => {
                    let data = serde_json::to_string(&record).unwrap_or_default();
                    let chunk = Bytes::from(format!("event: request\ndata: {data}\n\n"));
                    return Some((Ok::<_, Infallible>(chunk), rx));
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| Error::Internal("failed to build log stream".to_string()).into_response())
}

/// `GET /api/logs/history?limit=N`: a snapshot of the same ring buffer
/// `/api/requests` reads, kept as a distinct route since log consumers
/// and request-history consumers evolve independently.
pub async fn history(State(state): State<AppState>, Query(query): Query<LimitQuery>) -> impl IntoResponse {
    Json(state.request_log.recent(query.limit))
}
