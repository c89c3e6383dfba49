//! Request history surface: the in-memory ring buffer for the common
//! case, the durable store for anything that needs the full payload.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use storage::{RequestPayload, RequestRecord};

use crate::error::{Error, Result};
use crate::AppState;

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

/// `GET /api/requests?limit=N`: the most recent records from the
/// in-memory ring buffer, newest first.
pub async fn list(State(state): State<AppState>, Query(query): Query<LimitQuery>) -> Json<Vec<RequestRecord>> {
    let limit = query.limit.max(0) as usize;
    Json(state.request_log.recent(limit))
}

/// Base64-encoded header/body payload for one request. `RequestPayload`
/// itself isn't `Serialize` (storage has no reason to render it), so
/// this mirrors its fields for the wire.
#[derive(Debug, Serialize)]
pub struct PayloadView {
    pub request_headers: String,
    pub request_body: String,
    pub response_headers: String,
    pub response_body: String,
}

impl From<RequestPayload> for PayloadView {
    fn from(payload: RequestPayload) -> Self {
        Self {
            request_headers: payload.request_headers,
            request_body: payload.request_body,
            response_headers: payload.response_headers,
            response_body: payload.response_body,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RequestDetail {
    #[serde(flatten)]
    pub record: RequestRecord,
    pub payload: Option<PayloadView>,
}

/// `GET /api/requests/detail?limit=N`: recent records joined with their
/// persisted payload, read from durable storage since the ring buffer
/// holds records only.
pub async fn list_detail(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<RequestDetail>>> {
    let records = state.store.list_requests(query.limit.max(0)).await.map_err(Error::from)?;
    let mut details = Vec::with_capacity(records.len());
    for record in records {
        let payload = state
            .store
            .get_payload(&record.id)
            .await
            .map_err(Error::from)?;
        details.push(RequestDetail {
            record,
            payload: payload.map(PayloadView::from),
        });
    }
    Ok(Json(details))
}

/// `GET /api/requests/:id`: a single record with its payload, 404 when
/// the id is unknown.
pub async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    let record = state
        .store
        .get_request(&id)
        .await
        .map_err(Error::from)?
        .ok_or_else(|| Error::NotFound(id.clone()))?;
    let payload = state.store.get_payload(&id).await.map_err(Error::from)?;
    Ok(Json(RequestDetail {
        record,
        payload: payload.map(PayloadView::from),
    }))
}
