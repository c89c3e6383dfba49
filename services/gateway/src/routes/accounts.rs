//! Account management: list/pause/resume/rename/remove. Account tokens
//! never cross this boundary — only the fields an operator needs to
//! judge pool health are serialized.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use storage::Account;

use crate::error::{Error, Result};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub tier: i64,
    pub paused: bool,
    pub priority: i64,
    pub created_at: i64,
    pub last_used: Option<i64>,
    pub total_requests: i64,
    pub session_start: Option<i64>,
    pub session_request_count: i64,
    pub rate_limited_until: Option<i64>,
    pub rate_limit_status: Option<String>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            name: account.name.clone(),
            provider: account.provider.clone(),
            tier: account.account_tier,
            paused: account.paused,
            priority: account.priority,
            created_at: account.created_at,
            last_used: account.last_used,
            total_requests: account.total_requests,
            session_start: account.session_start,
            session_request_count: account.session_request_count,
            rate_limited_until: account.rate_limited_until,
            rate_limit_status: account.rate_limit_status.clone(),
        }
    }
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<AccountSummary>>> {
    let accounts = state.store.list_accounts().await.map_err(Error::from)?;
    Ok(Json(accounts.iter().map(AccountSummary::from).collect()))
}

pub async fn pause(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    state.pool.pause(&id).await?;
    Ok(Json(serde_json::json!({ "paused": true })))
}

pub async fn resume(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    state.pool.resume(&id).await?;
    Ok(Json(serde_json::json!({ "paused": false })))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

pub async fn rename(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameRequest>,
) -> Result<impl IntoResponse> {
    if body.name.trim().is_empty() {
        return Err(Error::Validation("name must not be empty".to_string()));
    }
    state.pool.rename(&id, &body.name).await?;
    Ok(Json(serde_json::json!({ "id": id, "name": body.name })))
}

pub async fn remove(State(state): State<AppState>, Path(name): Path<String>) -> Result<impl IntoResponse> {
    let account = state.pool.get_by_name(&name).await?;
    state.pool.remove(&account.id).await?;
    Ok(Json(serde_json::json!({ "removed": name })))
}
