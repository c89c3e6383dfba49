//! PKCE enrollment flow: `/api/oauth/init` starts a session and returns
//! the authorization URL, `/api/oauth/callback` exchanges the returned
//! code for a new account.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use storage::OAuthMode;

use crate::error::{Error, Result};
use crate::routes::accounts::AccountSummary;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct InitRequest {
    pub mode: String,
    #[serde(default = "default_tier")]
    pub tier: i64,
}

fn default_tier() -> i64 {
    1
}

pub async fn init(State(state): State<AppState>, Json(body): Json<InitRequest>) -> Result<impl IntoResponse> {
    if OAuthMode::parse(&body.mode).is_none() {
        return Err(Error::Validation(format!("unknown oauth mode: {}", body.mode)));
    }
    let (url, session_id) = state.oauth.authorize(&body.mode, body.tier).await?;
    Ok(Json(serde_json::json!({ "url": url, "session_id": session_id })))
}

#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub session_id: String,
    pub code: String,
    pub account_name: String,
}

pub async fn callback(State(state): State<AppState>, Json(body): Json<CallbackRequest>) -> Result<impl IntoResponse> {
    if body.account_name.trim().is_empty() {
        return Err(Error::Validation("account_name must not be empty".to_string()));
    }
    let account = state
        .oauth
        .complete(&body.session_id, &body.code, &body.account_name)
        .await?;
    Ok(Json(AccountSummary::from(&account)))
}
