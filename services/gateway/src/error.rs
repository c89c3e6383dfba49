//! Gateway-level error taxonomy (spec.md §7), composed from the
//! per-crate error enums and turned into HTTP responses at this
//! boundary. The pipeline itself never surfaces storage errors to the
//! client — persistence is best-effort — so `Internal`/`Storage` here
//! are reached only from the admin/read routes, not from `/v1/*`
//! dispatch.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or oversized request (spec.md §7 `validation`, 400).
    #[error("{0}")]
    Validation(String),

    /// No eligible account exists at all (spec.md §7
    /// `no_accounts_available`, 503). `body` is the pre-serialized
    /// diagnostic JSON from `anthropic_pool::session::diagnostic_body`.
    #[error("no accounts available")]
    NoAccountsAvailable(String),

    /// Every candidate was tried and failed (spec.md §7
    /// `all_candidates_failed`, 502). `status` is the most-informative
    /// upstream status observed, when one was.
    #[error("all candidates failed: {message}")]
    AllCandidatesFailed { status: Option<u16>, message: String },

    /// The OAuth token endpoint rejected a refresh; the account has
    /// already been paused (spec.md §7 `refresh_failed`, 502).
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// A named resource (account, request, session) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage or other internal failure not otherwise classified.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<anthropic_pool::Error> for Error {
    fn from(err: anthropic_pool::Error) -> Self {
        match err {
            anthropic_pool::Error::NoAccountsAvailable(body) => Error::NoAccountsAvailable(body),
            anthropic_pool::Error::AllCandidatesFailed(message) => {
                Error::AllCandidatesFailed { status: None, message }
            }
            anthropic_pool::Error::NotFound(name) => Error::NotFound(name),
            anthropic_pool::Error::Storage(message) => Error::Internal(message),
            anthropic_pool::Error::Auth(auth_err) => Error::from(auth_err),
        }
    }
}

impl From<anthropic_auth::Error> for Error {
    fn from(err: anthropic_auth::Error) -> Self {
        match err {
            anthropic_auth::Error::InvalidCredentials(message) => Error::RefreshFailed(message),
            anthropic_auth::Error::SessionExpired(message) => Error::NotFound(message),
            anthropic_auth::Error::NotFound(message) => Error::NotFound(message),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<storage::Error> for Error {
    fn from(err: storage::Error) -> Self {
        match err {
            storage::Error::AccountNotFound(name) => Error::NotFound(name),
            storage::Error::SessionNotFound(name) => Error::NotFound(name),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, kind, message, extra) = match &self {
            Error::Validation(message) => (StatusCode::BAD_REQUEST, "validation", message.clone(), None),
            Error::NoAccountsAvailable(body) => {
                // Already a fully-formed diagnostic JSON body; pass it through
                // verbatim rather than re-wrapping it.
                return (StatusCode::SERVICE_UNAVAILABLE, [("content-type", "application/json")], body.clone())
                    .into_response();
            }
            Error::AllCandidatesFailed { status, message } => (
                StatusCode::BAD_GATEWAY,
                "all_candidates_failed",
                message.clone(),
                status.map(|s| serde_json::json!({ "upstream_status": s })),
            ),
            Error::RefreshFailed(message) => (StatusCode::BAD_GATEWAY, "refresh_failed", message.clone(), None),
            Error::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message.clone(), None),
            Error::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", message.clone(), None),
        };

        let mut body = serde_json::json!({ "error": kind, "message": message });
        if let Some(extra) = extra
            && let Some(map) = extra.as_object()
        {
            for (k, v) in map {
                body[k] = v.clone();
            }
        }
        (status, Json(body)).into_response()
    }
}
