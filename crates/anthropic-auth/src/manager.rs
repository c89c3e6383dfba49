//! The OAuth Manager: drives the PKCE authorization flow for new
//! accounts and produces valid bearer tokens for existing ones, with
//! single-flight coalescing of concurrent refreshes for the same
//! account.
//!
//! Concurrency control without a shared mutable Account: refresh is
//! represented as a map from `account_id` to an awaitable completion
//! rather than a lock taken on the account itself. The entry is removed
//! once its waiters resolve, so a later call starts a fresh attempt.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use storage::{now_ms, Account, AccountStore, OAuthSession};

use crate::constants::ANTHROPIC_CLIENT_ID;
use crate::error::{Error, Result};
use crate::pkce::{build_authorization_url, compute_challenge, generate_verifier};
use crate::token::{exchange_code, refresh_token};

/// Margin before expiry at which a cached token is considered too
/// stale to use (spec: 60s).
const REFRESH_MARGIN_MS: i64 = 60_000;

/// Default TTL for an in-flight PKCE session (spec: 10 minutes).
pub const SESSION_TTL_MS: i64 = 10 * 60 * 1000;

type RefreshResult = std::result::Result<(String, i64, Option<String>), Error>;

pub struct OAuthManager {
    store: Arc<AccountStore>,
    http_client: reqwest::Client,
    in_flight: Mutex<HashMap<String, Arc<OnceCell<RefreshResult>>>>,
}

impl OAuthManager {
    pub fn new(store: Arc<AccountStore>, http_client: reqwest::Client) -> Self {
        Self {
            store,
            http_client,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Begins a PKCE authorization flow. Returns the authorization URL
    /// and the session id embedded in its `state` parameter.
    pub async fn authorize(&self, mode: &str, tier: i64) -> Result<(String, String)> {
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let now = now_ms();

        let session = OAuthSession {
            id: session_id.clone(),
            account_name: None,
            pkce_verifier: verifier,
            mode: mode.to_string(),
            tier,
            created_at: now,
            expires_at: now + SESSION_TTL_MS,
        };
        self.store
            .create_oauth_session(&session)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

        let url = build_authorization_url(mode, &session_id, &challenge);
        Ok((url, session_id))
    }

    /// Completes a PKCE flow: exchanges the code, persists a new
    /// account, and deletes the session so a replay of the same
    /// `(session_id, code)` fails with `SessionExpired`.
    pub async fn complete(&self, session_id: &str, code: &str, account_name: &str) -> Result<Account> {
        let session = self
            .store
            .take_oauth_session(session_id)
            .await
            .map_err(|_| Error::SessionExpired(session_id.to_string()))?;

        if session.is_expired(now_ms()) {
            return Err(Error::SessionExpired(session_id.to_string()));
        }

        let token = exchange_code(&self.http_client, code, &session.pkce_verifier).await?;
        let now = now_ms();
        let account = Account {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: account_name.to_string(),
            provider: "anthropic".to_string(),
            refresh_token: token.refresh_token,
            access_token: Some(token.access_token),
            expires_at: now + token.expires_in as i64 * 1000,
            created_at: now,
            last_used: None,
            request_count: 0,
            total_requests: 0,
            account_tier: session.tier,
            session_start: None,
            session_request_count: 0,
            rate_limited_until: None,
            rate_limit_status: None,
            rate_limit_reset: None,
            rate_limit_remaining: None,
            paused: false,
            priority: 0,
        };
        self.store
            .insert_account(&account)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(account)
    }

    /// Returns a valid access token for `account`, refreshing it first
    /// if it is absent or within the refresh margin of expiry.
    pub async fn ensure_access_token(&self, account: &Account) -> Result<String> {
        let now = now_ms();
        if let Some(access) = &account.access_token {
            if account.expires_at - now > REFRESH_MARGIN_MS {
                return Ok(access.clone());
            }
        }
        self.refresh(account).await
    }

    async fn refresh(&self, account: &Account) -> Result<String> {
        let cell = {
            let mut in_flight = self.in_flight.lock().await;
            Arc::clone(
                in_flight
                    .entry(account.id.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let refresh_token_value = account.refresh_token.clone();
        let http_client = self.http_client.clone();
        let result = cell
            .get_or_init(|| async move {
                let response = refresh_token(&http_client, &refresh_token_value).await?;
                let expires_at = now_ms() + response.expires_in as i64 * 1000;
                let rotated = if response.refresh_token != refresh_token_value {
                    Some(response.refresh_token)
                } else {
                    None
                };
                Ok((response.access_token, expires_at, rotated))
            })
            .await
            .clone();

        // Remove the entry so the next on-demand call (not a concurrent
        // waiter of this one) gets a fresh attempt.
        self.in_flight.lock().await.remove(&account.id);

        match result {
            Ok((access_token, expires_at, rotated_refresh)) => {
                self.store
                    .update_tokens(&account.id, &access_token, expires_at, rotated_refresh.as_deref())
                    .await
                    .map_err(|e| Error::Storage(e.to_string()))?;
                Ok(access_token)
            }
            Err(Error::InvalidCredentials(reason)) => {
                self.store
                    .set_paused(&account.id, true)
                    .await
                    .map_err(|e| Error::Storage(e.to_string()))?;
                Err(Error::InvalidCredentials(reason))
            }
            Err(other) => Err(other),
        }
    }
}
