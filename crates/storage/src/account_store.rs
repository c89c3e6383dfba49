//! Durable account state and request telemetry.
//!
//! Grounded on `anthropic_auth::CredentialStore`'s load/save contract and
//! `anthropic_pool::Pool`'s read-modify-write shape, generalized from an
//! in-process `HashMap` behind a file to a single-writer SQLite pool so
//! the embedded relational store requirement (accounts/requests/payloads/
//! oauth_sessions/agent_preferences, cascade delete, timestamp index) is
//! actually satisfied.

use std::time::{SystemTime, UNIX_EPOCH};

use common::{retry_with_backoff, RetryPolicy};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::{Error, Result};
use crate::models::{Account, AgentPreference, OAuthSession, RequestPayload, RequestRecord};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

#[derive(Debug, Clone)]
pub struct AccountStore {
    pool: SqlitePool,
    retry_policy: RetryPolicy,
}

impl AccountStore {
    /// Open (creating if absent) the SQLite database at `path` and run
    /// embedded migrations. A single-connection write pool enforces the
    /// single-writer discipline the concurrency model requires; reads
    /// are served from the same pool since SQLite's WAL mode allows
    /// concurrent readers alongside the one writer.
    pub async fn open(path: &str, retry_policy: RetryPolicy) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool, retry_policy })
    }

    #[cfg(test)]
    pub async fn open_in(path: &std::path::Path, retry_policy: RetryPolicy) -> Result<Self> {
        Self::open(path.to_str().expect("valid utf8 path"), retry_policy).await
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        retry_with_backoff(self.retry_policy, |e: &Error| e.is_retryable(), op).await
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts ORDER BY priority ASC, last_used DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_account(&self, id: &str) -> Result<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::AccountNotFound(id.to_string()))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::AccountNotFound(name.to_string()))
    }

    /// Insert a newly completed OAuth account.
    pub async fn insert_account(&self, account: &Account) -> Result<()> {
        self.with_retry(|| async {
            sqlx::query(
                "INSERT INTO accounts (id, name, provider, refresh_token, access_token, \
                 expires_at, created_at, last_used, request_count, total_requests, \
                 account_tier, session_start, session_request_count, rate_limited_until, \
                 rate_limit_status, rate_limit_reset, rate_limit_remaining, paused, priority) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&account.id)
            .bind(&account.name)
            .bind(&account.provider)
            .bind(&account.refresh_token)
            .bind(&account.access_token)
            .bind(account.expires_at)
            .bind(account.created_at)
            .bind(account.last_used)
            .bind(account.request_count)
            .bind(account.total_requests)
            .bind(account.account_tier)
            .bind(account.session_start)
            .bind(account.session_request_count)
            .bind(account.rate_limited_until)
            .bind(&account.rate_limit_status)
            .bind(account.rate_limit_reset)
            .bind(account.rate_limit_remaining)
            .bind(account.paused)
            .bind(account.priority)
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;
            Ok(())
        })
        .await
    }

    /// Atomic token update; optionally rotates the refresh token.
    pub async fn update_tokens(
        &self,
        id: &str,
        access_token: &str,
        expires_at: i64,
        refresh_token: Option<&str>,
    ) -> Result<()> {
        self.with_retry(|| async {
            let result = if let Some(refresh) = refresh_token {
                sqlx::query(
                    "UPDATE accounts SET access_token = ?, expires_at = ?, refresh_token = ? WHERE id = ?",
                )
                .bind(access_token)
                .bind(expires_at)
                .bind(refresh)
                .bind(id)
                .execute(&self.pool)
                .await?
            } else {
                sqlx::query("UPDATE accounts SET access_token = ?, expires_at = ? WHERE id = ?")
                    .bind(access_token)
                    .bind(expires_at)
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            };
            if result.rows_affected() == 0 {
                return Err(Error::AccountNotFound(id.to_string()));
            }
            Ok(())
        })
        .await
    }

    pub async fn mark_rate_limited(
        &self,
        id: &str,
        until: i64,
        status: Option<&str>,
        reset: Option<i64>,
        remaining: Option<i64>,
    ) -> Result<()> {
        self.with_retry(|| async {
            let result = sqlx::query(
                "UPDATE accounts SET rate_limited_until = ?, rate_limit_status = ?, \
                 rate_limit_reset = ?, rate_limit_remaining = ? WHERE id = ?",
            )
            .bind(until)
            .bind(status)
            .bind(reset)
            .bind(remaining)
            .bind(id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(Error::AccountNotFound(id.to_string()));
            }
            Ok(())
        })
        .await
    }

    /// Increments usage counters and rolls the session window if
    /// `session_duration_ms` has elapsed since `session_start` (or no
    /// session is pinned yet). Rollover is atomic with the counter
    /// update: both happen in the same UPDATE statement.
    pub async fn update_usage(&self, id: &str, now: i64, session_duration_ms: i64) -> Result<()> {
        self.with_retry(|| async {
            let account = self.get_account(id).await?;
            let scaled_duration = session_duration_ms * account.tier().multiplier() as i64;
            let session_active = account
                .session_start
                .map(|start| now - start < scaled_duration)
                .unwrap_or(false);

            let result = if session_active {
                sqlx::query(
                    "UPDATE accounts SET request_count = request_count + 1, \
                     total_requests = total_requests + 1, last_used = ?, \
                     session_request_count = session_request_count + 1 WHERE id = ?",
                )
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?
            } else {
                sqlx::query(
                    "UPDATE accounts SET request_count = request_count + 1, \
                     total_requests = total_requests + 1, last_used = ?, \
                     session_start = ?, session_request_count = 1 WHERE id = ?",
                )
                .bind(now)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?
            };
            if result.rows_affected() == 0 {
                return Err(Error::AccountNotFound(id.to_string()));
            }
            Ok(())
        })
        .await
    }

    pub async fn set_paused(&self, id: &str, paused: bool) -> Result<()> {
        self.with_retry(|| async {
            let result = sqlx::query("UPDATE accounts SET paused = ? WHERE id = ?")
                .bind(paused)
                .bind(id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(Error::AccountNotFound(id.to_string()));
            }
            Ok(())
        })
        .await
    }

    pub async fn set_priority(&self, id: &str, priority: i64) -> Result<()> {
        self.with_retry(|| async {
            let result = sqlx::query("UPDATE accounts SET priority = ? WHERE id = ?")
                .bind(priority)
                .bind(id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(Error::AccountNotFound(id.to_string()));
            }
            Ok(())
        })
        .await
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<()> {
        self.with_retry(|| async {
            let result = sqlx::query("UPDATE accounts SET name = ? WHERE id = ?")
                .bind(name)
                .bind(id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(Error::AccountNotFound(id.to_string()));
            }
            Ok(())
        })
        .await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.with_retry(|| async {
            sqlx::query("DELETE FROM accounts WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    /// Idempotent on `id`: re-inserting the same request id overwrites
    /// the prior row rather than failing, so a retried write after a
    /// transient failure never produces duplicate rows.
    pub async fn write_request(&self, record: &RequestRecord) -> Result<()> {
        self.with_retry(|| async {
            sqlx::query(
                "INSERT INTO requests (id, timestamp, method, path, account_used, status_code, \
                 success, error_message, response_time_ms, failover_attempts, model, \
                 input_tokens, output_tokens, cache_read_input_tokens, \
                 cache_creation_input_tokens, total_tokens, cost_usd, \
                 output_tokens_per_second, agent_used) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(id) DO UPDATE SET \
                 status_code = excluded.status_code, success = excluded.success, \
                 error_message = excluded.error_message, \
                 response_time_ms = excluded.response_time_ms, \
                 failover_attempts = excluded.failover_attempts, model = excluded.model, \
                 input_tokens = excluded.input_tokens, output_tokens = excluded.output_tokens, \
                 cache_read_input_tokens = excluded.cache_read_input_tokens, \
                 cache_creation_input_tokens = excluded.cache_creation_input_tokens, \
                 total_tokens = excluded.total_tokens, cost_usd = excluded.cost_usd, \
                 output_tokens_per_second = excluded.output_tokens_per_second, \
                 agent_used = excluded.agent_used",
            )
            .bind(&record.id)
            .bind(record.timestamp)
            .bind(&record.method)
            .bind(&record.path)
            .bind(&record.account_used)
            .bind(record.status_code)
            .bind(record.success)
            .bind(&record.error_message)
            .bind(record.response_time_ms)
            .bind(record.failover_attempts)
            .bind(&record.model)
            .bind(record.input_tokens)
            .bind(record.output_tokens)
            .bind(record.cache_read_input_tokens)
            .bind(record.cache_creation_input_tokens)
            .bind(record.total_tokens)
            .bind(record.cost_usd)
            .bind(record.output_tokens_per_second)
            .bind(&record.agent_used)
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;
            Ok(())
        })
        .await
    }

    pub async fn write_payload(&self, payload: &RequestPayload) -> Result<()> {
        self.with_retry(|| async {
            sqlx::query(
                "INSERT INTO request_payloads (request_id, request_headers, request_body, \
                 response_headers, response_body) VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(request_id) DO UPDATE SET \
                 request_headers = excluded.request_headers, request_body = excluded.request_body, \
                 response_headers = excluded.response_headers, response_body = excluded.response_body",
            )
            .bind(&payload.request_id)
            .bind(&payload.request_headers)
            .bind(&payload.request_body)
            .bind(&payload.response_headers)
            .bind(&payload.response_body)
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;
            Ok(())
        })
        .await
    }

    pub async fn list_requests(&self, limit: i64) -> Result<Vec<RequestRecord>> {
        let rows = sqlx::query_as::<_, RequestRecord>(
            "SELECT * FROM requests ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_request(&self, id: &str) -> Result<Option<RequestRecord>> {
        let row = sqlx::query_as::<_, RequestRecord>("SELECT * FROM requests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_payload(&self, request_id: &str) -> Result<Option<RequestPayload>> {
        let row = sqlx::query_as::<_, RequestPayload>(
            "SELECT * FROM request_payloads WHERE request_id = ?",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn create_oauth_session(&self, session: &OAuthSession) -> Result<()> {
        self.with_retry(|| async {
            sqlx::query(
                "INSERT INTO oauth_sessions (id, account_name, pkce_verifier, mode, tier, \
                 created_at, expires_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&session.id)
            .bind(&session.account_name)
            .bind(&session.pkce_verifier)
            .bind(&session.mode)
            .bind(session.tier)
            .bind(session.created_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;
            Ok(())
        })
        .await
    }

    /// Retrieves and deletes the session in one step: a second call with
    /// the same id always fails with `SessionNotFound`.
    pub async fn take_oauth_session(&self, id: &str) -> Result<OAuthSession> {
        let session = sqlx::query_as::<_, OAuthSession>("SELECT * FROM oauth_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        sqlx::query("DELETE FROM oauth_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(session)
    }

    pub async fn set_agent_preference(&self, agent_name: &str, account_id: Option<&str>, now: i64) -> Result<()> {
        self.with_retry(|| async {
            sqlx::query(
                "INSERT INTO agent_preferences (agent_name, preferred_account_id, updated_at) \
                 VALUES (?, ?, ?) ON CONFLICT(agent_name) DO UPDATE SET \
                 preferred_account_id = excluded.preferred_account_id, updated_at = excluded.updated_at",
            )
            .bind(agent_name)
            .bind(account_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;
            Ok(())
        })
        .await
    }

    pub async fn get_agent_preference(&self, agent_name: &str) -> Result<Option<AgentPreference>> {
        let row = sqlx::query_as::<_, AgentPreference>(
            "SELECT * FROM agent_preferences WHERE agent_name = ?",
        )
        .bind(agent_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
