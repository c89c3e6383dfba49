//! Ties the Account Store, OAuth Manager, and session-pinned ordering
//! into the one facade the Request Pipeline drives per dispatch
//! attempt.

use std::sync::Arc;

use anthropic_auth::OAuthManager;
use provider::ErrorClassification;
use storage::{now_ms, Account, AccountStore};

use crate::error::{Error, Result};
use crate::session::ordered_candidates;

#[derive(Debug, Clone)]
pub struct SelectedAccount {
    pub id: String,
    pub name: String,
    pub access_token: String,
}

pub struct Pool {
    store: Arc<AccountStore>,
    oauth: Arc<OAuthManager>,
    session_duration_ms: i64,
}

impl Pool {
    pub fn new(store: Arc<AccountStore>, oauth: Arc<OAuthManager>, session_duration_ms: i64) -> Self {
        Self {
            store,
            oauth,
            session_duration_ms,
        }
    }

    /// Ordered candidate accounts for one dispatch, per the session-pinned
    /// algorithm. Each candidate still needs a token obtained via
    /// [`Pool::access_token_for`] before use.
    pub async fn candidates(&self) -> Result<Vec<Account>> {
        let accounts = self.store.list_accounts().await?;
        ordered_candidates(accounts, now_ms(), self.session_duration_ms)
    }

    /// Obtains a valid bearer token for `account`, refreshing on demand.
    pub async fn access_token_for(&self, account: &Account) -> Result<SelectedAccount> {
        let token = self.oauth.ensure_access_token(account).await?;
        Ok(SelectedAccount {
            id: account.id.clone(),
            name: account.name.clone(),
            access_token: token,
        })
    }

    /// Records a successful dispatch: rolls or extends the session and
    /// advances usage counters.
    pub async fn record_dispatch(&self, account_id: &str) -> Result<()> {
        self.store
            .update_usage(account_id, now_ms(), self.session_duration_ms)
            .await?;
        Ok(())
    }

    pub async fn mark_rate_limited(
        &self,
        account_id: &str,
        until: i64,
        status: Option<&str>,
        reset: Option<i64>,
        remaining: Option<i64>,
    ) -> Result<()> {
        self.store
            .mark_rate_limited(account_id, until, status, reset, remaining)
            .await?;
        Ok(())
    }

    /// Applies an error classification from a failed dispatch attempt:
    /// quota exhaustion arms a cooldown, permanent failures pause the
    /// account (used for `refresh_failed`), transient failures are a
    /// no-op since the account remains eligible for the next request.
    pub async fn report_error(
        &self,
        account_id: &str,
        classification: ErrorClassification,
        cooldown_until: Option<i64>,
    ) -> Result<()> {
        match classification {
            ErrorClassification::QuotaExceeded => {
                let until = cooldown_until.unwrap_or_else(|| now_ms() + 60_000);
                self.mark_rate_limited(account_id, until, None, None, None).await
            }
            ErrorClassification::Permanent => self.pause(account_id).await,
            ErrorClassification::Transient => Ok(()),
        }
    }

    pub async fn pause(&self, account_id: &str) -> Result<()> {
        self.store.set_paused(account_id, true).await?;
        Ok(())
    }

    pub async fn resume(&self, account_id: &str) -> Result<()> {
        self.store.set_paused(account_id, false).await?;
        Ok(())
    }

    pub async fn rename(&self, account_id: &str, name: &str) -> Result<()> {
        self.store.rename(account_id, name).await?;
        Ok(())
    }

    pub async fn remove(&self, account_id: &str) -> Result<()> {
        self.store.delete(account_id).await?;
        Ok(())
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Account> {
        self.store
            .get_by_name(name)
            .await
            .map_err(|_| Error::NotFound(name.to_string()))
    }

    /// Health snapshot for `/health` and `/api/stats`: account counts by
    /// eligibility state, never exposing tokens.
    pub async fn health(&self) -> Result<serde_json::Value> {
        let accounts = self.store.list_accounts().await?;
        let now = now_ms();
        let total = accounts.len();
        let available = accounts.iter().filter(|a| a.is_eligible(now)).count();
        let cooling_down = accounts
            .iter()
            .filter(|a| a.rate_limited_until.map(|u| u > now).unwrap_or(false))
            .count();
        let disabled = accounts.iter().filter(|a| a.paused).count();

        let status = if available == 0 && total > 0 {
            "unhealthy"
        } else if available < total {
            "degraded"
        } else {
            "healthy"
        };

        Ok(serde_json::json!({
            "status": status,
            "accounts_total": total,
            "accounts_available": available,
            "accounts_cooling_down": cooling_down,
            "accounts_disabled": disabled,
            "accounts": accounts.iter().map(|a| serde_json::json!({
                "name": a.name,
                "tier": a.account_tier,
                "paused": a.paused,
                "rate_limited_until": a.rate_limited_until,
                "priority": a.priority,
            })).collect::<Vec<_>>(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::RetryPolicy;
    use std::time::Duration;

    async fn pool() -> (Pool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool-test.db");
        let policy = RetryPolicy::new(Duration::from_millis(1), 1.0, Duration::from_millis(5), 3);
        let store = Arc::new(AccountStore::open(path.to_str().unwrap(), policy).await.unwrap());
        let oauth = Arc::new(OAuthManager::new(Arc::clone(&store), reqwest::Client::new()));
        (Pool::new(Arc::clone(&store), oauth, 5 * 3_600_000), dir)
    }

    fn sample_account(id: &str, name: &str) -> Account {
        Account {
            id: id.to_string(),
            name: name.to_string(),
            provider: "anthropic".to_string(),
            refresh_token: "rt".to_string(),
            access_token: Some("at".to_string()),
            expires_at: now_ms() + 3_600_000,
            created_at: now_ms(),
            last_used: None,
            request_count: 0,
            total_requests: 0,
            account_tier: 1,
            session_start: None,
            session_request_count: 0,
            rate_limited_until: None,
            rate_limit_status: None,
            rate_limit_reset: None,
            rate_limit_remaining: None,
            paused: false,
            priority: 0,
        }
    }

    #[tokio::test]
    async fn health_reports_healthy_with_all_available() {
        let (pool, _dir) = pool().await;
        pool.store.insert_account(&sample_account("a1", "one")).await.unwrap();
        let health = pool.health().await.unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["accounts_total"], 1);
    }

    #[tokio::test]
    async fn health_reports_unhealthy_when_all_paused() {
        let (pool, _dir) = pool().await;
        let mut account = sample_account("a1", "one");
        account.paused = true;
        pool.store.insert_account(&account).await.unwrap();
        let health = pool.health().await.unwrap();
        assert_eq!(health["status"], "unhealthy");
    }

    #[tokio::test]
    async fn candidates_excludes_paused_accounts() {
        let (pool, _dir) = pool().await;
        let mut paused = sample_account("a1", "paused");
        paused.paused = true;
        pool.store.insert_account(&paused).await.unwrap();
        pool.store.insert_account(&sample_account("a2", "ok")).await.unwrap();
        let candidates = pool.candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "ok");
    }

    #[tokio::test]
    async fn candidates_error_when_none_eligible() {
        let (pool, _dir) = pool().await;
        let result = pool.candidates().await;
        assert!(matches!(result, Err(Error::NoAccountsAvailable(_))));
    }

    #[tokio::test]
    async fn report_error_quota_exceeded_arms_cooldown() {
        let (pool, _dir) = pool().await;
        pool.store.insert_account(&sample_account("a1", "one")).await.unwrap();
        let until = now_ms() + 30_000;
        pool.report_error("a1", ErrorClassification::QuotaExceeded, Some(until))
            .await
            .unwrap();
        let account = pool.store.get_account("a1").await.unwrap();
        assert_eq!(account.rate_limited_until, Some(until));
    }

    #[tokio::test]
    async fn report_error_permanent_pauses_account() {
        let (pool, _dir) = pool().await;
        pool.store.insert_account(&sample_account("a1", "one")).await.unwrap();
        pool.report_error("a1", ErrorClassification::Permanent, None).await.unwrap();
        let account = pool.store.get_account("a1").await.unwrap();
        assert!(account.paused);
    }

    #[tokio::test]
    async fn report_error_transient_is_a_no_op() {
        let (pool, _dir) = pool().await;
        pool.store.insert_account(&sample_account("a1", "one")).await.unwrap();
        pool.report_error("a1", ErrorClassification::Transient, None).await.unwrap();
        let account = pool.store.get_account("a1").await.unwrap();
        assert!(!account.paused);
        assert!(account.rate_limited_until.is_none());
    }

    #[tokio::test]
    async fn record_dispatch_rolls_session_on_first_use() {
        let (pool, _dir) = pool().await;
        pool.store.insert_account(&sample_account("a1", "one")).await.unwrap();
        pool.record_dispatch("a1").await.unwrap();
        let account = pool.store.get_account("a1").await.unwrap();
        assert_eq!(account.session_request_count, 1);
    }
}
