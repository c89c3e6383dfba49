//! Load Balancer: session-pinned candidate ordering.
//!
//! Replaces round-robin selection: round robin has no notion of a
//! pinned session, so only the `"session"` strategy is accepted here.

use storage::Account;

use crate::error::{Error, Result};

/// Builds the ordered candidate list for one dispatch: active-session
/// accounts first (most recently pinned wins), then idle accounts
/// ordered by priority and least-recently-used.
pub fn ordered_candidates(
    accounts: Vec<Account>,
    now_ms: i64,
    session_duration_ms: i64,
) -> Result<Vec<Account>> {
    let (eligible, ineligible): (Vec<Account>, Vec<Account>) =
        accounts.into_iter().partition(|a| a.is_eligible(now_ms));

    if eligible.is_empty() {
        return Err(Error::NoAccountsAvailable(diagnostic_body(&ineligible)));
    }

    let (mut active, mut idle): (Vec<Account>, Vec<Account>) = eligible
        .into_iter()
        .partition(|a| a.session_active(now_ms, session_duration_ms));

    active.sort_by(|a, b| b.session_start.cmp(&a.session_start).then(a.priority.cmp(&b.priority)));
    idle.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.last_used.cmp(&b.last_used)));

    active.extend(idle);
    Ok(active)
}

/// Diagnostic body listing account tiers/state for the 503 response
/// when no accounts are eligible at all.
pub fn diagnostic_body(accounts: &[Account]) -> String {
    let entries: Vec<serde_json::Value> = accounts
        .iter()
        .map(|a| {
            serde_json::json!({
                "name": a.name,
                "tier": a.account_tier,
                "paused": a.paused,
                "rate_limited": a.rate_limited_until.is_some(),
            })
        })
        .collect();
    serde_json::json!({ "error": "no_accounts_available", "accounts": entries }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, priority: i64, session_start: Option<i64>, last_used: Option<i64>) -> Account {
        Account {
            id: id.to_string(),
            name: id.to_string(),
            provider: "anthropic".to_string(),
            refresh_token: "rt".to_string(),
            access_token: Some("at".to_string()),
            expires_at: i64::MAX,
            created_at: 0,
            last_used,
            request_count: 0,
            total_requests: 0,
            account_tier: 1,
            session_start,
            session_request_count: 0,
            rate_limited_until: None,
            rate_limit_status: None,
            rate_limit_reset: None,
            rate_limit_remaining: None,
            paused: false,
            priority,
        }
    }

    #[test]
    fn active_sessions_precede_idle_accounts() {
        let now = 1_000_000;
        let pinned = account("pinned", 5, Some(now - 100), None);
        let idle = account("idle", 0, None, Some(now - 10_000));
        let ordered = ordered_candidates(vec![idle, pinned], now, 5 * 3_600_000).unwrap();
        assert_eq!(ordered[0].id, "pinned");
    }

    #[test]
    fn active_sessions_order_by_most_recent_start() {
        let now = 1_000_000;
        let older = account("older", 0, Some(now - 10_000), None);
        let newer = account("newer", 0, Some(now - 100), None);
        let ordered = ordered_candidates(vec![older, newer], now, 5 * 3_600_000).unwrap();
        assert_eq!(ordered[0].id, "newer");
    }

    #[test]
    fn idle_accounts_order_by_priority_then_lru() {
        let now = 1_000_000;
        let high_priority = account("high", 0, None, Some(now));
        let low_priority_lru = account("low-lru", 5, None, Some(now - 100_000));
        let low_priority_recent = account("low-recent", 5, None, Some(now - 10));
        let ordered = ordered_candidates(
            vec![low_priority_recent, low_priority_lru, high_priority],
            now,
            5 * 3_600_000,
        )
        .unwrap();
        assert_eq!(ordered[0].id, "high");
        assert_eq!(ordered[1].id, "low-lru");
        assert_eq!(ordered[2].id, "low-recent");
    }

    #[test]
    fn paused_and_rate_limited_accounts_are_excluded() {
        let now = 1_000_000;
        let mut paused = account("paused", 0, None, None);
        paused.paused = true;
        let mut limited = account("limited", 0, None, None);
        limited.rate_limited_until = Some(now + 60_000);
        let ok = account("ok", 0, None, None);
        let ordered = ordered_candidates(vec![paused, limited, ok], now, 5 * 3_600_000).unwrap();
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].id, "ok");
    }

    #[test]
    fn empty_eligible_set_errors_without_consulting_partitions_again() {
        let now = 1_000_000;
        let mut paused = account("paused", 0, None, None);
        paused.paused = true;
        let result = ordered_candidates(vec![paused], now, 5 * 3_600_000);
        assert!(matches!(result, Err(Error::NoAccountsAvailable(_))));
    }

    #[test]
    fn no_accounts_available_diagnostic_lists_every_ineligible_account() {
        let now = 1_000_000;
        let mut paused = account("a", 0, None, None);
        paused.paused = true;
        let mut limited = account("b", 0, None, None);
        limited.rate_limited_until = Some(now + 60_000);
        let result = ordered_candidates(vec![paused, limited], now, 5 * 3_600_000);
        let Err(Error::NoAccountsAvailable(body)) = result else {
            panic!("expected NoAccountsAvailable");
        };
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["accounts"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn session_window_boundary_still_pinned_one_ms_before_expiry() {
        let now = 1_000_000;
        let duration = 100_000;
        let acct = account("a", 0, Some(now - duration + 1), None);
        let ordered = ordered_candidates(vec![acct], now, duration).unwrap();
        // still active: falls into the "active" partition, which is the
        // only partition present, so it is returned either way; the
        // meaningful assertion is `session_active` directly:
        assert!(ordered[0].session_active(now, duration));
    }

    #[test]
    fn session_window_boundary_rolled_over_one_ms_after_expiry() {
        let now = 1_000_000;
        let duration = 100_000;
        let acct = account("a", 0, Some(now - duration - 1), None);
        assert!(!acct.session_active(now, duration));
    }

    #[test]
    fn tier_scales_session_duration() {
        let now = 1_000_000;
        let duration = 100_000;
        let mut tier5 = account("t5", 0, Some(now - duration - 1), None);
        tier5.account_tier = 5;
        // still within 5x the base duration
        assert!(tier5.session_active(now, duration));
    }
}
