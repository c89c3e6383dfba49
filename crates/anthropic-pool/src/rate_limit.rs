//! Rate-Limit Tracker: pure functions over upstream response status and
//! headers. Holds no state of its own — everything it derives is
//! written straight into the Account Store.

use reqwest::header::HeaderMap;

const DEFAULT_COOLDOWN_SECS: i64 = 60;

/// Snapshot of the `anthropic-ratelimit-*` headers, when present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitSnapshot {
    pub status: Option<String>,
    pub reset: Option<i64>,
    pub remaining: Option<i64>,
}

pub fn parse_rate_limit_headers(headers: &HeaderMap) -> RateLimitSnapshot {
    RateLimitSnapshot {
        status: header_str(headers, "anthropic-ratelimit-unified-status"),
        reset: header_i64(headers, "anthropic-ratelimit-unified-reset"),
        remaining: header_i64(headers, "anthropic-ratelimit-unified-remaining"),
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

/// Computes the cooldown end timestamp (epoch ms) for a 429/rate-limited
/// response. Prefers `retry-after` (seconds), falls back to the
/// account's last observed `reset`, else the default 60s cooldown.
pub fn cooldown_until(now_ms: i64, headers: &HeaderMap, last_known_reset: Option<i64>) -> i64 {
    if let Some(retry_after) = header_i64(headers, "retry-after") {
        return now_ms + retry_after * 1000;
    }
    if let Some(reset) = last_known_reset {
        if reset > now_ms {
            return reset;
        }
    }
    now_ms + DEFAULT_COOLDOWN_SECS * 1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                reqwest::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn cooldown_uses_retry_after_when_present() {
        let headers = headers_with(&[("retry-after", "30")]);
        let now = 1_000_000;
        assert_eq!(cooldown_until(now, &headers, None), now + 30_000);
    }

    #[test]
    fn cooldown_defaults_to_60s_without_retry_after_or_reset() {
        let headers = HeaderMap::new();
        let now = 1_000_000;
        assert_eq!(cooldown_until(now, &headers, None), now + 60_000);
    }

    #[test]
    fn cooldown_falls_back_to_last_known_reset() {
        let headers = HeaderMap::new();
        let now = 1_000_000;
        let reset = now + 45_000;
        assert_eq!(cooldown_until(now, &headers, Some(reset)), reset);
    }

    #[test]
    fn stale_last_known_reset_falls_back_to_default() {
        let headers = HeaderMap::new();
        let now = 1_000_000;
        assert_eq!(cooldown_until(now, &headers, Some(now - 1)), now + 60_000);
    }

    #[test]
    fn parses_unified_rate_limit_headers() {
        let headers = headers_with(&[
            ("anthropic-ratelimit-unified-status", "allowed"),
            ("anthropic-ratelimit-unified-reset", "1700000000"),
            ("anthropic-ratelimit-unified-remaining", "42"),
        ]);
        let snapshot = parse_rate_limit_headers(&headers);
        assert_eq!(snapshot.status.as_deref(), Some("allowed"));
        assert_eq!(snapshot.reset, Some(1_700_000_000));
        assert_eq!(snapshot.remaining, Some(42));
    }

    #[test]
    fn missing_headers_produce_empty_snapshot() {
        let snapshot = parse_rate_limit_headers(&HeaderMap::new());
        assert_eq!(snapshot, RateLimitSnapshot::default());
    }
}
