//! Provider capability set: the inheritance-free polymorphism seam
//! described in spec.md design note 9. A provider is a stateless,
//! synchronous set of functions selected once per request by path —
//! today there is exactly one implementation (Anthropic's OAuth-backed
//! API), but nothing here assumes that stays true.
//!
//! Account selection, token refresh, and error reporting all live on
//! `anthropic_pool::Pool`, not on the provider — a provider only knows
//! how to shape a request for its upstream and how to read one back.

use reqwest::header::HeaderMap;
use serde_json::Value;

/// Classification of a failed upstream response, shared with
/// `anthropic_pool` so the pool can decide what to do with an account
/// after a failed dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Retryable on the same account later (timeouts, 5xx).
    Transient,
    /// Usage window exhausted; arm a cooldown and fail over.
    QuotaExceeded,
    /// Invalid credentials; pause the account until an operator acts.
    Permanent,
}

/// A provider's capability set: everything the Request Pipeline needs
/// to dispatch one attempt to one upstream and interpret the result.
/// Implementations hold no account state — the pipeline supplies the
/// access token and reads back only what the provider can derive from
/// the wire data in front of it.
pub trait Provider: Send + Sync {
    /// Identifier for logging and metrics labels (e.g. "anthropic").
    fn id(&self) -> &str;

    /// Whether this provider needs the JSON body parsed/mutated before
    /// dispatch (e.g. to inject a system prompt). When false the
    /// pipeline forwards the body as opaque bytes.
    fn needs_body(&self) -> bool;

    /// Rewrites outbound headers in place: strips the client's
    /// `authorization`, installs the bearer token, and sets any
    /// provider-required headers (beta flags, API version, user agent).
    fn rewrite_headers(&self, headers: &mut HeaderMap, access_token: &str);

    /// Rewrites the outbound JSON body in place, when `needs_body` is
    /// true. No-op default for providers that never inspect the body.
    fn rewrite_body(&self, _body: &mut Value) {}

    /// Classifies a failed dispatch (non-2xx status, response body) for
    /// `anthropic_pool::Pool::report_error`.
    fn classify_error(&self, status: u16, body: &str) -> ErrorClassification;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Provider for Noop {
        fn id(&self) -> &str {
            "noop"
        }

        fn needs_body(&self) -> bool {
            false
        }

        fn rewrite_headers(&self, _headers: &mut HeaderMap, _access_token: &str) {}

        fn classify_error(&self, status: u16, _body: &str) -> ErrorClassification {
            if status == 429 {
                ErrorClassification::QuotaExceeded
            } else {
                ErrorClassification::Transient
            }
        }
    }

    #[test]
    fn default_rewrite_body_is_a_no_op() {
        let provider = Noop;
        let mut body = serde_json::json!({"a": 1});
        provider.rewrite_body(&mut body);
        assert_eq!(body, serde_json::json!({"a": 1}));
    }

    #[test]
    fn classify_error_dispatches_on_status() {
        let provider = Noop;
        assert_eq!(provider.classify_error(429, ""), ErrorClassification::QuotaExceeded);
        assert_eq!(provider.classify_error(500, ""), ErrorClassification::Transient);
    }
}
