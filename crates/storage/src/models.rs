//! Row types for the embedded relational store. These mirror the data
//! model definitions directly: one struct per table, `FromRow`-derived
//! so the store's query layer never hand-rolls column indexing.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Capacity multiplier applied to session quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    One = 1,
    Five = 5,
    Twenty = 20,
}

impl Tier {
    pub fn from_i64(value: i64) -> Self {
        match value {
            5 => Tier::Five,
            20 => Tier::Twenty,
            _ => Tier::One,
        }
    }

    pub fn multiplier(&self) -> u64 {
        *self as u64
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub expires_at: i64,
    pub created_at: i64,
    pub last_used: Option<i64>,
    pub request_count: i64,
    pub total_requests: i64,
    pub account_tier: i64,
    pub session_start: Option<i64>,
    pub session_request_count: i64,
    pub rate_limited_until: Option<i64>,
    pub rate_limit_status: Option<String>,
    pub rate_limit_reset: Option<i64>,
    pub rate_limit_remaining: Option<i64>,
    pub paused: bool,
    pub priority: i64,
}

impl Account {
    pub fn tier(&self) -> Tier {
        Tier::from_i64(self.account_tier)
    }

    /// Whether the account is eligible for selection right now: not
    /// paused, and any cooldown has elapsed.
    pub fn is_eligible(&self, now_ms: i64) -> bool {
        !self.paused && self.rate_limited_until.map(|until| until <= now_ms).unwrap_or(true)
    }

    /// Whether the pinned session is still active.
    pub fn session_active(&self, now_ms: i64, session_duration_ms: i64) -> bool {
        match self.session_start {
            Some(start) => now_ms - start < session_duration_ms * self.tier().multiplier() as i64,
            None => false,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub timestamp: i64,
    pub method: String,
    pub path: String,
    pub account_used: Option<String>,
    pub status_code: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub response_time_ms: Option<i64>,
    pub failover_attempts: i64,
    pub model: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub cache_read_input_tokens: Option<i64>,
    pub cache_creation_input_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cost_usd: Option<f64>,
    pub output_tokens_per_second: Option<f64>,
    pub agent_used: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RequestPayload {
    pub request_id: String,
    pub request_headers: String,
    pub request_body: String,
    pub response_headers: String,
    pub response_body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OAuthMode {
    Console,
    Max,
}

impl OAuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthMode::Console => "console",
            OAuthMode::Max => "max",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "console" => Some(OAuthMode::Console),
            "max" => Some(OAuthMode::Max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OAuthSession {
    pub id: String,
    pub account_name: Option<String>,
    pub pkce_verifier: String,
    pub mode: String,
    pub tier: i64,
    pub created_at: i64,
    pub expires_at: i64,
}

impl OAuthSession {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AgentPreference {
    pub agent_name: String,
    pub preferred_account_id: Option<String>,
    pub updated_at: i64,
}
