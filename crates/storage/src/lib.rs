//! The embedded relational store: durable accounts, request telemetry
//! and payloads, OAuth sessions, and agent preferences, plus an
//! in-memory read model over recent requests.

mod account_store;
mod error;
mod models;
mod request_log;

pub use account_store::{now_ms, AccountStore};
pub use error::{Error, Result};
pub use models::{Account, AgentPreference, OAuthMode, OAuthSession, RequestPayload, RequestRecord, Tier};
pub use request_log::RequestLog;
