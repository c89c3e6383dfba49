//! Load Balancer and Rate-Limit Tracker: session-pinned account
//! selection backed by the durable Account Store, plus the pool facade
//! the request pipeline drives per dispatch attempt.
//!
//! Refresh is strictly on-demand — there is deliberately no background
//! refresh task here.

pub mod error;
pub mod pool;
pub mod quota;
pub mod rate_limit;
pub mod session;

pub use error::{Error, Result};
pub use pool::{Pool, SelectedAccount};
pub use quota::{classify_429, classify_status};
pub use rate_limit::{cooldown_until, parse_rate_limit_headers, RateLimitSnapshot};
pub use session::ordered_candidates;
